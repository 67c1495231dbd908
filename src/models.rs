use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A posting exactly as an adapter scraped it, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub company_name: String,
    pub location: String,
    pub raw_text: String, // description + requirements + tags, flattened
    pub posted_at: Option<DateTime<Utc>>,
    pub salary_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteType {
    OnSite,
    Hybrid,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmploymentType {
    FullTime,
    PartTime,
    Contract,
    Internship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperienceLevel {
    Entry,
    Mid,
    Senior,
    Manager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }

            /// Lenient parse: case-insensitive, accepts `_`/space for `-`.
            pub fn parse(s: &str) -> Option<Self> {
                let norm = s.trim().to_lowercase().replace(['_', ' '], "-");
                match norm.as_str() {
                    $($text $(| $alias)* => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }
    };
}

text_enum!(RemoteType {
    OnSite => "on-site" | "onsite" | "office" | "in-office",
    Hybrid => "hybrid",
    Remote => "remote",
});

text_enum!(EmploymentType {
    FullTime => "full-time" | "fulltime" | "permanent",
    PartTime => "part-time" | "parttime",
    Contract => "contract" | "freelance" | "temporary",
    Internship => "internship" | "intern",
});

text_enum!(ExperienceLevel {
    Entry => "entry" | "junior",
    Mid => "mid" | "intermediate",
    Senior => "senior",
    Manager => "manager",
});

text_enum!(RunStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Canonical persisted posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub source: String,
    pub source_url: String,
    pub title: String,
    pub company_id: Option<i64>,
    pub company_name: Option<String>, // denormalized for convenience
    pub location: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub remote_type: RemoteType,
    pub salary_min: Option<i64>,
    pub salary_max: Option<i64>,
    pub salary_currency: Option<String>,
    pub employment_type: EmploymentType,
    pub experience_level: ExperienceLevel,
    pub description: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub first_seen_at: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A normalized posting ready for the store: the job row plus the skills
/// extracted from it, which replace whatever the store held before.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Posting {
    pub job: Job,
    pub skills: Vec<JobSkill>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSkill {
    pub job_id: String,
    pub skill: String,
    pub category: String,
    pub years_required: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillCount {
    pub name: String,
    pub category: String,
    pub jobs: i64,
}

/// Notification preferences of one user. Authored outside this crate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub desired_titles: Vec<String>,
    #[serde(default)]
    pub desired_locations: Vec<String>,
    #[serde(default)]
    pub desired_remote_type: Option<RemoteType>,
    #[serde(default)]
    pub min_salary: Option<i64>,
    #[serde(default)]
    pub preferred_employment_types: Vec<EmploymentType>,
    /// Declared skills; empty means the skills factor falls back to its placeholder.
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default = "default_frequency")]
    pub notification_frequency: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_frequency() -> String {
    "daily".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAlert {
    pub id: i64,
    pub user_id: i64,
    pub job_id: String,
    pub match_score: f64,
    pub match_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub was_opened: bool,
}

/// An unsent alert handed to the notification transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAlert {
    pub alert: JobAlert,
    pub job: Job,
    pub user_email: String,
    pub notification_frequency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapingLog {
    pub id: i64,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub jobs_scraped: u32,
    pub jobs_new: u32,
    pub jobs_updated: u32,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_enums_parse_leniently() {
        assert_eq!(RemoteType::parse("On Site"), Some(RemoteType::OnSite));
        assert_eq!(RemoteType::parse("REMOTE"), Some(RemoteType::Remote));
        assert_eq!(EmploymentType::parse("full_time"), Some(EmploymentType::FullTime));
        assert_eq!(EmploymentType::parse("Freelance"), Some(EmploymentType::Contract));
        assert_eq!(ExperienceLevel::parse("junior"), Some(ExperienceLevel::Entry));
        assert_eq!(RunStatus::parse("failed"), Some(RunStatus::Failed));
        assert_eq!(RemoteType::parse("mars"), None);
    }

    #[test]
    fn test_user_profile_deserializes_with_defaults() {
        let json = r#"{
            "email": "analyst@example.com",
            "desired_titles": ["Data Analyst"],
            "desired_remote_type": "remote",
            "min_salary": 100000,
            "preferred_employment_types": ["full-time", "contract"]
        }"#;
        let user: UserProfile = serde_json::from_str(json).unwrap();
        assert_eq!(user.desired_remote_type, Some(RemoteType::Remote));
        assert_eq!(user.preferred_employment_types.len(), 2);
        assert_eq!(user.notification_frequency, "daily");
        assert!(user.is_active);
        assert!(user.skills.is_empty());
    }
}
