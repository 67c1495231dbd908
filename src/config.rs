use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sources::SourceKind;

pub const DEFAULT_USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (job market research crawler; public listings only; rate limited)"
);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fetch: FetchConfig,
    pub matching: MatchingConfig,
    pub pipeline: PipelineConfig,
    pub vocabulary: VocabularyConfig,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub default_interval_ms: u64,
    pub max_retry_after_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            max_attempts: 3,
            default_interval_ms: 2000,
            max_retry_after_secs: 120,
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_millis(self.default_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub min_score: f64,
    pub lookback_days: i64,
    pub prefilter_employment_types: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_score: 70.0,
            lookback_days: 7,
            prefilter_employment_types: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub deadline_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    pub extra_skills: Vec<ExtraSkill>,
    /// alias -> canonical skill name
    pub synonyms: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraSkill {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

fn default_page_cap() -> u32 {
    5
}

impl SourceConfig {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            enabled: true,
            keywords: Vec::new(),
            locations: Vec::new(),
            page_cap: default_page_cap(),
            interval_ms: None,
            base_url: None,
            country: None,
            currency: None,
        }
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_locations(mut self, locations: &[&str]) -> Self {
        self.locations = locations.iter().map(|s| s.to_string()).collect();
        self
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_page_cap(mut self, page_cap: u32) -> Self {
        self.page_cap = page_cap;
        self
    }

    pub fn interval(&self, fetch: &FetchConfig) -> Duration {
        self.interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| fetch.default_interval())
    }
}

impl Config {
    /// Board list the pipeline ships with; a config file replaces it wholesale.
    pub fn default_sources() -> Vec<SourceConfig> {
        vec![
            SourceConfig::new(SourceKind::Fuzu)
                .with_keywords(&["data", "analytics", "business intelligence"])
                .with_locations(&["Kenya"]),
            SourceConfig::new(SourceKind::BrighterMonday)
                .with_keywords(&["data analyst", "data scientist"])
                .with_locations(&["Kenya"]),
            SourceConfig::new(SourceKind::Indeed)
                .with_keywords(&["data analyst", "data scientist", "business intelligence"])
                .with_locations(&["Kenya", "Remote"]),
            SourceConfig::new(SourceKind::Remotive).with_keywords(&["data"]),
            SourceConfig::new(SourceKind::Arbeitnow)
                .with_keywords(&["data", "analyst", "analytics", "scientist", "intelligence"]),
            SourceConfig::new(SourceKind::RemoteOk)
                .with_keywords(&["data", "analyst", "analytics", "scientist", "statistics"]),
        ]
    }

    /// Reads `path` if it exists; otherwise the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(&p)
                    .with_context(|| format!("Failed to read config file: {}", p.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Invalid config file: {}", p.display()))?
            }
            _ => Config::default(),
        };

        if config.sources.is_empty() {
            config.sources = Self::default_sources();
        }
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "jobintel")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::load(Some(Path::new("/nonexistent/jobintel.toml"))).unwrap();
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.matching.min_score, 70.0);
        assert_eq!(config.sources.len(), 6);
        assert!(config.fetch.user_agent.starts_with("jobintel/"));
    }

    #[test]
    fn test_parse_toml_sections() {
        let text = r#"
            [fetch]
            default_interval_ms = 500

            [matching]
            min_score = 65.0
            lookback_days = 14

            [vocabulary]
            extra_skills = [{ name = "Stata", category = "Statistics" }]
            synonyms = { "ms excel" = "Excel" }

            [[sources]]
            kind = "remotive"
            keywords = ["data"]
            interval_ms = 1500

            [[sources]]
            kind = "indeed"
            enabled = false
        "#;
        let config = Config::from_toml(text).unwrap();
        assert_eq!(config.fetch.default_interval_ms, 500);
        assert_eq!(config.fetch.max_attempts, 3);
        assert_eq!(config.matching.lookback_days, 14);
        assert_eq!(config.vocabulary.extra_skills[0].name, "Stata");
        assert_eq!(config.vocabulary.synonyms["ms excel"], "Excel");
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, SourceKind::Remotive);
        assert_eq!(config.sources[0].interval(&config.fetch), Duration::from_millis(1500));
        assert_eq!(config.sources[0].page_cap, 5);
        assert_eq!(config.enabled_sources().count(), 1);
    }
}
