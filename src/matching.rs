use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{Job, UserProfile};

const TITLE_WEIGHT: f64 = 0.3;
const LOCATION_WEIGHT: f64 = 0.2;
const SALARY_WEIGHT: f64 = 0.2;
const SKILLS_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;

/// Sub-scores at or above this contribute a reason.
const REASON_THRESHOLD: f64 = 0.7;
const NEUTRAL: f64 = 0.5;

/// Per-factor sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breakdown {
    pub title: f64,
    pub location: f64,
    pub salary: f64,
    pub skills: f64,
    pub recency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub score: f64,
    pub reasons: Vec<String>,
    pub breakdown: Breakdown,
}

/// A scored job, as ranked for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub job: Job,
    pub score: f64,
    pub reasons: Vec<String>,
    pub breakdown: Breakdown,
}

impl Match {
    pub fn new(job: Job, result: MatchResult) -> Self {
        Self {
            job,
            score: result.score,
            reasons: result.reasons,
            breakdown: result.breakdown,
        }
    }
}

/// Scores `job` (with its extracted `skills`) for `user`. Pure: the same
/// inputs and `now` always give the same score and reasons.
pub fn score(job: &Job, skills: &[String], user: &UserProfile, now: DateTime<Utc>) -> MatchResult {
    let breakdown = Breakdown {
        title: title_score(&job.title, &user.desired_titles),
        location: location_score(job, user),
        salary: salary_score(job.salary_min, job.salary_max, user.min_salary),
        skills: skills_score(skills, &user.skills),
        recency: recency_score(job.posted_at, now),
    };

    let mut reasons = Vec::new();
    if breakdown.title >= REASON_THRESHOLD {
        reasons.push(format!("Title matches your profile ({}%)", percent(breakdown.title)));
    }
    if breakdown.location >= REASON_THRESHOLD {
        reasons.push(format!("Location matches your preference ({}%)", percent(breakdown.location)));
    }
    if let Some(min) = user.min_salary.filter(|_| breakdown.salary >= REASON_THRESHOLD) {
        reasons.push(format!("Salary meets your requirement (>= {})", thousands(min)));
    }
    if breakdown.skills >= REASON_THRESHOLD {
        reasons.push(skills_reason(skills, &user.skills));
    }
    if breakdown.recency >= REASON_THRESHOLD {
        reasons.push("Recently posted".to_string());
    }

    let total = breakdown.title * TITLE_WEIGHT
        + breakdown.location * LOCATION_WEIGHT
        + breakdown.salary * SALARY_WEIGHT
        + breakdown.skills * SKILLS_WEIGHT
        + breakdown.recency * RECENCY_WEIGHT;

    MatchResult {
        score: (total * 100.0 * 100.0).round() / 100.0,
        reasons,
        breakdown,
    }
}

/// Best first: higher score, then more recent `posted_at` (undated last),
/// then `job_id` so equal entries never depend on input order.
pub fn rank(matches: &mut [Match]) {
    matches.sort_by(compare);
}

fn compare(a: &Match, b: &Match) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.job.posted_at, b.job.posted_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.job.job_id.cmp(&b.job.job_id))
}

pub fn title_score(job_title: &str, desired: &[String]) -> f64 {
    if desired.is_empty() {
        return NEUTRAL;
    }
    let title = job_title.trim().to_lowercase();
    if title.is_empty() {
        return 0.0;
    }
    let desired: Vec<String> = desired.iter().map(|d| d.trim().to_lowercase()).collect();

    if desired.iter().any(|d| *d == title) {
        return 1.0;
    }
    if desired
        .iter()
        .any(|d| !d.is_empty() && (title.contains(d.as_str()) || d.contains(title.as_str())))
    {
        return 0.7;
    }

    let job_words: HashSet<&str> = title.split_whitespace().collect();
    desired
        .iter()
        .filter_map(|d| {
            let words: HashSet<&str> = d.split_whitespace().collect();
            let overlap = job_words.intersection(&words).count();
            (overlap > 0).then(|| {
                let fraction = overlap as f64 / job_words.len().max(words.len()) as f64;
                0.4 + fraction * 0.3
            })
        })
        .fold(0.0, f64::max)
}

/// Remote-type alignment and location text each earn half. When the user
/// states only one of the two, that one carries the whole score.
pub fn location_score(job: &Job, user: &UserProfile) -> f64 {
    let wants_place = !user.desired_locations.is_empty();
    let remote_part: Option<f64> = user
        .desired_remote_type
        .map(|wanted| if wanted == job.remote_type { 0.5 } else { 0.0 });
    let place_part: Option<f64> = wants_place.then(|| {
        let location = job.location.trim().to_lowercase();
        let hit = !location.is_empty()
            && user.desired_locations.iter().any(|d| {
                let d = d.trim().to_lowercase();
                !d.is_empty() && (location.contains(&d) || d.contains(&location))
            });
        if hit { 0.5 } else { 0.0 }
    });

    match (remote_part, place_part) {
        (None, None) => NEUTRAL,
        (Some(part), None) | (None, Some(part)) => (part * 2.0).min(1.0),
        (Some(a), Some(b)) => (a + b).min(1.0),
    }
}

/// Continuous at `user_min`: below it the score climbs linearly to 0.5, at
/// or above it rises with the excess up to 1.0.
pub fn salary_score(job_min: Option<i64>, job_max: Option<i64>, user_min: Option<i64>) -> f64 {
    let Some(user_min) = user_min.filter(|m| *m > 0) else {
        return NEUTRAL;
    };
    let Some(offered) = job_max.or(job_min) else {
        return NEUTRAL;
    };

    let offered = offered as f64;
    let wanted = user_min as f64;
    if offered >= wanted {
        let excess_ratio = (offered - wanted) / wanted;
        NEUTRAL + (excess_ratio * 0.5).min(0.5)
    } else {
        (offered / wanted).max(0.0) * NEUTRAL
    }
}

pub fn skills_score(job_skills: &[String], user_skills: &[String]) -> f64 {
    if job_skills.is_empty() {
        return 0.5;
    }
    if user_skills.is_empty() {
        return 0.7;
    }
    overlap(job_skills, user_skills) as f64 / job_skills.len() as f64
}

fn overlap(job_skills: &[String], user_skills: &[String]) -> usize {
    let user: HashSet<String> = user_skills.iter().map(|s| s.trim().to_lowercase()).collect();
    job_skills
        .iter()
        .filter(|s| user.contains(&s.trim().to_lowercase()))
        .count()
}

fn skills_reason(job_skills: &[String], user_skills: &[String]) -> String {
    if user_skills.is_empty() {
        format!("{} relevant skills identified", job_skills.len())
    } else {
        format!(
            "You have {} of {} requested skills",
            overlap(job_skills, user_skills),
            job_skills.len()
        )
    }
}

pub fn recency_score(posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(posted_at) = posted_at else {
        return 0.3;
    };
    match (now - posted_at).num_days() {
        ..=1 => 1.0,
        2..=3 => 0.9,
        4..=7 => 0.7,
        8..=14 => 0.5,
        15..=30 => 0.3,
        _ => 0.1,
    }
}

fn percent(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

fn thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0 {
        out.insert(0, '-');
    }
    out
}
