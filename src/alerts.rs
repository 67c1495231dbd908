use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MatchingConfig;
use crate::db::{AlertOutcome, Database, JobFilter};
use crate::matching::{self, Match};
use crate::models::{Job, UserProfile};

/// An active job inside the lookback window, with its skill names.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub job: Job,
    pub skills: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub users: usize,
    pub candidates: usize,
    pub scored: usize,
    pub qualified: usize,
    pub inserted: usize,
    pub refreshed: usize,
    pub unchanged: usize,
}

pub fn load_candidates(db: &Database, lookback_days: i64, now: DateTime<Utc>) -> Result<Vec<Candidate>> {
    let jobs = db.list_jobs(&JobFilter {
        active_only: true,
        since: Some(now - Duration::days(lookback_days)),
        ..JobFilter::default()
    })?;
    jobs.into_iter()
        .map(|job| {
            let skills = db.job_skills(&job.job_id)?.into_iter().map(|s| s.skill).collect();
            Ok(Candidate { job, skills })
        })
        .collect()
}

/// A job the user would never take: its employment type is outside a
/// non-empty preference list.
fn excluded_by_employment(job: &Job, user: &UserProfile) -> bool {
    !user.preferred_employment_types.is_empty()
        && !user.preferred_employment_types.contains(&job.employment_type)
}

/// Every candidate scored for `user`, best first. No threshold applied.
pub fn rank_for_user(candidates: &[Candidate], user: &UserProfile, now: DateTime<Utc>) -> Vec<Match> {
    let mut matches: Vec<Match> = candidates
        .iter()
        .map(|c| Match::new(c.job.clone(), matching::score(&c.job, &c.skills, user, now)))
        .collect();
    matching::rank(&mut matches);
    matches
}

/// Candidates that deserve an alert for `user`, best first.
///
/// A qualifying match scores at least `min_score` and fits the user's
/// employment types. The employment prefilter applies that same rule before
/// scoring, so enabling it only skips work.
pub fn qualifying_matches(
    candidates: &[Candidate],
    user: &UserProfile,
    config: &MatchingConfig,
    now: DateTime<Utc>,
) -> (usize, Vec<Match>) {
    let pool: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| !config.prefilter_employment_types || !excluded_by_employment(&c.job, user))
        .collect();

    let mut matches: Vec<Match> = pool
        .iter()
        .filter_map(|c| {
            let result = matching::score(&c.job, &c.skills, user, now);
            let qualifies =
                result.score >= config.min_score && !excluded_by_employment(&c.job, user);
            qualifies.then(|| Match::new(c.job.clone(), result))
        })
        .collect();
    matching::rank(&mut matches);
    (pool.len(), matches)
}

/// Decides alerts for every active user and records them. Running it again
/// over unchanged data adds nothing.
pub fn run_alerts(db: &mut Database, config: &MatchingConfig, now: DateTime<Utc>) -> Result<AlertSummary> {
    let users = db.list_users(true)?;
    let candidates = load_candidates(db, config.lookback_days, now)?;
    let mut summary = AlertSummary {
        users: users.len(),
        candidates: candidates.len(),
        ..AlertSummary::default()
    };

    for user in &users {
        let (scored, matches) = qualifying_matches(&candidates, user, config, now);
        summary.scored += scored;
        summary.qualified += matches.len();

        for m in &matches {
            match db.upsert_alert(user.id, &m.job.job_id, m.score, &m.reasons, now)? {
                AlertOutcome::Inserted => summary.inserted += 1,
                AlertOutcome::Refreshed => summary.refreshed += 1,
                AlertOutcome::Unchanged => summary.unchanged += 1,
            }
        }
        debug!(user = %user.email, scored, qualified = matches.len(), "matched user");
    }

    info!(
        users = summary.users,
        candidates = summary.candidates,
        new_alerts = summary.inserted,
        refreshed = summary.refreshed,
        "alert pass finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{posting, sample_job, test_db};
    use crate::models::{EmploymentType, RemoteType};

    fn now() -> DateTime<Utc> {
        sample_job("fuzu", "https://x", "t").scraped_at
    }

    fn user(email: &str) -> UserProfile {
        UserProfile {
            email: email.to_string(),
            desired_titles: vec!["Data Analyst".to_string()],
            desired_locations: vec!["Nairobi".to_string()],
            min_salary: Some(100_000),
            preferred_employment_types: vec![EmploymentType::FullTime],
            notification_frequency: "daily".to_string(),
            is_active: true,
            ..UserProfile::default()
        }
    }

    fn seeded() -> Database {
        let mut db = test_db();
        let analyst = sample_job("fuzu", "https://www.fuzu.com/1", "Data Analyst");
        let mut contract = sample_job("fuzu", "https://www.fuzu.com/2", "Data Analyst");
        contract.employment_type = EmploymentType::Contract;
        let cook = sample_job("fuzu", "https://www.fuzu.com/3", "Head Chef");
        let mut stale = sample_job("fuzu", "https://www.fuzu.com/4", "Data Analyst");
        stale.posted_at = Some(now() - Duration::days(40));
        let mut remote = sample_job("remotive", "https://remotive.com/5", "Senior Data Analyst");
        remote.remote_type = RemoteType::Remote;
        remote.location = "Remote".to_string();

        db.upsert_page(&[
            posting(analyst, &["SQL", "Python"]),
            posting(contract, &["SQL"]),
            posting(cook, &[]),
            posting(stale, &["SQL"]),
            posting(remote, &["SQL"]),
        ])
        .unwrap();
        db.upsert_user(&user("a@example.com")).unwrap();
        let mut idle = user("idle@example.com");
        idle.is_active = false;
        db.upsert_user(&idle).unwrap();
        db
    }

    #[test]
    fn test_alert_pass_is_idempotent() {
        let mut db = seeded();
        let config = MatchingConfig::default();

        let first = run_alerts(&mut db, &config, now()).unwrap();
        assert_eq!(first.users, 1);
        assert_eq!(first.candidates, 4);
        assert!(first.inserted >= 1);
        let count = db.alert_count().unwrap();
        assert_eq!(count as usize, first.inserted);

        let second = run_alerts(&mut db, &config, now()).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.refreshed, 0);
        assert_eq!(second.unchanged, first.inserted);
        assert_eq!(db.alert_count().unwrap(), count);
    }

    #[test]
    fn test_only_qualifying_jobs_alert() {
        let mut db = seeded();
        run_alerts(&mut db, &MatchingConfig::default(), now()).unwrap();

        let titles: Vec<(String, EmploymentType)> = db
            .pending_alerts(None, 50)
            .unwrap()
            .into_iter()
            .map(|p| (p.job.title, p.job.employment_type))
            .collect();
        assert!(!titles.is_empty());
        assert!(titles.iter().all(|(t, _)| t.contains("Data Analyst")));
        assert!(titles.iter().all(|(_, e)| *e == EmploymentType::FullTime));
        for alert in db.pending_alerts(None, 50).unwrap() {
            assert!(alert.alert.match_score >= 70.0);
            assert!(alert.job.posted_at.unwrap() >= now() - Duration::days(7));
        }
    }

    #[test]
    fn test_prefilter_never_changes_the_outcome() {
        let mut with = seeded();
        let mut without = seeded();
        let on = MatchingConfig::default();
        let off = MatchingConfig {
            prefilter_employment_types: false,
            ..MatchingConfig::default()
        };
        let a = run_alerts(&mut with, &on, now()).unwrap();
        let b = run_alerts(&mut without, &off, now()).unwrap();
        assert!(a.scored < b.scored);
        assert_eq!(a.inserted, b.inserted);

        let key = |db: &Database| -> Vec<(String, f64, Vec<String>)> {
            db.pending_alerts(None, 50)
                .unwrap()
                .into_iter()
                .map(|p| (p.job.job_id, p.alert.match_score, p.alert.match_reasons))
                .collect()
        };
        assert_eq!(key(&with), key(&without));
    }

    #[test]
    fn test_lower_threshold_refreshes_nothing_but_adds_more() {
        let mut db = seeded();
        let strict = run_alerts(&mut db, &MatchingConfig::default(), now()).unwrap();
        let loose = MatchingConfig {
            min_score: 40.0,
            ..MatchingConfig::default()
        };
        let relaxed = run_alerts(&mut db, &loose, now()).unwrap();
        assert_eq!(relaxed.unchanged, strict.inserted);
        assert!(relaxed.inserted >= 1);
    }

    #[test]
    fn test_rank_for_user_orders_all_candidates() {
        let db = seeded();
        let candidates = load_candidates(&db, 7, now()).unwrap();
        let ranked = rank_for_user(&candidates, &user("a@example.com"), now());
        assert_eq!(ranked.len(), candidates.len());
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(ranked.last().map(|m| m.job.title.as_str()), Some("Head Chef"));
    }
}
