use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::identity::{IngestCounts, UpsertOutcome};
use crate::models::{
    EmploymentType, ExperienceLevel, Job, JobAlert, JobSkill, PendingAlert, Posting, RemoteType,
    RunStatus, ScrapingLog, SkillCount, UserProfile,
};

/// Attempts for a write that loses a lock or uniqueness race to another connection.
const MAX_WRITE_ATTEMPTS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Inserted,
    /// Unsent, unopened alert whose score or reasons changed.
    Refreshed,
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub source: Option<String>,
    pub active_only: bool,
    /// Only jobs posted (or, lacking a date, first seen) at or after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

const JOB_COLUMNS: &str = "j.job_id, j.source, j.source_url, j.title, j.company_id, c.name,
    j.location, j.country, j.city, j.remote_type, j.salary_min, j.salary_max,
    j.salary_currency, j.employment_type, j.experience_level, j.description,
    j.posted_at, j.first_seen_at, j.scraped_at, j.is_active";

const JOB_COLUMN_COUNT: usize = 20;

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // journal_mode answers with a row, so it cannot go through execute
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    /// A second connection to the same file, for a worker that writes concurrently.
    pub fn reopen(&self) -> Result<Self> {
        if self.path == Path::new(":memory:") {
            return Err(anyhow!("An in-memory database cannot be shared between workers"));
        }
        Self::open(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `JOBINTEL_DB`, else the platform data directory.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os("JOBINTEL_DB") {
            return PathBuf::from(path);
        }
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobintel") {
            proj_dirs.data_dir().join("jobintel.db")
        } else {
            PathBuf::from("jobintel.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                website TEXT,
                industry TEXT,
                notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                source_url TEXT NOT NULL,
                title TEXT NOT NULL,
                company_id INTEGER REFERENCES companies(id),
                location TEXT NOT NULL DEFAULT '',
                country TEXT,
                city TEXT,
                remote_type TEXT NOT NULL DEFAULT 'on-site' CHECK (remote_type IN ('on-site', 'hybrid', 'remote')),
                salary_min INTEGER,
                salary_max INTEGER,
                salary_currency TEXT,
                employment_type TEXT NOT NULL DEFAULT 'full-time' CHECK (employment_type IN ('full-time', 'part-time', 'contract', 'internship')),
                experience_level TEXT NOT NULL DEFAULT 'mid' CHECK (experience_level IN ('entry', 'mid', 'senior', 'manager')),
                description TEXT NOT NULL DEFAULT '',
                posted_at TEXT,
                first_seen_at TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                category TEXT NOT NULL DEFAULT 'Other'
            );

            CREATE TABLE IF NOT EXISTS job_skills (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL REFERENCES jobs(job_id),
                skill_id INTEGER NOT NULL REFERENCES skills(id),
                years_required INTEGER,
                UNIQUE (job_id, skill_id)
            );

            CREATE TABLE IF NOT EXISTS user_profiles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                full_name TEXT,
                desired_titles TEXT NOT NULL DEFAULT '[]',
                desired_locations TEXT NOT NULL DEFAULT '[]',
                desired_remote_type TEXT,
                min_salary INTEGER,
                preferred_employment_types TEXT NOT NULL DEFAULT '[]',
                skills TEXT NOT NULL DEFAULT '[]',
                notification_frequency TEXT NOT NULL DEFAULT 'daily',
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS job_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES user_profiles(id),
                job_id TEXT NOT NULL REFERENCES jobs(job_id),
                match_score REAL NOT NULL,
                match_reasons TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                sent_at TEXT,
                was_opened INTEGER NOT NULL DEFAULT 0,
                UNIQUE (user_id, job_id)
            );

            CREATE TABLE IF NOT EXISTS scraping_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL DEFAULT 'running' CHECK (status IN ('running', 'completed', 'failed')),
                jobs_scraped INTEGER NOT NULL DEFAULT 0,
                jobs_new INTEGER NOT NULL DEFAULT 0,
                jobs_updated INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_source ON jobs(source);
            CREATE INDEX IF NOT EXISTS idx_jobs_posted ON jobs(posted_at);
            CREATE INDEX IF NOT EXISTS idx_job_skills_skill ON job_skills(skill_id);
            CREATE INDEX IF NOT EXISTS idx_alerts_pending ON job_alerts(sent_at, user_id);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!("Database not initialized. Run 'jobintel init' first."));
        }
        Ok(())
    }

    /// Runs `op` in an immediate transaction, retrying when another connection
    /// holds the write lock or wins a uniqueness race.
    fn write<T>(
        &mut self,
        what: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .and_then(|tx| {
                    let value = op(&tx)?;
                    tx.commit()?;
                    Ok(value)
                });
            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_write_conflict(&e) && attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(what, attempt, error = %e, "write conflict, retrying");
                    std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to {what}")),
            }
        }
    }

    pub fn company_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM companies", [], |row| row.get(0))?)
    }

    // --- Ingest ---

    /// Upserts one page of postings atomically.
    pub fn upsert_page(&mut self, postings: &[Posting]) -> Result<IngestCounts> {
        self.write("upsert page", |conn| {
            let mut counts = IngestCounts::default();
            for posting in postings {
                counts.record(upsert_posting(conn, posting)?);
            }
            Ok(counts)
        })
    }

    /// Rewrites the derived attributes and skills of a stored job without
    /// touching its sighting timestamps.
    pub fn update_derived(&mut self, posting: &Posting) -> Result<()> {
        self.write("update derived fields", |conn| {
            let job = &posting.job;
            conn.execute(
                "UPDATE jobs SET remote_type = ?1, employment_type = ?2, experience_level = ?3,
                        salary_min = ?4, salary_max = ?5, salary_currency = ?6
                 WHERE job_id = ?7",
                params![
                    job.remote_type.as_str(),
                    job.employment_type.as_str(),
                    job.experience_level.as_str(),
                    job.salary_min,
                    job.salary_max,
                    job.salary_currency,
                    job.job_id,
                ],
            )?;
            replace_skills(conn, &job.job_id, &posting.skills)
        })
    }

    // --- Job reads ---

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs j LEFT JOIN companies c ON j.company_id = c.id
             WHERE j.job_id = ?1"
        );
        Ok(self
            .conn
            .query_row(&sql, [job_id], |row| row_to_job(row, 0))
            .optional()?)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs j LEFT JOIN companies c ON j.company_id = c.id
             WHERE (?1 IS NULL OR j.source = ?1)
               AND (?2 = 0 OR j.is_active = 1)
               AND (?3 IS NULL OR COALESCE(j.posted_at, j.first_seen_at) >= ?3)
             ORDER BY COALESCE(j.posted_at, j.first_seen_at) DESC, j.job_id"
        );
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![filter.source, filter.active_only, filter.since],
            |row| row_to_job(row, 0),
        )?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list jobs")
    }

    /// Active jobs with their current skills, for the re-extraction pass.
    pub fn stored_postings(&self) -> Result<Vec<Posting>> {
        let jobs = self.list_jobs(&JobFilter {
            active_only: true,
            ..JobFilter::default()
        })?;
        jobs.into_iter()
            .map(|job| {
                let skills = self.job_skills(&job.job_id)?;
                Ok(Posting { job, skills })
            })
            .collect()
    }

    pub fn job_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?)
    }

    pub fn job_skills(&self, job_id: &str) -> Result<Vec<JobSkill>> {
        let mut stmt = self.conn.prepare(
            "SELECT js.job_id, s.name, s.category, js.years_required
             FROM job_skills js JOIN skills s ON js.skill_id = s.id
             WHERE js.job_id = ?1 ORDER BY s.name",
        )?;
        let rows = stmt.query_map([job_id], |row| {
            Ok(JobSkill {
                job_id: row.get(0)?,
                skill: row.get(1)?,
                category: row.get(2)?,
                years_required: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to load job skills")
    }

    /// Skills ranked by how many active jobs ask for them.
    pub fn skill_counts(&self, limit: usize) -> Result<Vec<SkillCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.name, s.category, COUNT(j.job_id) AS jobs
             FROM skills s
             JOIN job_skills js ON js.skill_id = s.id
             JOIN jobs j ON j.job_id = js.job_id AND j.is_active = 1
             GROUP BY s.id
             ORDER BY jobs DESC, s.name
             LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(SkillCount {
                name: row.get(0)?,
                category: row.get(1)?,
                jobs: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to count skills")
    }

    // --- Users ---

    /// Inserts or replaces a profile keyed by email; returns its id.
    pub fn upsert_user(&mut self, user: &UserProfile) -> Result<i64> {
        let titles = serde_json::to_string(&user.desired_titles)?;
        let locations = serde_json::to_string(&user.desired_locations)?;
        let employment = serde_json::to_string(&user.preferred_employment_types)?;
        let skills = serde_json::to_string(&user.skills)?;
        let remote = user.desired_remote_type.map(|r| r.as_str());

        self.write("save user profile", |conn| {
            conn.execute(
                "INSERT INTO user_profiles (email, full_name, desired_titles, desired_locations,
                        desired_remote_type, min_salary, preferred_employment_types, skills,
                        notification_frequency, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(email) DO UPDATE SET
                    full_name = excluded.full_name,
                    desired_titles = excluded.desired_titles,
                    desired_locations = excluded.desired_locations,
                    desired_remote_type = excluded.desired_remote_type,
                    min_salary = excluded.min_salary,
                    preferred_employment_types = excluded.preferred_employment_types,
                    skills = excluded.skills,
                    notification_frequency = excluded.notification_frequency,
                    is_active = excluded.is_active",
                params![
                    user.email.trim(),
                    user.full_name,
                    titles,
                    locations,
                    remote,
                    user.min_salary,
                    employment,
                    skills,
                    user.notification_frequency,
                    user.is_active,
                ],
            )?;
            conn.query_row(
                "SELECT id FROM user_profiles WHERE email = ?1",
                [user.email.trim()],
                |row| row.get(0),
            )
        })
    }

    pub fn list_users(&self, active_only: bool) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, full_name, desired_titles, desired_locations, desired_remote_type,
                    min_salary, preferred_employment_types, skills, notification_frequency, is_active
             FROM user_profiles WHERE (?1 = 0 OR is_active = 1) ORDER BY id",
        )?;
        let rows = stmt.query_map([active_only], row_to_user)?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list users")
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserProfile>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, email, full_name, desired_titles, desired_locations, desired_remote_type,
                        min_salary, preferred_employment_types, skills, notification_frequency, is_active
                 FROM user_profiles WHERE id = ?1",
                [id],
                row_to_user,
            )
            .optional()?)
    }

    // --- Alerts ---

    /// One alert per (user, job). A repeat decision refreshes the score of an
    /// alert that has been neither sent nor opened, and otherwise changes nothing.
    pub fn upsert_alert(
        &mut self,
        user_id: i64,
        job_id: &str,
        score: f64,
        reasons: &[String],
        now: DateTime<Utc>,
    ) -> Result<AlertOutcome> {
        let reasons = serde_json::to_string(reasons)?;
        self.write("upsert alert", |conn| {
            let inserted = conn.execute(
                "INSERT INTO job_alerts (user_id, job_id, match_score, match_reasons, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, job_id) DO NOTHING",
                params![user_id, job_id, score, reasons, now],
            )?;
            if inserted == 1 {
                return Ok(AlertOutcome::Inserted);
            }
            let refreshed = conn.execute(
                "UPDATE job_alerts SET match_score = ?3, match_reasons = ?4
                 WHERE user_id = ?1 AND job_id = ?2 AND sent_at IS NULL AND was_opened = 0
                   AND (match_score <> ?3 OR match_reasons <> ?4)",
                params![user_id, job_id, score, reasons],
            )?;
            Ok(if refreshed == 1 {
                AlertOutcome::Refreshed
            } else {
                AlertOutcome::Unchanged
            })
        })
    }

    pub fn alert_count(&self) -> Result<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM job_alerts", [], |row| row.get(0))?)
    }

    pub fn get_alert(&self, id: i64) -> Result<Option<JobAlert>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, job_id, match_score, match_reasons, created_at, sent_at, was_opened
                 FROM job_alerts WHERE id = ?1",
                [id],
                row_to_alert,
            )
            .optional()?)
    }

    /// Unsent alerts of active users, best match first.
    pub fn pending_alerts(&self, user_id: Option<i64>, limit: usize) -> Result<Vec<PendingAlert>> {
        let sql = format!(
            "SELECT a.id, a.user_id, a.job_id, a.match_score, a.match_reasons, a.created_at,
                    a.sent_at, a.was_opened, {JOB_COLUMNS}, u.email, u.notification_frequency
             FROM job_alerts a
             JOIN user_profiles u ON u.id = a.user_id AND u.is_active = 1
             JOIN jobs j ON j.job_id = a.job_id
             LEFT JOIN companies c ON j.company_id = c.id
             WHERE a.sent_at IS NULL AND (?1 IS NULL OR a.user_id = ?1)
             ORDER BY a.match_score DESC, a.created_at, a.id
             LIMIT ?2"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            let base = 8 + JOB_COLUMN_COUNT;
            Ok(PendingAlert {
                alert: row_to_alert(row)?,
                job: row_to_job(row, 8)?,
                user_email: row.get(base)?,
                notification_frequency: row.get(base + 1)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to load pending alerts")
    }

    /// Called by the notification transport after delivery. Returns false if
    /// the alert was already marked.
    pub fn mark_alert_sent(&mut self, alert_id: i64, at: DateTime<Utc>) -> Result<bool> {
        self.write("mark alert sent", |conn| {
            conn.execute(
                "UPDATE job_alerts SET sent_at = ?2 WHERE id = ?1 AND sent_at IS NULL",
                params![alert_id, at],
            )
        })
        .map(|changed| changed == 1)
    }

    pub fn mark_alert_opened(&mut self, alert_id: i64) -> Result<bool> {
        self.write("mark alert opened", |conn| {
            conn.execute(
                "UPDATE job_alerts SET was_opened = 1 WHERE id = ?1 AND was_opened = 0",
                [alert_id],
            )
        })
        .map(|changed| changed == 1)
    }

    // --- Scraping logs ---

    pub fn start_scraping_log(&mut self, source: &str, at: DateTime<Utc>) -> Result<i64> {
        self.write("start scraping log", |conn| {
            conn.execute(
                "INSERT INTO scraping_logs (source, started_at, status) VALUES (?1, ?2, 'running')",
                params![source, at],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Seals a running log. A log is sealed once; later calls are ignored and return false.
    pub fn finish_scraping_log(
        &mut self,
        id: i64,
        status: RunStatus,
        counts: IngestCounts,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.write("seal scraping log", |conn| {
            conn.execute(
                "UPDATE scraping_logs
                 SET status = ?2, jobs_scraped = ?3, jobs_new = ?4, jobs_updated = ?5,
                     error_message = ?6, completed_at = ?7
                 WHERE id = ?1 AND status = 'running'",
                params![
                    id,
                    status.as_str(),
                    counts.scraped,
                    counts.new,
                    counts.updated,
                    error,
                    at
                ],
            )
        })
        .map(|changed| changed == 1)
    }

    pub fn scraping_logs(&self, limit: usize) -> Result<Vec<ScrapingLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, source, started_at, completed_at, status, jobs_scraped, jobs_new,
                    jobs_updated, error_message
             FROM scraping_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            let status: String = row.get(4)?;
            Ok(ScrapingLog {
                id: row.get(0)?,
                source: row.get(1)?,
                started_at: row.get(2)?,
                completed_at: row.get(3)?,
                status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
                jobs_scraped: row.get(5)?,
                jobs_new: row.get(6)?,
                jobs_updated: row.get(7)?,
                error_message: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().context("Failed to list scraping logs")
    }
}

fn is_write_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::ConstraintViolation
            )
    )
}

fn company_id(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.execute("INSERT OR IGNORE INTO companies (name) VALUES (?1)", [name])?;
    conn.query_row("SELECT id FROM companies WHERE name = ?1", [name], |row| row.get(0))
}

fn skill_id(conn: &Connection, name: &str, category: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO skills (name, category) VALUES (?1, ?2)",
        [name, category],
    )?;
    conn.query_row("SELECT id FROM skills WHERE name = ?1", [name], |row| row.get(0))
}

fn replace_skills(conn: &Connection, job_id: &str, skills: &[JobSkill]) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM job_skills WHERE job_id = ?1", [job_id])?;
    for skill in skills {
        let id = skill_id(conn, &skill.skill, &skill.category)?;
        conn.execute(
            "INSERT OR REPLACE INTO job_skills (job_id, skill_id, years_required) VALUES (?1, ?2, ?3)",
            params![job_id, id, skill.years_required],
        )?;
    }
    Ok(())
}

fn upsert_posting(conn: &Connection, posting: &Posting) -> rusqlite::Result<UpsertOutcome> {
    let job = &posting.job;
    let company = match job.company_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Some(company_id(conn, name)?),
        _ => None,
    };

    let inserted = conn.execute(
        "INSERT INTO jobs (job_id, source, source_url, title, company_id, location, country, city,
                remote_type, salary_min, salary_max, salary_currency, employment_type,
                experience_level, description, posted_at, first_seen_at, scraped_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, 1)
         ON CONFLICT(job_id) DO NOTHING",
        params![
            job.job_id,
            job.source,
            job.source_url,
            job.title,
            company,
            job.location,
            job.country,
            job.city,
            job.remote_type.as_str(),
            job.salary_min,
            job.salary_max,
            job.salary_currency,
            job.employment_type.as_str(),
            job.experience_level.as_str(),
            job.description,
            job.posted_at,
            job.first_seen_at,
            job.scraped_at,
        ],
    )?;

    let outcome = if inserted == 1 {
        UpsertOutcome::Inserted
    } else {
        conn.execute(
            "UPDATE jobs SET title = ?2, company_id = ?3, location = ?4, country = ?5, city = ?6,
                    remote_type = ?7, salary_min = ?8, salary_max = ?9, salary_currency = ?10,
                    employment_type = ?11, experience_level = ?12, description = ?13,
                    posted_at = COALESCE(?14, posted_at), scraped_at = ?15, is_active = 1
             WHERE job_id = ?1",
            params![
                job.job_id,
                job.title,
                company,
                job.location,
                job.country,
                job.city,
                job.remote_type.as_str(),
                job.salary_min,
                job.salary_max,
                job.salary_currency,
                job.employment_type.as_str(),
                job.experience_level.as_str(),
                job.description,
                job.posted_at,
                job.scraped_at,
            ],
        )?;
        UpsertOutcome::Updated
    };

    replace_skills(conn, &job.job_id, &posting.skills)?;
    debug!(job_id = %job.job_id, ?outcome, "upserted job");
    Ok(outcome)
}

fn row_to_job(row: &Row, offset: usize) -> rusqlite::Result<Job> {
    let at = |i: usize| offset + i;
    let remote: String = row.get(at(9))?;
    let employment: String = row.get(at(13))?;
    let level: String = row.get(at(14))?;
    Ok(Job {
        job_id: row.get(at(0))?,
        source: row.get(at(1))?,
        source_url: row.get(at(2))?,
        title: row.get(at(3))?,
        company_id: row.get(at(4))?,
        company_name: row.get(at(5))?,
        location: row.get(at(6))?,
        country: row.get(at(7))?,
        city: row.get(at(8))?,
        remote_type: RemoteType::parse(&remote).unwrap_or(RemoteType::OnSite),
        salary_min: row.get(at(10))?,
        salary_max: row.get(at(11))?,
        salary_currency: row.get(at(12))?,
        employment_type: EmploymentType::parse(&employment).unwrap_or(EmploymentType::FullTime),
        experience_level: ExperienceLevel::parse(&level).unwrap_or(ExperienceLevel::Mid),
        description: row.get(at(15))?,
        posted_at: row.get(at(16))?,
        first_seen_at: row.get(at(17))?,
        scraped_at: row.get(at(18))?,
        is_active: row.get(at(19))?,
    })
}

fn row_to_alert(row: &Row) -> rusqlite::Result<JobAlert> {
    let reasons: String = row.get(4)?;
    Ok(JobAlert {
        id: row.get(0)?,
        user_id: row.get(1)?,
        job_id: row.get(2)?,
        match_score: row.get(3)?,
        match_reasons: serde_json::from_str(&reasons).unwrap_or_default(),
        created_at: row.get(5)?,
        sent_at: row.get(6)?,
        was_opened: row.get(7)?,
    })
}

fn json_list<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Vec<T>> {
    let text: String = row.get(idx)?;
    Ok(serde_json::from_str(&text).unwrap_or_default())
}

fn row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    let remote: Option<String> = row.get(5)?;
    Ok(UserProfile {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        desired_titles: json_list(row, 3)?,
        desired_locations: json_list(row, 4)?,
        desired_remote_type: remote.as_deref().and_then(RemoteType::parse),
        min_salary: row.get(6)?,
        preferred_employment_types: json_list(row, 7)?,
        skills: json_list(row, 8)?,
        notification_frequency: row.get(9)?,
        is_active: row.get(10)?,
    })
}
