use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{Config, FetchConfig, SourceConfig};
use crate::db::Database;
use crate::extract::{Extraction, SkillExtractor};
use crate::fetch::FetchEngine;
use crate::identity::{self, IngestCounts};
use crate::models::{Job, JobSkill, Posting, RawPosting, RunStatus};
use crate::sources::{split_location, SourceAdapter, SourceKind};
use crate::vocabulary::Vocabulary;

/// Parsed pages that may wait for the store before the adapter pauses.
const PAGE_BUFFER: usize = 4;

/// Outcome of one source's run, as sealed in its scraping log.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub kind: SourceKind,
    pub log_id: i64,
    pub status: RunStatus,
    pub counts: IngestCounts,
    pub requests: u32,
    pub skipped_records: u32,
    pub error: Option<String>,
}

pub struct Pipeline {
    config: Config,
    engine: Arc<FetchEngine>,
    extractor: Arc<SkillExtractor>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let vocabulary = Vocabulary::from_config(&config.vocabulary)
            .context("Invalid [vocabulary] section")?;
        debug!(skills = vocabulary.len(), "vocabulary loaded");
        let extractor = SkillExtractor::new(vocabulary)?;
        let engine = FetchEngine::new(&config.fetch)?;
        Ok(Self {
            config,
            engine: Arc::new(engine),
            extractor: Arc::new(extractor),
        })
    }

    pub fn extractor(&self) -> &SkillExtractor {
        &self.extractor
    }

    /// Enabled sources, or exactly the requested kinds. A requested kind with
    /// no configuration entry runs with bare defaults.
    pub fn selected_sources(&self, only: &[SourceKind]) -> Vec<SourceConfig> {
        if only.is_empty() {
            return self.config.enabled_sources().cloned().collect();
        }
        only.iter()
            .map(|kind| {
                self.config
                    .sources
                    .iter()
                    .find(|s| s.kind == *kind)
                    .cloned()
                    .unwrap_or_else(|| SourceConfig::new(*kind))
            })
            .collect()
    }

    /// Runs one worker per source concurrently. Each worker writes through
    /// its own connection and seals its own scraping log, so one source
    /// failing never affects the others.
    pub async fn scrape(
        &self,
        db: &Database,
        only: &[SourceKind],
        deadline: Option<Duration>,
    ) -> Result<Vec<SourceReport>> {
        let deadline = deadline
            .or(self.config.pipeline.deadline_secs.map(Duration::from_secs))
            .map(|d| Instant::now() + d);
        let sources = self.selected_sources(only);

        let mut workers = JoinSet::new();
        for source in sources {
            let worker = Worker {
                fetch: self.config.fetch.clone(),
                engine: Arc::clone(&self.engine),
                extractor: Arc::clone(&self.extractor),
                db: Arc::new(Mutex::new(db.reopen()?)),
                progress: Arc::default(),
                source,
            };
            workers.spawn(worker.run(deadline));
        }

        let mut reports = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(report)) => reports.push(report),
                Ok(Err(e)) => error!(error = %format!("{e:#}"), "source worker failed"),
                Err(e) => error!(error = %e, "source worker panicked"),
            }
        }

        let order = |kind: SourceKind| SourceKind::ALL.iter().position(|k| *k == kind);
        reports.sort_by_key(|r| order(r.kind));
        Ok(reports)
    }
}

/// Runs a store call on the blocking pool so lock waits never stall the
/// runtime. A poisoned lock is still usable: every write is its own
/// transaction.
async fn with_store<T, F>(db: &Arc<Mutex<Database>>, f: F) -> Result<T>
where
    F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || {
        let mut guard = db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    })
    .await
    .context("Store task aborted")?
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    counts: IngestCounts,
    requests: u32,
    skipped_records: u32,
}

struct Worker {
    fetch: FetchConfig,
    engine: Arc<FetchEngine>,
    extractor: Arc<SkillExtractor>,
    db: Arc<Mutex<Database>>,
    progress: Arc<Mutex<Progress>>,
    source: SourceConfig,
}

impl Worker {
    /// Owns the scraping log. Ingestion runs in its own task, so even a
    /// panic there leaves committed pages in place and the log sealed.
    async fn run(self, deadline: Option<Instant>) -> Result<SourceReport> {
        let kind = self.source.kind;
        let db = Arc::clone(&self.db);
        let progress = Arc::clone(&self.progress);
        let log_id = with_store(&db, move |db| db.start_scraping_log(kind.as_str(), Utc::now())).await?;
        info!(source = %kind, log_id, "scrape started");

        let failure = match tokio::spawn(self.ingest(deadline)).await {
            Ok(Ok(failure)) => failure,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(e) => {
                error!(source = %kind, error = %e, "ingestion aborted");
                Some(format!("ingestion aborted: {e}"))
            }
        };
        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        let progress = *progress.lock().unwrap_or_else(PoisonError::into_inner);

        let reason = failure.clone();
        with_store(&db, move |db| {
            db.finish_scraping_log(log_id, status, progress.counts, reason.as_deref(), Utc::now())
        })
        .await?;

        match &failure {
            Some(reason) => warn!(
                source = %kind,
                scraped = progress.counts.scraped,
                new = progress.counts.new,
                updated = progress.counts.updated,
                reason = %reason,
                "scrape failed"
            ),
            None => info!(
                source = %kind,
                scraped = progress.counts.scraped,
                new = progress.counts.new,
                updated = progress.counts.updated,
                "scrape completed"
            ),
        }

        Ok(SourceReport {
            kind,
            log_id,
            status,
            counts: progress.counts,
            requests: progress.requests,
            skipped_records: progress.skipped_records,
            error: failure,
        })
    }

    /// Stores each page while the adapter fetches the next one. Returns the
    /// reason the run should be recorded as failed, if any.
    async fn ingest(self, deadline: Option<Instant>) -> Result<Option<String>> {
        let kind = self.source.kind;
        let (pages_tx, mut pages_rx) = mpsc::channel::<Vec<RawPosting>>(PAGE_BUFFER);
        let adapter = SourceAdapter::new(&self.source, &self.fetch, Arc::clone(&self.engine))?
            .with_page_sink(pages_tx);
        let keywords = self.source.keywords.clone();
        let locations = self.source.locations.clone();
        let fetching = tokio::spawn(async move { adapter.run(&keywords, &locations, deadline).await });

        let mut page = 0;
        while let Some(raw) = pages_rx.recv().await {
            page += 1;
            let now = Utc::now();
            let postings: Vec<Posting> = raw
                .iter()
                .map(|r| normalize(r, &self.source, &self.extractor, now))
                .collect();
            let counts = match with_store(&self.db, move |db| db.upsert_page(&postings)).await {
                Ok(counts) => counts,
                Err(e) => {
                    fetching.abort();
                    return Err(e);
                }
            };
            debug!(source = %kind, page, new = counts.new, updated = counts.updated, "page stored");
            self.progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .counts
                .merge(counts);
        }

        let run = fetching.await.context("Adapter task aborted")??;
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.requests = run.requests;
        progress.skipped_records = run.skipped_records;
        Ok(run.failure())
    }
}

/// Turns a scraped posting into the canonical job row plus its skills.
pub fn normalize(
    raw: &RawPosting,
    source: &SourceConfig,
    extractor: &SkillExtractor,
    now: DateTime<Utc>,
) -> Posting {
    let kind = source.kind;
    let extraction = extractor.extract(
        &raw.title,
        &raw.raw_text,
        &raw.location,
        raw.salary_text.as_deref(),
    );

    let default_country = source.country.as_deref().or(kind.default_country());
    let (city, country) = split_location(&raw.location, default_country);

    let salary = &extraction.salary;
    let has_salary = salary.min.is_some() || salary.max.is_some();
    let currency = salary.currency.clone().or_else(|| {
        has_salary
            .then(|| source.currency.clone().or(kind.default_currency().map(String::from)))
            .flatten()
    });

    let job_id = identity::job_id(&raw.source, &raw.source_url);
    let skills = job_skills(&job_id, &extraction, extractor.vocabulary());
    let company = raw.company_name.trim();

    Posting {
        job: Job {
            job_id,
            source: raw.source.clone(),
            source_url: raw.source_url.clone(),
            title: raw.title.trim().to_string(),
            company_id: None,
            company_name: (!company.is_empty()).then(|| company.to_string()),
            location: raw.location.trim().to_string(),
            country,
            city,
            remote_type: extraction.remote_type,
            salary_min: salary.min,
            salary_max: salary.max,
            salary_currency: currency,
            employment_type: extraction.employment_type,
            experience_level: extraction.experience_level,
            description: raw.raw_text.clone(),
            posted_at: raw.posted_at,
            first_seen_at: now,
            scraped_at: now,
            is_active: true,
        },
        skills,
    }
}

fn job_skills(job_id: &str, extraction: &Extraction, vocabulary: &Vocabulary) -> Vec<JobSkill> {
    extraction
        .skills
        .iter()
        .map(|name| JobSkill {
            job_id: job_id.to_string(),
            skill: name.clone(),
            category: vocabulary.category_of(name).to_string(),
            years_required: extraction.years_required.get(name).copied(),
        })
        .collect()
}

/// Re-runs extraction over every active job's stored text and replaces its
/// derived fields and skills. A salary found earlier in the listing's salary
/// text is kept when the description alone yields none.
pub fn reextract(db: &mut Database, extractor: &SkillExtractor) -> Result<usize> {
    let stored = db.stored_postings()?;
    let total = stored.len();

    for Posting { mut job, .. } in stored {
        let extraction = extractor.extract(&job.title, &job.description, &job.location, None);
        job.experience_level = extraction.experience_level;
        job.employment_type = extraction.employment_type;
        job.remote_type = extraction.remote_type;
        if extraction.salary.min.is_some() || extraction.salary.max.is_some() {
            job.salary_min = extraction.salary.min;
            job.salary_max = extraction.salary.max;
            if extraction.salary.currency.is_some() {
                job.salary_currency = extraction.salary.currency.clone();
            }
        }
        let skills = job_skills(&job.job_id, &extraction, extractor.vocabulary());
        db.update_derived(&Posting { job, skills })?;
    }

    info!(jobs = total, "re-extraction finished");
    Ok(total)
}
