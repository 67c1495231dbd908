mod alerts;
mod config;
mod db;
mod extract;
mod fetch;
mod identity;
mod matching;
mod models;
mod pipeline;
mod sources;
mod vocabulary;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Config;
use db::{Database, JobFilter};
use models::{Job, RunStatus, UserProfile};
use pipeline::Pipeline;
use sources::SourceKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobintel")]
#[command(about = "Job market intelligence - scrape boards, extract skills, match and alert")]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (default: $JOBINTEL_DB or platform data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Scrape job boards
    Scrape {
        /// Only these sources (fuzu, brightermonday, indeed, remotive, arbeitnow, remoteok)
        #[arg(short, long = "source")]
        sources: Vec<String>,

        /// Abort remaining page fetches after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Re-run skill and attribute extraction over stored jobs
    Extract,

    /// Score jobs for every active user and record alerts
    Match {
        /// Minimum match score (0-100)
        #[arg(long)]
        min_score: Option<f64>,

        /// Only consider jobs from the last N days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Show jobs ranked for one user
    Rank {
        /// User ID
        #[arg(short, long)]
        user: i64,

        /// Number of jobs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Only consider jobs from the last N days
        #[arg(long)]
        days: Option<i64>,
    },

    /// List stored jobs
    Jobs {
        /// Filter by source
        #[arg(short, long)]
        source: Option<String>,

        /// Number of jobs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Show job details
    Show {
        /// Job ID
        job_id: String,
    },

    /// Most requested skills across active jobs
    Skills {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List alerts waiting to be sent
    Alerts {
        /// Only this user's alerts
        #[arg(short, long)]
        user: Option<i64>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Mark an alert as delivered
    AlertsSent {
        /// Alert ID
        id: i64,
    },

    /// Mark an alert as opened by its recipient
    AlertsOpened {
        /// Alert ID
        id: i64,
    },

    /// Manage user profiles
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Show recent scraping runs
    Logs {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Import profiles from a JSON file (one object or an array)
    Import {
        file: PathBuf,
    },

    /// List user profiles
    List,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobintel=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let db_path = cli.db.clone().unwrap_or_else(Database::default_path);
    let mut db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Scrape {
            sources,
            deadline_secs,
        } => {
            db.ensure_initialized()?;
            let kinds = sources
                .iter()
                .map(|s| SourceKind::parse(s).ok_or_else(|| anyhow!("Unknown source '{}'", s)))
                .collect::<Result<Vec<_>>>()?;

            let pipeline = Pipeline::new(config)?;
            let deadline = deadline_secs.map(std::time::Duration::from_secs);
            let reports = pipeline.scrape(&db, &kinds, deadline).await?;

            println!(
                "{:<6} {:<15} {:<10} {:>5} {:>8} {:>6} {:>8} {:>8}  {}",
                "LOG", "SOURCE", "STATUS", "REQS", "SCRAPED", "NEW", "UPDATED", "SKIPPED", "ERROR"
            );
            println!("{}", "-".repeat(90));
            for r in &reports {
                println!(
                    "{:<6} {:<15} {:<10} {:>5} {:>8} {:>6} {:>8} {:>8}  {}",
                    r.log_id,
                    r.kind,
                    r.status,
                    r.requests,
                    r.counts.scraped,
                    r.counts.new,
                    r.counts.updated,
                    r.skipped_records,
                    r.error.as_deref().unwrap_or("")
                );
            }
            let failed = reports.iter().filter(|r| r.status == RunStatus::Failed).count();
            if failed > 0 {
                println!("\n{} of {} source(s) failed; see 'jobintel logs'.", failed, reports.len());
            }
        }

        Commands::Extract => {
            db.ensure_initialized()?;
            let pipeline = Pipeline::new(config)?;
            let count = pipeline::reextract(&mut db, pipeline.extractor())?;
            println!("Re-extracted {} job(s).", count);
        }

        Commands::Match { min_score, days } => {
            db.ensure_initialized()?;
            let mut matching = config.matching.clone();
            if let Some(min_score) = min_score {
                matching.min_score = min_score;
            }
            if let Some(days) = days {
                matching.lookback_days = days;
            }
            let summary = alerts::run_alerts(&mut db, &matching, Utc::now())?;
            println!("Users matched:   {}", summary.users);
            println!("Candidate jobs:  {}", summary.candidates);
            println!("Scored:          {}", summary.scored);
            println!("Qualifying:      {}", summary.qualified);
            println!("New alerts:      {}", summary.inserted);
            println!("Refreshed:       {}", summary.refreshed);
            println!("Unchanged:       {}", summary.unchanged);
            println!("Total alerts:    {}", db.alert_count()?);
        }

        Commands::Rank { user, limit, days } => {
            db.ensure_initialized()?;
            let profile = db
                .get_user(user)?
                .ok_or_else(|| anyhow!("User #{} not found", user))?;
            let now = Utc::now();
            let candidates =
                alerts::load_candidates(&db, days.unwrap_or(config.matching.lookback_days), now)?;
            let ranked = alerts::rank_for_user(&candidates, &profile, now);
            if ranked.is_empty() {
                println!("No jobs to rank.");
            } else {
                println!(
                    "{:<5} {:<34} {:<20} {:>7}  {:<24}  {}",
                    "RANK", "TITLE", "COMPANY", "SCORE", "TTL LOC SAL SKL REC", "REASONS"
                );
                println!("{}", "-".repeat(120));
                for (i, m) in ranked.iter().take(limit).enumerate() {
                    let b = &m.breakdown;
                    println!(
                        "{:<5} {:<34} {:<20} {:>7.2}  {:.1} {:.1} {:.1} {:.1} {:.1}  {}",
                        i + 1,
                        truncate(&m.job.title, 32),
                        truncate(m.job.company_name.as_deref().unwrap_or_default(), 18),
                        m.score,
                        b.title,
                        b.location,
                        b.salary,
                        b.skills,
                        b.recency,
                        m.reasons.join("; ")
                    );
                }
            }
        }

        Commands::Jobs { source, limit } => {
            db.ensure_initialized()?;
            let jobs = db.list_jobs(&JobFilter {
                source,
                active_only: false,
                since: None,
                limit: Some(limit),
            })?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!(
                    "{:<12} {:<14} {:<32} {:<20} {:<8} {:>16}",
                    "ID", "SOURCE", "TITLE", "COMPANY", "REMOTE", "PAY"
                );
                println!("{}", "-".repeat(107));
                for job in &jobs {
                    println!(
                        "{:<12} {:<14} {:<32} {:<20} {:<8} {:>16}",
                        &job.job_id[..job.job_id.len().min(10)],
                        job.source,
                        truncate(&job.title, 30),
                        truncate(job.company_name.as_deref().unwrap_or_default(), 18),
                        job.remote_type,
                        short_pay(job)
                    );
                }
                println!(
                    "\n{} job(s) stored from {} compan(ies).",
                    db.job_count()?,
                    db.company_count()?
                );
            }
        }

        Commands::Show { job_id } => {
            db.ensure_initialized()?;
            match db.get_job(&job_id)? {
                Some(job) => {
                    println!("Job {}", job.job_id);
                    println!("Title: {}", job.title);
                    if let Some(company) = &job.company_name {
                        println!("Company: {}", company);
                    }
                    println!("Source: {} ({})", job.source, job.source_url);
                    println!("Location: {} [{}]", job.location, job.remote_type);
                    println!("Level: {}  Type: {}", job.experience_level, job.employment_type);
                    println!("Pay: {}", long_pay(&job));
                    if let Some(posted) = job.posted_at {
                        println!("Posted: {}", posted.format("%Y-%m-%d"));
                    }
                    println!("First seen: {}", job.first_seen_at.format("%Y-%m-%d %H:%M"));
                    println!("Last seen: {}", job.scraped_at.format("%Y-%m-%d %H:%M"));

                    let skills = db.job_skills(&job.job_id)?;
                    if !skills.is_empty() {
                        println!("\nSkills:");
                        for s in skills {
                            match s.years_required {
                                Some(years) => println!("  {} ({}) - {}+ years", s.skill, s.category, years),
                                None => println!("  {} ({})", s.skill, s.category),
                            }
                        }
                    }
                    println!("\n--- Description ---\n{}", job.description);
                }
                None => {
                    println!("Job {} not found.", job_id);
                }
            }
        }

        Commands::Skills { limit } => {
            db.ensure_initialized()?;
            let counts = db.skill_counts(limit)?;
            if counts.is_empty() {
                println!("No skills extracted yet. Run 'jobintel extract'.");
            } else {
                println!("{:<24} {:<14} {:>6}", "SKILL", "CATEGORY", "JOBS");
                println!("{}", "-".repeat(46));
                for c in counts {
                    println!("{:<24} {:<14} {:>6}", c.name, c.category, c.jobs);
                }
            }
        }

        Commands::Alerts { user, limit } => {
            db.ensure_initialized()?;
            let pending = db.pending_alerts(user, limit)?;
            if pending.is_empty() {
                println!("No pending alerts.");
            } else {
                println!("{:<6} {:<26} {:<34} {:>7}  {}", "ID", "USER", "TITLE", "SCORE", "URL");
                println!("{}", "-".repeat(110));
                for p in pending {
                    println!(
                        "{:<6} {:<26} {:<34} {:>7.2}  {}",
                        p.alert.id,
                        truncate(&p.user_email, 24),
                        truncate(&p.job.title, 32),
                        p.alert.match_score,
                        p.job.source_url
                    );
                }
            }
        }

        Commands::AlertsSent { id } => {
            db.ensure_initialized()?;
            let alert = db.get_alert(id)?.ok_or_else(|| anyhow!("Alert #{} not found", id))?;
            if db.mark_alert_sent(id, Utc::now())? {
                println!("Alert #{} marked as sent (job {}).", id, alert.job_id);
            } else {
                println!("Alert #{} was already sent.", id);
            }
        }

        Commands::AlertsOpened { id } => {
            db.ensure_initialized()?;
            let alert = db.get_alert(id)?.ok_or_else(|| anyhow!("Alert #{} not found", id))?;
            if db.mark_alert_opened(id)? {
                println!("Alert #{} marked as opened (job {}).", id, alert.job_id);
            } else {
                println!("Alert #{} was already opened.", id);
            }
        }

        Commands::Users { command } => {
            db.ensure_initialized()?;
            match command {
                UserCommands::Import { file } => {
                    let text = std::fs::read_to_string(&file)
                        .with_context(|| format!("Failed to read {}", file.display()))?;
                    let profiles: Vec<UserProfile> = match serde_json::from_str(&text) {
                        Ok(list) => list,
                        Err(_) => vec![serde_json::from_str(&text)
                            .with_context(|| format!("Invalid user profile JSON in {}", file.display()))?],
                    };
                    for profile in &profiles {
                        let id = db.upsert_user(profile)?;
                        println!("Saved user {} (ID: {})", profile.email, id);
                    }
                }
                UserCommands::List => {
                    let users = db.list_users(false)?;
                    if users.is_empty() {
                        println!("No users found.");
                    } else {
                        println!("{:<6} {:<30} {:<8} {:<8} {}", "ID", "EMAIL", "REMOTE", "ACTIVE", "TITLES");
                        println!("{}", "-".repeat(80));
                        for u in users {
                            println!(
                                "{:<6} {:<30} {:<8} {:<8} {}",
                                u.id,
                                truncate(&u.email, 28),
                                u.desired_remote_type.map(|r| r.as_str()).unwrap_or("-"),
                                if u.is_active { "yes" } else { "no" },
                                u.desired_titles.join(", ")
                            );
                        }
                    }
                }
            }
        }

        Commands::Logs { limit } => {
            db.ensure_initialized()?;
            let logs = db.scraping_logs(limit)?;
            if logs.is_empty() {
                println!("No scraping runs yet.");
            } else {
                println!(
                    "{:<6} {:<15} {:<17} {:<10} {:>7} {:>5} {:>7}  {}",
                    "ID", "SOURCE", "STARTED", "STATUS", "SCRAPED", "NEW", "UPDATED", "ERROR"
                );
                println!("{}", "-".repeat(100));
                for log in logs {
                    println!(
                        "{:<6} {:<15} {:<17} {:<10} {:>7} {:>5} {:>7}  {}",
                        log.id,
                        log.source,
                        log.started_at.format("%Y-%m-%d %H:%M"),
                        log.status,
                        log.jobs_scraped,
                        log.jobs_new,
                        log.jobs_updated,
                        log.error_message.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    Ok(())
}

fn short_pay(job: &Job) -> String {
    let currency = job.salary_currency.as_deref().unwrap_or("");
    match (job.salary_min, job.salary_max) {
        (Some(min), Some(max)) => format!("{} {}k-{}k", currency, min / 1000, max / 1000),
        (Some(min), None) => format!("{} {}k+", currency, min / 1000),
        (None, Some(max)) => format!("{} <{}k", currency, max / 1000),
        (None, None) => "-".to_string(),
    }
    .trim()
    .to_string()
}

fn long_pay(job: &Job) -> String {
    let currency = job.salary_currency.as_deref().unwrap_or("");
    match (job.salary_min, job.salary_max) {
        (Some(min), Some(max)) => format!("{} {} - {}", currency, min, max),
        (Some(min), None) => format!("{} {}+", currency, min),
        (None, Some(max)) => format!("up to {} {}", currency, max),
        (None, None) => "Not specified".to_string(),
    }
    .trim()
    .to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
