//! Source adapters: one variant per job board, dispatched on [`SourceKind`].

mod api;
mod html;

pub use html::html_to_text;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{FetchConfig, SourceConfig};
use crate::fetch::{FetchEngine, FetchError};
use crate::models::RawPosting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Fuzu,
    BrighterMonday,
    Indeed,
    Remotive,
    Arbeitnow,
    RemoteOk,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Fuzu,
        SourceKind::BrighterMonday,
        SourceKind::Indeed,
        SourceKind::Remotive,
        SourceKind::Arbeitnow,
        SourceKind::RemoteOk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Fuzu => "fuzu",
            SourceKind::BrighterMonday => "brightermonday",
            SourceKind::Indeed => "indeed",
            SourceKind::Remotive => "remotive",
            SourceKind::Arbeitnow => "arbeitnow",
            SourceKind::RemoteOk => "remoteok",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let norm = s.trim().to_lowercase().replace(['-', '_', ' '], "");
        Self::ALL.into_iter().find(|k| k.as_str() == norm)
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            SourceKind::Fuzu => "https://www.fuzu.com",
            SourceKind::BrighterMonday => "https://www.brightermonday.co.ke",
            SourceKind::Indeed => "https://ke.indeed.com",
            SourceKind::Remotive => "https://remotive.com",
            SourceKind::Arbeitnow => "https://www.arbeitnow.com",
            SourceKind::RemoteOk => "https://remoteok.com",
        }
    }

    pub fn default_country(&self) -> Option<&'static str> {
        match self {
            SourceKind::Fuzu | SourceKind::BrighterMonday | SourceKind::Indeed => Some("Kenya"),
            _ => None,
        }
    }

    pub fn default_currency(&self) -> Option<&'static str> {
        match self {
            SourceKind::Fuzu | SourceKind::BrighterMonday | SourceKind::Indeed => Some("KES"),
            SourceKind::RemoteOk => Some("USD"),
            _ => None,
        }
    }

    /// Whether later pages exist at all; single-page APIs stop after page one.
    fn paginated(&self) -> bool {
        !matches!(self, SourceKind::Remotive | SourceKind::RemoteOk)
    }

    /// Boards whose endpoint cannot search; keywords filter results client-side.
    fn filters_client_side(&self) -> bool {
        matches!(self, SourceKind::Arbeitnow | SourceKind::RemoteOk)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}: no keywords configured")]
    MissingKeywords(SourceKind),
    #[error("{0}: at least one location is required")]
    MissingLocations(SourceKind),
    #[error("{0}: invalid base url '{1}'")]
    InvalidBaseUrl(SourceKind, String),
}

/// One page of parser output.
#[derive(Debug, Default)]
pub(crate) struct ParsedPage {
    pub postings: Vec<RawPosting>,
    pub skipped: u32,
    /// `Some(false)` when the page says there is nothing after it.
    pub has_next: Option<bool>,
}

pub(crate) struct PageContext<'a> {
    pub kind: SourceKind,
    pub base: &'a Url,
    pub now: DateTime<Utc>,
}

/// Everything one adapter run produced. Pages are kept apart so the store
/// can commit each one atomically; with a page sink attached they are
/// handed over as they arrive and `pages` stays empty.
#[derive(Debug, Default)]
pub struct AdapterRun {
    pub pages: Vec<Vec<RawPosting>>,
    pub postings: usize,
    pub requests: u32,
    pub skipped_records: u32,
    /// Requests whose retries ran out.
    pub exhausted: Vec<String>,
    /// Requests abandoned on a permanent error.
    pub abandoned: Vec<String>,
    pub deadline_hit: bool,
}

impl AdapterRun {
    pub fn posting_count(&self) -> usize {
        self.postings
    }

    /// Reason to seal the scraping log as failed, if any.
    pub fn failure(&self) -> Option<String> {
        if self.deadline_hit {
            Some("run deadline reached before all pages were fetched".to_string())
        } else if let Some(last) = self.exhausted.last() {
            Some(format!("{} request(s) exhausted retries; last: {}", self.exhausted.len(), last))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct Search {
    keyword: Option<String>,
    location: Option<String>,
    filter: Vec<String>,
}

pub struct SourceAdapter {
    kind: SourceKind,
    base: Url,
    page_cap: u32,
    interval: Duration,
    engine: Arc<FetchEngine>,
    page_sink: Option<mpsc::Sender<Vec<RawPosting>>>,
}

impl SourceAdapter {
    pub fn new(
        config: &SourceConfig,
        fetch: &FetchConfig,
        engine: Arc<FetchEngine>,
    ) -> Result<Self, ConfigError> {
        let kind = config.kind;
        let raw_base = config.base_url.as_deref().unwrap_or(kind.default_base_url());
        let base = Url::parse(raw_base)
            .map_err(|_| ConfigError::InvalidBaseUrl(kind, raw_base.to_string()))?;

        Ok(Self {
            kind,
            base,
            page_cap: config.page_cap.max(1),
            interval: config.interval(fetch),
            engine,
            page_sink: None,
        })
    }

    /// Delivers each kept page to `sink` as soon as it is parsed instead of
    /// holding it in [`AdapterRun::pages`].
    pub fn with_page_sink(mut self, sink: mpsc::Sender<Vec<RawPosting>>) -> Self {
        self.page_sink = Some(sink);
        self
    }

    /// Fetches and parses every search page for `keywords` (and, for boards
    /// that need them, `locations`), stopping early once `deadline` passes.
    pub async fn run(
        &self,
        keywords: &[String],
        locations: &[String],
        deadline: Option<Instant>,
    ) -> Result<AdapterRun, ConfigError> {
        let searches = self.searches(keywords, locations)?;
        let mut run = AdapterRun::default();
        let mut seen: HashSet<String> = HashSet::new();

        'searches: for search in &searches {
            for page in 1..=self.page_cap {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    run.deadline_hit = true;
                    break 'searches;
                }

                let url = self.page_url(search, page);
                run.requests += 1;
                let fetched = match deadline {
                    Some(d) => match tokio::time::timeout_at(d, self.engine.fetch(&url, self.interval)).await {
                        Ok(result) => result,
                        Err(_) => {
                            run.deadline_hit = true;
                            break 'searches;
                        }
                    },
                    None => self.engine.fetch(&url, self.interval).await,
                };

                let body = match fetched {
                    Ok(response) => {
                        debug!(source = %self.kind, url = %response.url, status = response.status, "page fetched");
                        response.body
                    }
                    Err(e @ FetchError::Exhausted { .. }) => {
                        warn!(source = %self.kind, url = %url, error = %e, "giving up on page");
                        run.exhausted.push(e.to_string());
                        break;
                    }
                    Err(e) => {
                        warn!(source = %self.kind, url = %url, error = %e, "page abandoned");
                        run.abandoned.push(e.to_string());
                        break;
                    }
                };

                let ctx = PageContext {
                    kind: self.kind,
                    base: &self.base,
                    now: Utc::now(),
                };
                let parsed = self.parse(&body, &ctx);
                run.skipped_records += parsed.skipped;

                let fresh: Vec<RawPosting> = parsed
                    .postings
                    .into_iter()
                    .filter(|p| seen.insert(p.source_url.clone()))
                    .collect();
                debug!(source = %self.kind, url = %url, page, fresh = fresh.len(), "page parsed");
                if fresh.is_empty() {
                    break;
                }

                let kept: Vec<RawPosting> = fresh
                    .into_iter()
                    .filter(|p| matches_keywords(p, &search.filter))
                    .collect();
                if !kept.is_empty() {
                    run.postings += kept.len();
                    match &self.page_sink {
                        Some(sink) => {
                            if sink.send(kept).await.is_err() {
                                debug!(source = %self.kind, "page consumer gone, stopping");
                                break 'searches;
                            }
                        }
                        None => run.pages.push(kept),
                    }
                }

                if !self.kind.paginated() || parsed.has_next == Some(false) {
                    break;
                }
            }
        }

        info!(
            source = %self.kind,
            requests = run.requests,
            postings = run.posting_count(),
            skipped = run.skipped_records,
            abandoned = run.abandoned.len(),
            exhausted = run.exhausted.len(),
            "adapter run finished"
        );
        Ok(run)
    }

    fn searches(&self, keywords: &[String], locations: &[String]) -> Result<Vec<Search>, ConfigError> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ConfigError::MissingKeywords(self.kind));
        }

        if self.kind.filters_client_side() {
            return Ok(vec![Search {
                keyword: None,
                location: None,
                filter: keywords.iter().map(|k| k.to_lowercase()).collect(),
            }]);
        }

        if self.kind == SourceKind::Indeed {
            if locations.is_empty() {
                return Err(ConfigError::MissingLocations(self.kind));
            }
            return Ok(keywords
                .iter()
                .flat_map(|k| {
                    locations.iter().map(move |l| Search {
                        keyword: Some(k.clone()),
                        location: Some(l.clone()),
                        filter: Vec::new(),
                    })
                })
                .collect());
        }

        Ok(keywords
            .into_iter()
            .map(|k| Search {
                keyword: Some(k),
                location: None,
                filter: Vec::new(),
            })
            .collect())
    }

    fn page_url(&self, search: &Search, page: u32) -> String {
        let keyword = search.keyword.as_deref().unwrap_or_default();
        let path = match self.kind {
            SourceKind::Fuzu => "/ke/jobs/search".to_string(),
            SourceKind::BrighterMonday => format!("/jobs/{}", slugify(keyword)),
            SourceKind::Indeed => "/jobs".to_string(),
            SourceKind::Remotive => "/api/remote-jobs".to_string(),
            SourceKind::Arbeitnow => "/api/job-board-api".to_string(),
            SourceKind::RemoteOk => "/api".to_string(),
        };

        let mut url = self.base.clone();
        url.set_path(&path);
        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            match self.kind {
                SourceKind::Fuzu => {
                    query.append_pair("query", keyword);
                    if page > 1 {
                        query.append_pair("page", &page.to_string());
                    }
                }
                SourceKind::BrighterMonday | SourceKind::Arbeitnow => {
                    if page > 1 {
                        query.append_pair("page", &page.to_string());
                    }
                }
                SourceKind::Indeed => {
                    query.append_pair("q", keyword);
                    query.append_pair("l", search.location.as_deref().unwrap_or_default());
                    if page > 1 {
                        query.append_pair("start", &((page - 1) * 10).to_string());
                    }
                }
                SourceKind::Remotive => {
                    query.append_pair("search", keyword);
                }
                SourceKind::RemoteOk => {}
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url.to_string()
    }

    fn parse(&self, body: &str, ctx: &PageContext<'_>) -> ParsedPage {
        match self.kind {
            SourceKind::Fuzu => html::parse_fuzu(body, ctx),
            SourceKind::BrighterMonday => html::parse_brightermonday(body, ctx),
            SourceKind::Indeed => html::parse_indeed(body, ctx),
            SourceKind::Remotive => api::parse_remotive(body, ctx),
            SourceKind::Arbeitnow => api::parse_arbeitnow(body, ctx),
            SourceKind::RemoteOk => api::parse_remoteok(body, ctx),
        }
    }
}

fn slugify(keyword: &str) -> String {
    keyword
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn matches_keywords(posting: &RawPosting, filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    let title = posting.title.to_lowercase();
    let text = posting.raw_text.to_lowercase();
    filter.iter().any(|k| title.contains(k.as_str()) || text.contains(k.as_str()))
}

/// Best-effort posting date from listing text: relative phrases,
/// ISO dates or unix timestamps. Unrecognised text yields `None`.
pub fn parse_posted(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.trim().to_lowercase();
    if lower.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&lower.to_uppercase()) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&lower, "%Y-%m-%dt%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&lower, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&lower, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    if lower.len() >= 9 && lower.chars().all(|c| c.is_ascii_digit()) {
        return lower.parse::<i64>().ok().and_then(from_unix);
    }

    if ["just posted", "just now", "today"].iter().any(|p| lower.contains(p)) {
        return Some(now);
    }
    if lower.contains("yesterday") {
        return now.checked_sub_signed(ChronoDuration::days(1));
    }

    let digits: String = lower
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let amount: i64 = digits.parse().ok()?;
    // absurd amounts yield None rather than overflowing
    let unit: Option<ChronoDuration> = if lower.contains("minute") || lower.contains("min ") {
        ChronoDuration::try_minutes(amount)
    } else if lower.contains("hour") || lower.contains("hr") {
        ChronoDuration::try_hours(amount)
    } else if lower.contains("day") {
        ChronoDuration::try_days(amount)
    } else if lower.contains("week") {
        ChronoDuration::try_weeks(amount)
    } else if lower.contains("month") {
        amount.checked_mul(30).and_then(ChronoDuration::try_days)
    } else {
        return None;
    };
    now.checked_sub_signed(unit?)
}

pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

const TRACKING_PARAMS: &[&str] = &[
    "ref", "refid", "trackingid", "tk", "from", "fbclid", "gclid", "src", "source", "trk",
];

/// Drops tracking parameters from a card link; identifying ones such as
/// Indeed's `jk` survive. Relative links resolve against `base`.
pub fn clean_tracking_url(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let mut url = base.join(href).ok()?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.set_fragment(None);
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

/// Listing links that are not postings ("See all jobs", "Data Analyst jobs").
pub fn is_navigation_artifact(text: &str) -> bool {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();

    if trimmed.chars().count() < 4 {
        return true;
    }
    if ["search for jobs", "see all jobs", "view all", "search other jobs", "jobs", "next", "previous"]
        .contains(&lower.as_str())
    {
        return true;
    }
    lower.starts_with("jobs similar to")
        || lower.starts_with("jobs in ")
        || lower.starts_with("manage job")
        || lower.contains("unsubscribe")
        || lower.contains("privacy")
        || lower.ends_with(" jobs")
}

const PLACELESS: &[&str] = &["remote", "anywhere", "worldwide", "global", "work from home"];

/// `"Nairobi, Kenya"` -> `(Some("Nairobi"), Some("Kenya"))`. A lone word is a
/// country when the source has no default or matches it; otherwise a city.
pub fn split_location(location: &str, default_country: Option<&str>) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = location
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !PLACELESS.contains(&p.to_lowercase().as_str()))
        .collect();

    let default = default_country.map(str::to_string);
    match parts.as_slice() {
        [] => (None, default),
        [only] => match default_country {
            Some(country) if !only.eq_ignore_ascii_case(country) => {
                (Some(only.to_string()), default)
            }
            _ => (None, Some(only.to_string())),
        },
        [first, .., last] => (Some(first.to_string()), Some(last.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_source_kind_names() {
        for kind in SourceKind::ALL {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("Brighter Monday"), Some(SourceKind::BrighterMonday));
        assert_eq!(SourceKind::parse("remote-ok"), Some(SourceKind::RemoteOk));
        assert_eq!(SourceKind::parse("linkedin"), None);
    }

    #[test]
    fn test_parse_posted_relative_phrases() {
        let now = now();
        assert_eq!(parse_posted("Just posted", now), Some(now));
        assert_eq!(parse_posted("Today", now), Some(now));
        assert_eq!(parse_posted("Yesterday", now), Some(now - ChronoDuration::days(1)));
        assert_eq!(parse_posted("3 days ago", now), Some(now - ChronoDuration::days(3)));
        assert_eq!(parse_posted("Posted 5 hours ago", now), Some(now - ChronoDuration::hours(5)));
        assert_eq!(parse_posted("2 weeks ago", now), Some(now - ChronoDuration::weeks(2)));
        assert_eq!(parse_posted("1 month ago", now), Some(now - ChronoDuration::days(30)));
        assert_eq!(parse_posted("30+ days ago", now), Some(now - ChronoDuration::days(30)));
    }

    #[test]
    fn test_parse_posted_absolute_and_unknown() {
        let now = now();
        assert_eq!(
            parse_posted("2024-03-01T10:00:00", now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            parse_posted("2024-03-01T10:00:00+03:00", now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap())
        );
        assert_eq!(
            parse_posted("2024-02-28", now),
            Some(Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_posted("1709287200", now),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(parse_posted("", now), None);
        assert_eq!(parse_posted("Recently", now), None);
    }

    #[test]
    fn test_parse_posted_rejects_absurd_amounts() {
        let now = now();
        assert_eq!(parse_posted("Posted 999999999 days ago", now), None);
        assert_eq!(parse_posted("9223372036854775807 weeks ago", now), None);
        assert_eq!(parse_posted("400000000000000000 months ago", now), None);
        assert_eq!(parse_posted("99999999999999999999999 hours ago", now), None);
    }

    #[test]
    fn test_clean_tracking_url() {
        let base = Url::parse("https://ke.indeed.com").unwrap();
        assert_eq!(
            clean_tracking_url("/viewjob?jk=abc123&from=serp&utm_source=x", &base).as_deref(),
            Some("https://ke.indeed.com/viewjob?jk=abc123")
        );
        assert_eq!(
            clean_tracking_url("https://www.fuzu.com/kenya/jobs/analyst-1?ref=home#apply", &base).as_deref(),
            Some("https://www.fuzu.com/kenya/jobs/analyst-1")
        );
        assert_eq!(clean_tracking_url("", &base), None);
        assert_eq!(clean_tracking_url("#", &base), None);
    }

    #[test]
    fn test_is_navigation_artifact() {
        assert!(is_navigation_artifact("See all jobs"));
        assert!(is_navigation_artifact("Data Analyst jobs"));
        assert!(is_navigation_artifact("Jobs in Nairobi"));
        assert!(is_navigation_artifact("QA"));
        assert!(!is_navigation_artifact("Data Analyst"));
        assert!(!is_navigation_artifact("BI Developer"));
    }

    #[test]
    fn test_split_location() {
        assert_eq!(
            split_location("Nairobi, Kenya", Some("Kenya")),
            (Some("Nairobi".to_string()), Some("Kenya".to_string()))
        );
        assert_eq!(
            split_location("Westlands, Nairobi, Kenya", None),
            (Some("Westlands".to_string()), Some("Kenya".to_string()))
        );
        assert_eq!(split_location("Remote", None), (None, None));
        assert_eq!(split_location("Anywhere", Some("Kenya")), (None, Some("Kenya".to_string())));
        assert_eq!(split_location("Kenya", Some("Kenya")), (None, Some("Kenya".to_string())));
        assert_eq!(
            split_location("Mombasa", Some("Kenya")),
            (Some("Mombasa".to_string()), Some("Kenya".to_string()))
        );
        assert_eq!(split_location("Germany", None), (None, Some("Germany".to_string())));
    }

    fn adapter(kind: SourceKind, base: &str, page_cap: u32) -> SourceAdapter {
        let fetch = FetchConfig {
            default_interval_ms: 1,
            max_attempts: 2,
            ..FetchConfig::default()
        };
        let config = SourceConfig::new(kind).with_base_url(base).with_page_cap(page_cap);
        let engine = Arc::new(FetchEngine::new(&fetch).unwrap());
        SourceAdapter::new(&config, &fetch, engine).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_page_urls() {
        let a = adapter(SourceKind::Indeed, "https://ke.indeed.com", 3);
        let search = Search {
            keyword: Some("data analyst".to_string()),
            location: Some("Nairobi".to_string()),
            filter: Vec::new(),
        };
        assert_eq!(a.page_url(&search, 1), "https://ke.indeed.com/jobs?q=data+analyst&l=Nairobi");
        assert_eq!(
            a.page_url(&search, 3),
            "https://ke.indeed.com/jobs?q=data+analyst&l=Nairobi&start=20"
        );

        let a = adapter(SourceKind::BrighterMonday, "https://www.brightermonday.co.ke", 3);
        assert_eq!(a.page_url(&search, 1), "https://www.brightermonday.co.ke/jobs/data-analyst");
        assert_eq!(
            a.page_url(&search, 2),
            "https://www.brightermonday.co.ke/jobs/data-analyst?page=2"
        );
    }

    #[tokio::test]
    async fn test_missing_configuration_is_reported() {
        let a = adapter(SourceKind::Indeed, "https://ke.indeed.com", 1);
        let err = a.run(&strings(&["data"]), &[], None).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingLocations(SourceKind::Indeed)));

        let a = adapter(SourceKind::Remotive, "https://remotive.com", 1);
        let err = a.run(&strings(&["  "]), &[], None).await.unwrap_err();
        assert!(matches!(err, ConfigError::MissingKeywords(SourceKind::Remotive)));

        let fetch = FetchConfig::default();
        let engine = Arc::new(FetchEngine::new(&fetch).unwrap());
        let config = SourceConfig::new(SourceKind::Fuzu).with_base_url("not a url");
        assert!(matches!(
            SourceAdapter::new(&config, &fetch, engine),
            Err(ConfigError::InvalidBaseUrl(SourceKind::Fuzu, _))
        ));
    }

    fn fuzu_page(ids: &[u32]) -> String {
        let cards: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<div class="job-card"><a href="/kenya/jobs/data-analyst-{id}?ref=search"><h3>Data Analyst {id}</h3></a>
                    <span class="company-name">Acme Ltd</span><span class="location">Nairobi, Kenya</span>
                    <div class="job-description">SQL and Excel</div><span class="posted-date">2 days ago</span></div>"#
                )
            })
            .collect();
        format!("<html><body>{cards}</body></html>")
    }

    #[tokio::test]
    async fn test_pagination_stops_when_nothing_new() {
        let mut server = Server::new_async().await;
        let page1 = server
            .mock("GET", "/ke/jobs/search")
            .match_query(Matcher::UrlEncoded("query".into(), "data".into()))
            .with_status(200)
            .with_body(fuzu_page(&[1, 2]))
            .expect(1)
            .create_async()
            .await;
        // page 2 repeats page 1, so pagination must stop there
        let page2 = server
            .mock("GET", "/ke/jobs/search")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(fuzu_page(&[1, 2]))
            .expect(1)
            .create_async()
            .await;

        let a = adapter(SourceKind::Fuzu, &server.url(), 5);
        let run = a.run(&strings(&["data"]), &[], None).await.unwrap();
        assert_eq!(run.pages.len(), 1);
        assert_eq!(run.posting_count(), 2);
        assert_eq!(run.requests, 2);
        assert!(run.failure().is_none());
        assert!(run.pages[0][0].source_url.ends_with("/kenya/jobs/data-analyst-1"));
        page1.assert_async().await;
        page2.assert_async().await;
    }

    #[tokio::test]
    async fn test_page_sink_receives_pages_as_parsed() {
        let mut server = Server::new_async().await;
        let pages = server
            .mock("GET", "/ke/jobs/search")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(fuzu_page(&[1, 2]))
            .expect(2)
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::channel(1);
        let a = adapter(SourceKind::Fuzu, &server.url(), 5).with_page_sink(tx);
        let run = a.run(&strings(&["data"]), &[], None).await.unwrap();
        assert!(run.pages.is_empty());
        assert_eq!(run.posting_count(), 2);
        assert_eq!(rx.recv().await.map(|p| p.len()), Some(2));
        drop(a);
        assert!(rx.recv().await.is_none());
        pages.assert_async().await;

        // nobody listening: the run stops after the first delivered page
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let a = adapter(SourceKind::Fuzu, &server.url(), 5).with_page_sink(tx);
        let run = a.run(&strings(&["data"]), &[], None).await.unwrap();
        assert_eq!(run.requests, 1);
    }

    #[tokio::test]
    async fn test_page_cap_is_respected() {
        let mut server = Server::new_async().await;
        let body = |page: u32| {
            format!(
                r#"{{"data":[{{"slug":"s{page}","company_name":"Acme","title":"Data Analyst","description":"<p>SQL</p>","remote":true,"url":"https://www.arbeitnow.com/jobs/s{page}","tags":["Data"],"job_types":[],"location":"Berlin","created_at":1709287200}}],"links":{{"next":"more"}}}}"#
            )
        };
        // later pages are registered first so the catch-all only serves page one
        let mut mocks = Vec::new();
        for page in [3u32, 2] {
            mocks.push(
                server
                    .mock("GET", "/api/job-board-api")
                    .match_query(Matcher::UrlEncoded("page".into(), page.to_string()))
                    .with_status(200)
                    .with_body(body(page))
                    .create_async()
                    .await,
            );
        }
        mocks.push(
            server
                .mock("GET", "/api/job-board-api")
                .match_query(Matcher::Any)
                .with_status(200)
                .with_body(body(1))
                .create_async()
                .await,
        );

        let a = adapter(SourceKind::Arbeitnow, &server.url(), 2);
        let run = a.run(&strings(&["analyst"]), &[], None).await.unwrap();
        assert_eq!(run.requests, 2);
        assert_eq!(run.posting_count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_page_marks_run_failed_but_keeps_earlier_pages() {
        let mut server = Server::new_async().await;
        let _ok = server
            .mock("GET", "/api/remote-jobs")
            .match_query(Matcher::UrlEncoded("search".into(), "data".into()))
            .with_status(200)
            .with_body(r#"{"jobs":[{"url":"https://remotive.com/jobs/1","title":"Data Analyst","company_name":"Acme","publication_date":"2024-03-01T10:00:00"}]}"#)
            .create_async()
            .await;
        let _down = server
            .mock("GET", "/api/remote-jobs")
            .match_query(Matcher::UrlEncoded("search".into(), "analytics".into()))
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let a = adapter(SourceKind::Remotive, &server.url(), 3);
        let run = a.run(&strings(&["data", "analytics"]), &[], None).await.unwrap();
        assert_eq!(run.posting_count(), 1);
        assert_eq!(run.exhausted.len(), 1);
        assert!(run.failure().is_some());
    }

    #[tokio::test]
    async fn test_permanent_error_abandons_only_that_search() {
        let mut server = Server::new_async().await;
        let _missing = server
            .mock("GET", "/jobs/data-analyst")
            .with_status(404)
            .create_async()
            .await;
        let _ok = server
            .mock("GET", "/jobs/data-scientist")
            .with_status(200)
            .with_body(r#"<article data-job-id="77"><h1 data-cy="title-job">Data Scientist</h1><h2>Safaricom</h2><a href="/listings/data-scientist-77">View</a></article>"#)
            .create_async()
            .await;

        let a = adapter(SourceKind::BrighterMonday, &server.url(), 3);
        let run = a
            .run(&strings(&["data analyst", "data scientist"]), &[], None)
            .await
            .unwrap();
        assert_eq!(run.abandoned.len(), 1);
        assert_eq!(run.posting_count(), 1);
        assert!(run.failure().is_none());
    }

    #[tokio::test]
    async fn test_deadline_stops_fetching() {
        let a = adapter(SourceKind::Remotive, "http://127.0.0.1:9", 3);
        let run = a
            .run(&strings(&["data"]), &[], Some(Instant::now()))
            .await
            .unwrap();
        assert!(run.deadline_hit);
        assert_eq!(run.requests, 0);
        assert!(run.failure().is_some());
    }
}
