//! JSON job board APIs.
//!
//! Each record is decoded on its own so that one malformed entry only costs
//! that entry. Every field is optional at the serde level and a field of the
//! wrong type reads as absent; the few that a posting cannot do without are
//! checked by hand.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use super::{from_unix, html_to_text, parse_posted, PageContext, ParsedPage};
use crate::models::RawPosting;

fn decode_records<T: DeserializeOwned>(
    ctx: &PageContext<'_>,
    records: &[Value],
    mut to_posting: impl FnMut(T) -> Result<RawPosting, &'static str>,
) -> ParsedPage {
    let mut page = ParsedPage::default();
    for (index, record) in records.iter().enumerate() {
        let decoded = serde_json::from_value::<T>(record.clone())
            .map_err(|e| e.to_string())
            .and_then(|r| to_posting(r).map_err(str::to_string));
        match decoded {
            Ok(posting) => page.postings.push(posting),
            Err(reason) => {
                warn!(source = %ctx.kind, index, reason = %reason, "skipping malformed record");
                page.skipped += 1;
            }
        }
    }
    page
}

/// Falls back to the default when a field arrives with an unexpected type.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Integers sent either as numbers or as numeric strings.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Unix seconds as a number, or any date text [`parse_posted`] understands.
fn posted_from(value: &Value, ctx: &PageContext<'_>) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(_) => as_int(value).and_then(from_unix),
        Value::String(text) => parse_posted(text, ctx.now),
        _ => None,
    }
}

fn unparseable(ctx: &PageContext<'_>, error: impl std::fmt::Display) -> ParsedPage {
    warn!(source = %ctx.kind, error = %error, "response is not the expected JSON");
    ParsedPage {
        has_next: Some(false),
        ..ParsedPage::default()
    }
}

fn required(value: String, what: &'static str) -> Result<String, &'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(what)
    } else {
        Ok(trimmed.to_string())
    }
}

fn text_with_tags(description: &str, tags: &[String], extra: &[&str]) -> String {
    let mut text = html_to_text(description);
    if !tags.is_empty() {
        text.push_str("\nTags: ");
        text.push_str(&tags.join(", "));
    }
    for line in extra.iter().filter(|l| !l.is_empty()) {
        text.push('\n');
        text.push_str(line);
    }
    text
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemotiveJob {
    #[serde(deserialize_with = "lenient")]
    url: String,
    #[serde(deserialize_with = "lenient")]
    title: String,
    #[serde(deserialize_with = "lenient")]
    company_name: String,
    #[serde(deserialize_with = "lenient")]
    tags: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    job_type: String,
    publication_date: Value,
    #[serde(deserialize_with = "lenient")]
    candidate_required_location: String,
    #[serde(deserialize_with = "lenient")]
    salary: String,
    #[serde(deserialize_with = "lenient")]
    description: String,
}

pub(crate) fn parse_remotive(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return unparseable(ctx, e),
    };
    let Some(records) = value.get("jobs").and_then(Value::as_array) else {
        return unparseable(ctx, "missing 'jobs' array");
    };

    decode_records(ctx, records, |job: RemotiveJob| {
        let job_type = job.job_type.replace('_', "-");
        Ok(RawPosting {
            source: ctx.kind.as_str().to_string(),
            source_url: required(job.url, "record has no url")?,
            title: required(job.title, "record has no title")?,
            company_name: job.company_name.trim().to_string(),
            location: job.candidate_required_location.trim().to_string(),
            raw_text: text_with_tags(&job.description, &job.tags, &[job_type.as_str(), "Remote"]),
            posted_at: posted_from(&job.publication_date, ctx),
            salary_text: Some(job.salary).filter(|s| !s.trim().is_empty()),
        })
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArbeitnowJob {
    #[serde(deserialize_with = "lenient")]
    slug: String,
    #[serde(deserialize_with = "lenient")]
    company_name: String,
    #[serde(deserialize_with = "lenient")]
    title: String,
    #[serde(deserialize_with = "lenient")]
    description: String,
    #[serde(deserialize_with = "lenient")]
    remote: bool,
    #[serde(deserialize_with = "lenient")]
    url: String,
    #[serde(deserialize_with = "lenient")]
    tags: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    job_types: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    location: String,
    created_at: Value,
}

pub(crate) fn parse_arbeitnow(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return unparseable(ctx, e),
    };
    let Some(records) = value.get("data").and_then(Value::as_array) else {
        return unparseable(ctx, "missing 'data' array");
    };

    let mut page = decode_records(ctx, records, |job: ArbeitnowJob| {
        let url = if job.url.trim().is_empty() && !job.slug.is_empty() {
            ctx.base
                .join(&format!("/jobs/{}", job.slug))
                .map(|u| u.to_string())
                .unwrap_or_default()
        } else {
            job.url
        };
        let remote = if job.remote { "Remote" } else { "" };
        let job_types = job.job_types.join(", ");
        Ok(RawPosting {
            source: ctx.kind.as_str().to_string(),
            source_url: required(url, "record has no url")?,
            title: required(job.title, "record has no title")?,
            company_name: job.company_name.trim().to_string(),
            location: job.location.trim().to_string(),
            raw_text: text_with_tags(&job.description, &job.tags, &[job_types.as_str(), remote]),
            posted_at: posted_from(&job.created_at, ctx),
            salary_text: None,
        })
    });

    let next = value.pointer("/links/next");
    page.has_next = Some(next.is_some_and(|n| n.as_str().is_some_and(|s| !s.is_empty())));
    page
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteOkJob {
    id: Value,
    #[serde(deserialize_with = "lenient")]
    company: String,
    #[serde(deserialize_with = "lenient")]
    position: String,
    #[serde(deserialize_with = "lenient")]
    tags: Vec<String>,
    #[serde(deserialize_with = "lenient")]
    description: String,
    #[serde(deserialize_with = "lenient")]
    location: String,
    salary_min: Value,
    salary_max: Value,
    #[serde(deserialize_with = "lenient")]
    url: String,
    date: Value,
    epoch: Value,
}

pub(crate) fn parse_remoteok(body: &str, ctx: &PageContext<'_>) -> ParsedPage {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return unparseable(ctx, e),
    };
    let Some(records) = value.as_array() else {
        return unparseable(ctx, "expected a top-level array");
    };
    // The first element is the API's legal notice, not a job.
    let records: Vec<Value> = records
        .iter()
        .filter(|r| r.get("legal").is_none())
        .cloned()
        .collect();

    decode_records(ctx, &records, |job: RemoteOkJob| {
        let url = if job.url.trim().is_empty() {
            let id = match &job.id {
                Value::String(id) => id.clone(),
                Value::Number(id) => id.to_string(),
                _ => String::new(),
            };
            if id.is_empty() {
                String::new()
            } else {
                ctx.base
                    .join(&format!("/remote-jobs/{id}"))
                    .map(|u| u.to_string())
                    .unwrap_or_default()
            }
        } else {
            job.url
        };
        let salary_min = as_int(&job.salary_min).filter(|s| *s > 0);
        let salary_max = as_int(&job.salary_max).filter(|s| *s > 0);
        let salary_text = match (salary_min, salary_max) {
            (Some(min), Some(max)) => Some(format!("USD {min} - {max}")),
            (Some(min), None) => Some(format!("USD {min}")),
            (None, Some(max)) => Some(format!("up to USD {max}")),
            (None, None) => None,
        };
        let posted_at = posted_from(&job.date, ctx).or_else(|| posted_from(&job.epoch, ctx));

        Ok(RawPosting {
            source: ctx.kind.as_str().to_string(),
            source_url: required(url, "record has no url")?,
            title: required(job.position, "record has no position")?,
            company_name: job.company.trim().to_string(),
            location: job.location.trim().to_string(),
            raw_text: text_with_tags(&job.description, &job.tags, &["Remote"]),
            posted_at,
            salary_text,
        })
    })
}
