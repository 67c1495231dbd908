use serde::Serialize;
use sha2::{Digest, Sha256};

/// Width of the derived identifier, in bytes of digest kept (128 bits).
const JOB_ID_BYTES: usize = 16;

/// Stable identifier of a posting: the first 128 bits of
/// `sha256("<source>\n<source_url>")`, hex-encoded. Both parts are trimmed
/// and the source is lower-cased first.
///
/// The separator cannot appear in a source name, so `("a", "b:c")` and
/// `("a:b", "c")` hash differently.
pub fn job_id(source: &str, source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.trim().to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(source_url.trim().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..JOB_ID_BYTES])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Per-run counters recorded in the scraping log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub scraped: u32,
    pub new: u32,
    pub updated: u32,
}

impl IngestCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        self.scraped += 1;
        match outcome {
            UpsertOutcome::Inserted => self.new += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
    }

    pub fn merge(&mut self, other: IngestCounts) {
        self.scraped += other.scraped;
        self.new += other.new;
        self.updated += other.updated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_job_id_is_stable() {
        let a = job_id("fuzu", "https://www.fuzu.com/kenya/jobs/data-analyst-123");
        let b = job_id("fuzu", "https://www.fuzu.com/kenya/jobs/data-analyst-123");
        assert_eq!(a, b);
        assert_eq!(a.len(), JOB_ID_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_job_id_distinguishes_urls_and_sources() {
        let mut seen = HashSet::new();
        for i in 0..5000 {
            let url = format!("https://example.com/jobs/{i}");
            assert!(seen.insert(job_id("indeed", &url)), "collision at {i}");
        }
        assert_ne!(
            job_id("indeed", "https://example.com/jobs/1"),
            job_id("fuzu", "https://example.com/jobs/1")
        );
        assert_ne!(job_id("a", "b:c"), job_id("a:b", "c"));
    }

    #[test]
    fn test_counts_record_outcomes() {
        let mut counts = IngestCounts::default();
        counts.record(UpsertOutcome::Inserted);
        counts.record(UpsertOutcome::Updated);
        counts.record(UpsertOutcome::Updated);
        assert_eq!(counts, IngestCounts { scraped: 3, new: 1, updated: 2 });

        let mut total = IngestCounts::default();
        total.merge(counts);
        total.merge(counts);
        assert_eq!(total.updated, 4);
    }
}
