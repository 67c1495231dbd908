use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{EmploymentType, ExperienceLevel, RemoteType};
use crate::vocabulary::{tokenize, Vocabulary};

/// Years-of-experience values outside this range are treated as noise ("2024 years").
const MAX_YEARS: u32 = 40;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalaryRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub currency: Option<String>,
}

/// Structured fields derived from a posting's free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extraction {
    pub skills: BTreeSet<String>,
    pub years_required: BTreeMap<String, u32>,
    pub experience_level: ExperienceLevel,
    pub employment_type: EmploymentType,
    pub remote_type: RemoteType,
    pub salary: SalaryRange,
}

pub struct SkillExtractor {
    vocabulary: Vocabulary,
    years_then_skill: Regex,
    skill_then_years: Regex,
    years_token: Regex,
}

impl SkillExtractor {
    pub fn new(vocabulary: Vocabulary) -> Result<Self> {
        let years = r"(\d{1,2})\s*\+?\s*(?:(?:-|–|to)\s*\d{1,2}\s*\+?\s*)?(?:years?|yrs?)\b";
        // "3+ years of experience with Python", "5+ years Tableau"
        let years_then_skill = Regex::new(&format!(
            r"(?i){years}\.?(?:\s+of)?(?:\s+(?:professional|relevant|proven|hands-on|solid|commercial|working|practical))?(?:\s+experience)?(?:\s+(?:with|in|using|of|on))?\s+([^\n,;:()]{{1,60}})"
        ))?;
        // "Python (3 years)", "SQL: 2+ yrs"
        let skill_then_years =
            Regex::new(&format!(r"(?i)([^\n,;:()]{{1,60}}?)\s*[(:–-]\s*{years}"))?;
        let years_token = Regex::new(&format!(r"(?i)\b{years}"))?;

        Ok(Self {
            vocabulary,
            years_then_skill,
            skill_then_years,
            years_token,
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn extract(
        &self,
        title: &str,
        body: &str,
        location: &str,
        salary_text: Option<&str>,
    ) -> Extraction {
        let text = format!("{title}\n{body}");
        let skills = self.skills(&text);
        let years_required = self.years_required(&text, &skills);

        let salary = match salary_text.map(parse_salary) {
            Some(range) if range.min.is_some() || range.max.is_some() => range,
            _ => salary_in_text(body),
        };

        Extraction {
            experience_level: experience_level(title, body),
            employment_type: employment_type(title, body),
            remote_type: remote_type(&format!("{title}\n{location}\n{body}")),
            skills,
            years_required,
            salary,
        }
    }

    /// Canonical skill names mentioned in `text`, sorted.
    pub fn skills(&self, text: &str) -> BTreeSet<String> {
        let tokens = tokenize(text);
        self.vocabulary
            .scan(&tokens)
            .into_iter()
            .map(|m| m.skill.name.clone())
            .collect()
    }

    fn years_required(&self, text: &str, accepted: &BTreeSet<String>) -> BTreeMap<String, u32> {
        let mut years = BTreeMap::new();
        let mut record = |skill: Option<&str>, value: &str| {
            let (Some(skill), Ok(value)) = (skill, value.parse::<u32>()) else {
                return;
            };
            if value == 0 || value > MAX_YEARS || !accepted.contains(skill) {
                return;
            }
            // first mention wins
            years.entry(skill.to_string()).or_insert(value);
        };

        // The skill phrase ends where the next "N years" begins, and the scan
        // resumes there so back-to-back pairs are all seen.
        let mut at = 0;
        while let Some(caps) = self.years_then_skill.captures_at(text, at) {
            let (Some(count), Some(tail)) = (caps.get(1), caps.get(2)) else {
                break;
            };
            let cut = self
                .years_token
                .find(tail.as_str())
                .map_or(tail.len(), |m| m.start());
            let skill = self
                .vocabulary
                .leading_skill(&tail.as_str()[..cut])
                .map(|s| s.name.as_str());
            record(skill, count.as_str());
            at = tail.start() + cut;
        }
        for caps in self.skill_then_years.captures_iter(text) {
            let skill = self.vocabulary.trailing_skill(&caps[1]).map(|s| s.name.as_str());
            record(skill, &caps[2]);
        }
        years
    }
}

fn padded_tokens(text: &str) -> String {
    let joined = tokenize(text)
        .into_iter()
        .map(|t| t.lower)
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {joined} ")
}

fn mentions_any(padded: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| padded.contains(&format!(" {k} ")))
}

const SENIOR_KEYWORDS: &[&str] = &["senior", "sr", "lead", "principal", "staff"];
const MANAGER_KEYWORDS: &[&str] = &["manager", "director", "head of", "vp", "chief"];
const ENTRY_KEYWORDS: &[&str] = &[
    "junior",
    "jr",
    "entry",
    "entry-level",
    "entry level",
    "graduate",
    "intern",
    "internship",
    "trainee",
];

fn level_in(padded: &str) -> Option<ExperienceLevel> {
    if mentions_any(padded, SENIOR_KEYWORDS) {
        Some(ExperienceLevel::Senior)
    } else if mentions_any(padded, MANAGER_KEYWORDS) {
        Some(ExperienceLevel::Manager)
    } else if mentions_any(padded, ENTRY_KEYWORDS) {
        Some(ExperienceLevel::Entry)
    } else {
        None
    }
}

/// Keyword precedence: senior > manager > entry, default mid.
/// The title is consulted first; the body only when the title is silent.
pub fn experience_level(title: &str, body: &str) -> ExperienceLevel {
    level_in(&padded_tokens(title))
        .or_else(|| level_in(&padded_tokens(body)))
        .unwrap_or(ExperienceLevel::Mid)
}

fn employment_in(padded: &str) -> Option<EmploymentType> {
    if mentions_any(
        padded,
        &["contract", "contractor", "freelance", "temporary", "fixed-term", "consultancy"],
    ) {
        Some(EmploymentType::Contract)
    } else if mentions_any(padded, &["part-time", "part time"]) {
        Some(EmploymentType::PartTime)
    } else if mentions_any(padded, &["internship", "intern", "attachment"]) {
        Some(EmploymentType::Internship)
    } else if mentions_any(padded, &["full-time", "full time", "permanent"]) {
        Some(EmploymentType::FullTime)
    } else {
        None
    }
}

/// Precedence: contract > part-time > internship > full-time (default).
pub fn employment_type(title: &str, body: &str) -> EmploymentType {
    employment_in(&padded_tokens(title))
        .or_else(|| employment_in(&padded_tokens(body)))
        .unwrap_or(EmploymentType::FullTime)
}

/// Precedence: hybrid > remote > on-site (default).
pub fn remote_type(text: &str) -> RemoteType {
    let padded = padded_tokens(text);
    if mentions_any(&padded, &["hybrid"]) {
        RemoteType::Hybrid
    } else if mentions_any(
        &padded,
        &["remote", "remotely", "work from home", "wfh", "anywhere", "distributed team"],
    ) {
        RemoteType::Remote
    } else {
        RemoteType::OnSite
    }
}

pub fn detect_currency(text: &str) -> Option<String> {
    let padded = padded_tokens(text);
    let currency = if mentions_any(&padded, &["kes", "ksh", "kshs"]) || text.contains("KSh") {
        "KES"
    } else if mentions_any(&padded, &["usd"]) || text.contains('$') {
        "USD"
    } else if mentions_any(&padded, &["eur"]) || text.contains('€') {
        "EUR"
    } else if mentions_any(&padded, &["gbp"]) || text.contains('£') {
        "GBP"
    } else {
        return None;
    };
    Some(currency.to_string())
}

#[derive(Debug, Clone, Copy)]
struct Amount {
    value: f64,
    multiplier: f64,
    start: usize,
    end: usize,
    currency_before: bool,
}

impl Amount {
    fn scaled(&self) -> f64 {
        self.value * self.multiplier
    }
}

const CURRENCY_WORDS: &[&str] = &["kes", "kshs", "ksh", "usd", "eur", "gbp"];

/// A currency word only counts as a whole word, so "makes 3-4" is not KES.
fn is_currency_marker(before: &str) -> bool {
    let trimmed = before.trim_end();
    trimmed.ends_with(['$', '€', '£'])
        || CURRENCY_WORDS.iter().any(|w| {
            trimmed
                .strip_suffix(w)
                .is_some_and(|rest| !rest.ends_with(char::is_alphanumeric))
        })
}

/// Finds numeric amounts in lower-cased, comma-stripped text.
fn scan_amounts(text: &str) -> Vec<Amount> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut amounts = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (start, c) = chars[i];
        let follows_word = i > 0 && chars[i - 1].1.is_alphanumeric();
        if !c.is_ascii_digit() || follows_word {
            i += 1;
            continue;
        }

        let mut j = i;
        while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
            j += 1;
        }
        let end_digits = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());
        let digits = text[start..end_digits].trim_end_matches('.');
        let Ok(value) = digits.parse::<f64>() else {
            i = j;
            continue;
        };

        let mut multiplier = 1.0;
        if let Some(&(_, suffix)) = chars.get(j) {
            let next_is_letter = chars.get(j + 1).is_some_and(|(_, n)| n.is_alphabetic());
            if !next_is_letter {
                match suffix {
                    'k' => {
                        multiplier = 1_000.0;
                        j += 1;
                    }
                    'm' => {
                        multiplier = 1_000_000.0;
                        j += 1;
                    }
                    _ => {}
                }
            }
        }

        let end = chars.get(j).map(|(b, _)| *b).unwrap_or(text.len());
        amounts.push(Amount {
            value,
            multiplier,
            start,
            end,
            currency_before: is_currency_marker(&text[..start]),
        });
        i = j;
    }
    amounts
}

fn is_range_separator(between: &str) -> bool {
    let mut rest = between.trim().to_string();
    for word in CURRENCY_WORDS {
        rest = rest.replace(word, "");
    }
    let rest = rest.replace(['$', '€', '£'], "");
    matches!(rest.trim(), "-" | "–" | "—" | "to" | "and")
}

fn to_range(low: Amount, high: Amount) -> (i64, i64) {
    let mut low_value = low.scaled();
    // "150 - 250k": the suffix on the high end applies to both
    if low.multiplier == 1.0 && high.multiplier > 1.0 && low.value < 1000.0 {
        low_value = low.value * high.multiplier;
    }
    let (a, b) = (low_value.round() as i64, high.scaled().round() as i64);
    if a > b { (b, a) } else { (a, b) }
}

fn first_range(text: &str, amounts: &[Amount], require_currency: bool) -> Option<(i64, i64)> {
    amounts.windows(2).find_map(|pair| {
        let (low, high) = (pair[0], pair[1]);
        if require_currency && !low.currency_before {
            return None;
        }
        is_range_separator(&text[low.end..high.start]).then(|| to_range(low, high))
    })
}

fn normalize_money_text(text: &str) -> String {
    text.to_lowercase().replace(',', "")
}

/// Parses a dedicated salary field. A lone amount yields `(Some, None)`,
/// or `(None, Some)` after "up to"; no amount yields `(None, None)`.
pub fn parse_salary(text: &str) -> SalaryRange {
    let normalized = normalize_money_text(text);
    let amounts = scan_amounts(&normalized);
    let currency = detect_currency(text);

    if let Some((min, max)) = first_range(&normalized, &amounts, false) {
        return SalaryRange {
            min: Some(min),
            max: Some(max),
            currency,
        };
    }

    match amounts.first() {
        Some(amount) if amount.scaled() >= 1.0 => {
            let value = Some(amount.scaled().round() as i64);
            if normalized[..amount.start].contains("up to") {
                SalaryRange {
                    min: None,
                    max: value,
                    currency,
                }
            } else {
                SalaryRange {
                    min: value,
                    max: None,
                    currency,
                }
            }
        }
        _ => SalaryRange::default(),
    }
}

/// Salary ranges embedded in a description. Only currency-anchored ranges
/// count, so "3-5 years" never becomes a salary.
pub fn salary_in_text(text: &str) -> SalaryRange {
    let normalized = normalize_money_text(text);
    let amounts = scan_amounts(&normalized);
    match first_range(&normalized, &amounts, true) {
        Some((min, max)) => SalaryRange {
            min: Some(min),
            max: Some(max),
            currency: detect_currency(text),
        },
        None => SalaryRange::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SkillExtractor {
        SkillExtractor::new(Vocabulary::builtin()).unwrap()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_skill_precision_on_short_names() {
        let ex = extractor();
        let result = ex.extract(
            "",
            "Experience with R and Python required, 3+ years SQL",
            "",
            None,
        );
        assert_eq!(result.skills, set(&["R", "Python", "SQL"]));
        assert_eq!(result.years_required, BTreeMap::from([("SQL".to_string(), 3)]));

        let result = ex.extract("", "Fluent in Kiswahili, based in Rwanda", "", None);
        assert!(result.skills.is_empty());
        assert!(result.years_required.is_empty());
    }

    #[test]
    fn test_all_caps_postings_keep_their_skills() {
        let ex = extractor();
        let result = ex.extract("", "Advanced EXCEL and SPARK required, plus SQL", "", None);
        assert_eq!(result.skills, set(&["Excel", "Spark", "SQL"]));
    }

    #[test]
    fn test_synonyms_collapse_to_one_skill() {
        let ex = extractor();
        let skills = ex.skills("Node.js or nodejs (JS), PowerBI and power bi dashboards");
        assert_eq!(skills, set(&["JavaScript", "Power BI"]));
    }

    #[test]
    fn test_years_in_both_orders() {
        let ex = extractor();
        let result = ex.extract(
            "Analyst",
            "3+ years of experience with Python. Tableau (2 years). SQL: 4 yrs",
            "",
            None,
        );
        assert_eq!(result.years_required["Python"], 3);
        assert_eq!(result.years_required["Tableau"], 2);
        assert_eq!(result.years_required["SQL"], 4);
    }

    #[test]
    fn test_years_pairs_back_to_back() {
        let ex = extractor();
        let result = ex.extract("", "3+ years Python and 5 years SQL", "", None);
        assert_eq!(result.skills, set(&["Python", "SQL"]));
        assert_eq!(
            result.years_required,
            BTreeMap::from([("Python".to_string(), 3), ("SQL".to_string(), 5)])
        );
    }

    #[test]
    fn test_years_ignored_without_known_skill() {
        let ex = extractor();
        let result = ex.extract("", "5 years of stakeholder management, Excel", "", None);
        assert_eq!(result.skills, set(&["Excel"]));
        assert!(result.years_required.is_empty());
    }

    #[test]
    fn test_extraction_is_repeatable() {
        let ex = extractor();
        let text = "Spark, Kafka and AWS. 4+ years Spark. Hybrid role, contract.";
        let first = ex.extract("Data Engineer", text, "Nairobi", Some("USD 4,000 - 6,000"));
        let second = ex.extract("Data Engineer", text, "Nairobi", Some("USD 4,000 - 6,000"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_experience_level_precedence() {
        assert_eq!(experience_level("Senior Manager, Analytics", ""), ExperienceLevel::Senior);
        assert_eq!(experience_level("Head of Data", ""), ExperienceLevel::Manager);
        assert_eq!(experience_level("Junior Data Analyst", ""), ExperienceLevel::Entry);
        assert_eq!(experience_level("Data Analyst", "Graduate trainee programme"), ExperienceLevel::Entry);
        assert_eq!(experience_level("Data Analyst", "Great team"), ExperienceLevel::Mid);
        // title wins over body
        assert_eq!(
            experience_level("Junior Analyst", "you will report to a senior lead"),
            ExperienceLevel::Entry
        );
        // "Leadership" is not "lead"
        assert_eq!(experience_level("Leadership Programme Analyst", ""), ExperienceLevel::Mid);
    }

    #[test]
    fn test_employment_and_remote_types() {
        assert_eq!(employment_type("Data Analyst (Contract)", ""), EmploymentType::Contract);
        assert_eq!(employment_type("Analyst", "This is a part-time role"), EmploymentType::PartTime);
        assert_eq!(employment_type("Data Intern", ""), EmploymentType::Internship);
        assert_eq!(employment_type("Analyst", "Internal tools"), EmploymentType::FullTime);

        assert_eq!(remote_type("Hybrid - Nairobi, remote Fridays"), RemoteType::Hybrid);
        assert_eq!(remote_type("Fully remote, Anywhere"), RemoteType::Remote);
        assert_eq!(remote_type("Nairobi, Kenya"), RemoteType::OnSite);
    }

    #[test]
    fn test_parse_salary_ranges() {
        let r = parse_salary("KES 150k - 250k");
        assert_eq!((r.min, r.max), (Some(150_000), Some(250_000)));
        assert_eq!(r.currency.as_deref(), Some("KES"));

        let r = parse_salary("$120,000 to $90,000");
        assert_eq!((r.min, r.max), (Some(90_000), Some(120_000)));
        assert_eq!(r.currency.as_deref(), Some("USD"));

        let r = parse_salary("150 – 250K per month");
        assert_eq!((r.min, r.max), (Some(150_000), Some(250_000)));

        let r = parse_salary("€1.2m—1.5m");
        assert_eq!((r.min, r.max), (Some(1_200_000), Some(1_500_000)));
    }

    #[test]
    fn test_parse_salary_single_and_missing() {
        let r = parse_salary("KSh 80,000");
        assert_eq!((r.min, r.max), (Some(80_000), None));

        let r = parse_salary("Up to $5,000/month");
        assert_eq!((r.min, r.max), (None, Some(5_000)));

        assert_eq!(parse_salary("Competitive"), SalaryRange::default());
        assert_eq!(parse_salary(""), SalaryRange::default());
    }

    #[test]
    fn test_salary_in_body_needs_currency() {
        let r = salary_in_text("3-5 years of experience. Pay: KES 100,000 - 150,000 gross.");
        assert_eq!((r.min, r.max), (Some(100_000), Some(150_000)));

        let r = salary_in_text("Requires 3-5 years of experience and 2 to 4 references");
        assert_eq!((r.min, r.max), (None, None));

        let r = salary_in_text("The role makes 3-4 field visits per month and takes 2 to 3 calls");
        assert_eq!(r, SalaryRange::default());

        let r = salary_in_text("Budget: KSh 80,000 - 95,000");
        assert_eq!((r.min, r.max), (Some(80_000), Some(95_000)));
    }

    #[test]
    fn test_end_to_end_posting_attributes() {
        let ex = extractor();
        let result = ex.extract(
            "Senior Data Analyst",
            "We use Python, SQL, 5+ years Tableau",
            "Remote",
            Some("KES 150k - 250k"),
        );
        assert_eq!(result.experience_level, ExperienceLevel::Senior);
        assert_eq!(result.remote_type, RemoteType::Remote);
        assert_eq!(result.salary.min, Some(150_000));
        assert_eq!(result.salary.max, Some(250_000));
        assert_eq!(result.skills, set(&["Python", "SQL", "Tableau"]));
        assert_eq!(result.years_required, BTreeMap::from([("Tableau".to_string(), 5)]));
    }
}
