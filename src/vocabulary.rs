//! Canonical skill dictionary.
//!
//! The vocabulary is an explicit value handed to the extractor and the store.
//! It only grows through [`Vocabulary::add_skill`] / [`Vocabulary::add_synonym`],
//! which the pipeline calls from reviewed configuration; extraction never adds
//! entries on its own.

use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

use crate::config::VocabularyConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct SkillEntry {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone)]
struct Surface {
    entry: usize,
    /// Canonical spelling of a skill that is also a common lower-case word;
    /// such text only matches with at least one capital letter.
    needs_capital: bool,
}

#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub text: &'a str,
    pub lower: String,
}

/// A dictionary hit covering `tokens[start..end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillMatch<'v> {
    pub skill: &'v SkillEntry,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    entries: Vec<SkillEntry>,
    surfaces: HashMap<String, Surface>,
    first_tokens: HashSet<String>,
    max_tokens: usize,
}

const BUILTIN_SKILLS: &[(&str, &str)] = &[
    ("Python", "Programming"),
    ("R", "Programming"),
    ("SQL", "Programming"),
    ("JavaScript", "Programming"),
    ("Java", "Programming"),
    ("Scala", "Programming"),
    ("Excel", "BI Tool"),
    ("Power BI", "BI Tool"),
    ("Tableau", "BI Tool"),
    ("Looker", "BI Tool"),
    ("Qlik", "BI Tool"),
    ("PostgreSQL", "Database"),
    ("MySQL", "Database"),
    ("MongoDB", "Database"),
    ("Cassandra", "Database"),
    ("Redis", "Database"),
    ("Spark", "Big Data"),
    ("Hadoop", "Big Data"),
    ("Kafka", "Big Data"),
    ("Airflow", "Big Data"),
    ("Databricks", "Cloud"),
    ("AWS", "Cloud"),
    ("Azure", "Cloud"),
    ("GCP", "Cloud"),
    ("Snowflake", "Cloud"),
    ("Redshift", "Cloud"),
    ("Machine Learning", "ML/AI"),
    ("Deep Learning", "ML/AI"),
    ("NLP", "ML/AI"),
    ("Computer Vision", "ML/AI"),
    ("TensorFlow", "ML/AI"),
    ("PyTorch", "ML/AI"),
    ("scikit-learn", "ML/AI"),
    ("XGBoost", "ML/AI"),
    ("Pandas", "Programming"),
    ("NumPy", "Programming"),
    ("dbt", "Big Data"),
    ("Stata", "Statistics"),
    ("SPSS", "Statistics"),
    ("Statistics", "Statistics"),
    ("A/B Testing", "Statistics"),
    ("Hypothesis Testing", "Statistics"),
    ("Regression", "Statistics"),
    ("Git", "DevOps"),
    ("Docker", "DevOps"),
    ("Kubernetes", "DevOps"),
    ("API", "Other"),
    ("ETL", "Other"),
    ("Data Warehousing", "Other"),
    ("Data Modeling", "Other"),
    ("Dashboard Design", "Other"),
    ("Data Visualization", "Other"),
];

/// Skills that are ordinary English words (or a lone letter) in lower case.
const NEEDS_CAPITAL: &[&str] = &["R", "Excel", "Spark"];

const BUILTIN_SYNONYMS: &[(&str, &str)] = &[
    ("python3", "Python"),
    ("structured query language", "SQL"),
    ("t-sql", "SQL"),
    ("pl/sql", "SQL"),
    ("r programming", "R"),
    ("r language", "R"),
    ("js", "JavaScript"),
    ("node.js", "JavaScript"),
    ("nodejs", "JavaScript"),
    ("powerbi", "Power BI"),
    ("power-bi", "Power BI"),
    ("tableau desktop", "Tableau"),
    ("ms excel", "Excel"),
    ("microsoft excel", "Excel"),
    ("postgres", "PostgreSQL"),
    ("ml", "Machine Learning"),
    ("predictive modeling", "Machine Learning"),
    ("neural networks", "Deep Learning"),
    ("natural language processing", "NLP"),
    ("amazon web services", "AWS"),
    ("microsoft azure", "Azure"),
    ("google cloud", "GCP"),
    ("google cloud platform", "GCP"),
    ("sklearn", "scikit-learn"),
    ("scikit learn", "scikit-learn"),
    ("k8s", "Kubernetes"),
    ("apache spark", "Spark"),
    ("apache airflow", "Airflow"),
    ("apache kafka", "Kafka"),
    ("a/b tests", "A/B Testing"),
    ("data warehouse", "Data Warehousing"),
    ("data visualisation", "Data Visualization"),
];

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '+' | '#' | '.' | '/' | '&' | '-' | '\'')
}

fn trim_token(t: &str) -> &str {
    t.trim_matches(|c: char| matches!(c, '.' | '-' | '/' | '\'' | '&'))
}

/// Splits text into word tokens. Punctuation inside a token ("node.js",
/// "c++", "a/b", "r&d") is kept so that short names only match whole words.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    text.split(|c: char| !is_token_char(c))
        .map(trim_token)
        .filter(|t| !t.is_empty())
        .map(|t| Token {
            text: t,
            lower: t.to_lowercase(),
        })
        .collect()
}

impl Vocabulary {
    pub fn builtin() -> Self {
        let mut vocab = Self::default();
        for (name, category) in BUILTIN_SKILLS {
            vocab.add_skill(name, category);
        }
        for (alias, canonical) in BUILTIN_SYNONYMS {
            // Built-in aliases always point at built-in skills.
            let _ = vocab.add_synonym(alias, canonical);
        }
        vocab
    }

    /// Built-in dictionary extended with reviewed entries from configuration.
    pub fn from_config(config: &VocabularyConfig) -> Result<Self> {
        let mut vocab = Self::builtin();
        for extra in &config.extra_skills {
            let category = extra.category.as_deref().unwrap_or("Other");
            vocab.add_skill(&extra.name, category);
        }
        for (alias, canonical) in &config.synonyms {
            vocab.add_synonym(alias, canonical)?;
        }
        Ok(vocab)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn add_skill(&mut self, name: &str, category: &str) {
        let name = name.trim();
        if self.lookup(name).is_some() {
            return;
        }
        let idx = self.entries.len();
        self.entries.push(SkillEntry {
            name: name.to_string(),
            category: category.to_string(),
        });
        self.insert_surface(name, idx, NEEDS_CAPITAL.contains(&name));
    }

    pub fn add_synonym(&mut self, alias: &str, canonical: &str) -> Result<()> {
        let idx = self
            .lookup(canonical)
            .ok_or_else(|| anyhow!("synonym '{}' points at unknown skill '{}'", alias, canonical))?;
        self.insert_surface(alias.trim(), idx, false);
        Ok(())
    }

    fn insert_surface(&mut self, spelling: &str, entry: usize, needs_capital: bool) {
        let tokens = tokenize(spelling);
        if tokens.is_empty() {
            return;
        }
        let key = tokens.iter().map(|t| t.lower.as_str()).collect::<Vec<_>>().join(" ");
        self.first_tokens.insert(tokens[0].lower.clone());
        self.max_tokens = self.max_tokens.max(tokens.len());
        self.surfaces.insert(
            key,
            Surface { entry, needs_capital },
        );
    }

    fn lookup(&self, name: &str) -> Option<usize> {
        let key = tokenize(name)
            .iter()
            .map(|t| t.lower.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.surfaces.get(&key).map(|s| s.entry)
    }

    pub fn get(&self, name: &str) -> Option<&SkillEntry> {
        self.lookup(name).map(|idx| &self.entries[idx])
    }

    pub fn category_of(&self, name: &str) -> &str {
        self.get(name).map(|e| e.category.as_str()).unwrap_or("Other")
    }

    /// Maps a candidate phrase onto its canonical entry; "excel" stays a verb.
    pub fn normalize(&self, phrase: &str) -> Option<&SkillEntry> {
        let tokens = tokenize(phrase);
        self.match_at(&tokens, 0, tokens.len())
            .filter(|m| m.end == tokens.len())
            .map(|m| m.skill)
    }

    fn match_span(&self, tokens: &[Token<'_>], start: usize, len: usize) -> Option<&SkillEntry> {
        let span = &tokens[start..start + len];
        let key = span.iter().map(|t| t.lower.as_str()).collect::<Vec<_>>().join(" ");
        let surface = self.surfaces.get(&key)?;
        if surface.needs_capital && !span.iter().any(|t| t.text.chars().any(char::is_uppercase)) {
            return None;
        }
        Some(&self.entries[surface.entry])
    }

    /// Longest dictionary match starting exactly at `start`, not extending past `limit`.
    fn match_at(&self, tokens: &[Token<'_>], start: usize, limit: usize) -> Option<SkillMatch<'_>> {
        if start >= limit || !self.first_tokens.contains(&tokens[start].lower) {
            return None;
        }
        let longest = self.max_tokens.min(limit - start);
        (1..=longest).rev().find_map(|len| {
            self.match_span(tokens, start, len).map(|skill| SkillMatch {
                skill,
                start,
                end: start + len,
            })
        })
    }

    /// Longest dictionary match ending exactly at `end`.
    fn match_ending_at(&self, tokens: &[Token<'_>], end: usize) -> Option<SkillMatch<'_>> {
        let longest = self.max_tokens.min(end);
        (1..=longest).rev().find_map(|len| {
            let start = end - len;
            self.match_span(tokens, start, len).map(|skill| SkillMatch { skill, start, end })
        })
    }

    /// Greedy left-to-right scan for whole-token dictionary phrases.
    pub fn scan<'v>(&'v self, tokens: &[Token<'_>]) -> Vec<SkillMatch<'v>> {
        let mut found = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if let Some(m) = self.match_at(tokens, i, tokens.len()) {
                i = m.end;
                found.push(m);
                continue;
            }
            // "JavaScript/TypeScript" style compounds: retry on the slash-separated parts.
            if tokens[i].text.contains('/') {
                let parts: Vec<Token<'_>> = tokens[i]
                    .text
                    .split('/')
                    .map(trim_token)
                    .filter(|p| !p.is_empty())
                    .map(|p| Token {
                        text: p,
                        lower: p.to_lowercase(),
                    })
                    .collect();
                for j in 0..parts.len() {
                    if let Some(m) = self.match_at(&parts, j, j + 1) {
                        found.push(SkillMatch {
                            skill: m.skill,
                            start: i,
                            end: i + 1,
                        });
                    }
                }
            }
            i += 1;
        }
        found
    }

    /// Skill named at the very beginning of `text` ("SQL and Python" -> SQL).
    pub fn leading_skill(&self, text: &str) -> Option<&SkillEntry> {
        let tokens = tokenize(text);
        self.match_at(&tokens, 0, tokens.len()).map(|m| m.skill)
    }

    /// Skill named at the very end of `text` ("strong Power BI" -> Power BI).
    pub fn trailing_skill(&self, text: &str) -> Option<&SkillEntry> {
        let tokens = tokenize(text);
        self.match_ending_at(&tokens, tokens.len()).map(|m| m.skill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtraSkill;

    fn names(vocab: &Vocabulary, text: &str) -> Vec<String> {
        let tokens = tokenize(text);
        vocab.scan(&tokens).into_iter().map(|m| m.skill.name.clone()).collect()
    }

    #[test]
    fn test_tokenize_keeps_inner_punctuation() {
        let tokens: Vec<_> = tokenize("Node.js, C++ and A/B testing (R&D).")
            .into_iter()
            .map(|t| t.lower)
            .collect();
        assert_eq!(tokens, vec!["node.js", "c++", "and", "a/b", "testing", "r&d"]);
    }

    #[test]
    fn test_synonyms_normalize_to_canonical() {
        let vocab = Vocabulary::builtin();
        assert_eq!(vocab.normalize("nodejs").unwrap().name, "JavaScript");
        assert_eq!(vocab.normalize("Node.js").unwrap().name, "JavaScript");
        assert_eq!(vocab.normalize("JS").unwrap().name, "JavaScript");
        assert_eq!(vocab.normalize("powerbi").unwrap().name, "Power BI");
        assert_eq!(vocab.normalize("power bi").unwrap().name, "Power BI");
        assert_eq!(vocab.normalize("Google Cloud Platform").unwrap().name, "GCP");
        assert!(vocab.normalize("communication skills").is_none());
    }

    #[test]
    fn test_scan_prefers_longest_phrase() {
        let vocab = Vocabulary::builtin();
        assert_eq!(names(&vocab, "Google Cloud Platform and SQL"), vec!["GCP", "SQL"]);
        assert_eq!(names(&vocab, "deep learning"), vec!["Deep Learning"]);
    }

    #[test]
    fn test_single_letter_skill_needs_whole_token() {
        let vocab = Vocabulary::builtin();
        assert_eq!(names(&vocab, "R and Python"), vec!["R", "Python"]);
        assert!(names(&vocab, "Based in Rwanda, R&D team").is_empty());
        // lower-case "r" is not the language
        assert!(names(&vocab, "r").is_empty());
        assert_eq!(names(&vocab, "r programming"), vec!["R"]);
    }

    #[test]
    fn test_word_like_skills_need_a_capital() {
        let vocab = Vocabulary::builtin();
        assert_eq!(names(&vocab, "Advanced Excel"), vec!["Excel"]);
        assert_eq!(names(&vocab, "ADVANCED EXCEL AND SPARK"), vec!["Excel", "Spark"]);
        assert_eq!(names(&vocab, "R, Python"), vec!["R", "Python"]);
        assert!(names(&vocab, "r and d budget").is_empty());
        assert!(names(&vocab, "you will excel in a fast team").is_empty());
        assert!(names(&vocab, "spark curiosity").is_empty());
    }

    #[test]
    fn test_slash_compounds_are_split() {
        let vocab = Vocabulary::builtin();
        assert_eq!(names(&vocab, "Tableau/Looker"), vec!["Tableau", "Looker"]);
        assert_eq!(names(&vocab, "PL/SQL"), vec!["SQL"]);
        assert_eq!(names(&vocab, "A/B testing"), vec!["A/B Testing"]);
    }

    #[test]
    fn test_config_extends_dictionary() {
        let config = VocabularyConfig {
            extra_skills: vec![ExtraSkill {
                name: "Metabase".to_string(),
                category: Some("BI Tool".to_string()),
            }],
            synonyms: [("metabase cloud".to_string(), "Metabase".to_string())]
                .into_iter()
                .collect(),
        };
        let vocab = Vocabulary::from_config(&config).unwrap();
        assert_eq!(vocab.len(), Vocabulary::builtin().len() + 1);
        assert_eq!(vocab.category_of("metabase"), "BI Tool");
        assert_eq!(vocab.normalize("Metabase Cloud").unwrap().name, "Metabase");

        let bad = VocabularyConfig {
            extra_skills: vec![],
            synonyms: [("foo".to_string(), "Nonexistent".to_string())].into_iter().collect(),
        };
        assert!(Vocabulary::from_config(&bad).is_err());
    }

    #[test]
    fn test_leading_and_trailing_skill() {
        let vocab = Vocabulary::builtin();
        assert_eq!(vocab.leading_skill("Power BI and SQL").unwrap().name, "Power BI");
        assert_eq!(vocab.trailing_skill("hands on Power BI").unwrap().name, "Power BI");
        assert!(vocab.leading_skill("experience").is_none());
    }
}
