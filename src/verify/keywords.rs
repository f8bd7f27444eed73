//! Keyword tables and the description matcher.
//!
//! The tables are data: the matcher consults them, the verification state
//! machine never does.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Default alert keywords.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "intruder",
    "fire",
    "smoke",
    "fallen",
    "violence",
    "theft",
    "suspicious",
    "danger",
    "emergency",
    "unusual",
    "abnormal",
    "alert",
    "warning",
    "person",
    "breaking",
    "weapon",
    "fight",
    "accident",
];

/// Word -> canonical keyword.
pub const SYNONYMS: &[(&str, &str)] = &[
    ("man", "person"),
    ("men", "person"),
    ("woman", "person"),
    ("women", "person"),
    ("persons", "person"),
    ("people", "person"),
    ("human", "person"),
    ("humans", "person"),
    ("individual", "person"),
    ("individuals", "person"),
    ("male", "person"),
    ("female", "person"),
    ("guy", "person"),
    ("guys", "person"),
    ("lady", "person"),
    ("ladies", "person"),
    ("gentleman", "person"),
    ("gentlemen", "person"),
    ("boy", "person"),
    ("boys", "person"),
    ("girl", "person"),
    ("girls", "person"),
    ("child", "person"),
    ("children", "person"),
    ("adult", "person"),
    ("adults", "person"),
    ("pedestrian", "person"),
    ("intruders", "intruder"),
    ("burglar", "intruder"),
    ("trespasser", "intruder"),
    ("flames", "fire"),
    ("burning", "fire"),
    ("smoking", "smoke"),
    ("thief", "theft"),
    ("stealing", "theft"),
    ("gun", "weapon"),
    ("knife", "weapon"),
    ("weapons", "weapon"),
    ("fighting", "fight"),
];

/// Phrases that mark a description as an explicit all-clear.
pub const BENIGN_PHRASES: &[&str] = &[
    "no anomaly",
    "no anomalies",
    "nothing unusual",
    "appears normal",
    "everything looks normal",
];

/// Result of scanning one description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeywordScan {
    /// The description states that nothing is wrong.
    Benign,
    /// Canonical keywords found (possibly empty).
    Matched(BTreeSet<String>),
}

/// Case-insensitive, whole-word matcher over a configured keyword set plus
/// the synonym table.
#[derive(Clone, Debug)]
pub struct KeywordMatcher {
    pattern: Regex,
    canonical: HashMap<String, String>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let keywords: BTreeSet<String> = keywords
            .iter()
            .map(|k| normalize(k.as_ref()))
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(anyhow!("keyword set must not be empty"));
        }

        let mut canonical: HashMap<String, String> =
            keywords.iter().map(|k| (k.clone(), k.clone())).collect();
        for (word, target) in SYNONYMS {
            if keywords.contains(*target) {
                canonical
                    .entry((*word).to_string())
                    .or_insert_with(|| (*target).to_string());
            }
        }

        let mut terms: Vec<&String> = canonical.keys().collect();
        // Longest first so multi-word keywords win over their parts.
        terms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = terms
            .iter()
            .map(|term| regex::escape(term).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
            .map_err(|e| anyhow!("invalid keyword pattern: {}", e))?;

        Ok(Self { pattern, canonical })
    }

    pub fn scan(&self, description: &str) -> KeywordScan {
        let lowered = normalize(description);
        if BENIGN_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
            return KeywordScan::Benign;
        }
        let matched = self
            .pattern
            .find_iter(&lowered)
            .filter_map(|m| self.canonical.get(&normalize(m.as_str())).cloned())
            .collect();
        KeywordScan::Matched(matched)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
