//! Query Complexity Classifier
//!
//! Rule-based scoring of a query into simple / medium / complex. Signals are
//! configurable regex fragments; each fragment is matched on word
//! boundaries, case-insensitively.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Complexity level of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Medium => write!(f, "medium"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// Signal lists and score cut-offs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityConfig {
    /// Domain words that indicate deep work
    #[serde(default = "default_complex_keywords")]
    pub complex_keywords: Vec<String>,
    /// Phrases that indicate an open or ambiguous question
    #[serde(default = "default_ambiguity_markers")]
    pub ambiguity_markers: Vec<String>,
    /// Phrases that chain several requests together
    #[serde(default = "default_clause_markers")]
    pub clause_markers: Vec<String>,
    /// Word count from which a query counts as long
    #[serde(default = "default_long_query_words")]
    pub long_query_words: usize,
    /// Word count from which a query counts as non-trivial
    #[serde(default = "default_medium_query_words")]
    pub medium_query_words: usize,
    /// Minimum score for medium
    #[serde(default = "default_medium_score")]
    pub medium_score: u32,
    /// Minimum score for complex
    #[serde(default = "default_complex_score")]
    pub complex_score: u32,
}

fn default_complex_keywords() -> Vec<String> {
    [
        r"architect(?:ure|ural|ing)?",
        r"design",
        r"strateg(?:y|ic|ies)",
        r"analy[sz](?:e|is|ing)",
        r"comprehensive",
        r"trade-?offs?",
        r"migrat(?:e|ion|ing)",
        r"root cause",
        r"end-to-end",
        r"multi-step",
        r"roadmap",
        r"plan",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ambiguity_markers() -> Vec<String> {
    [
        r"not sure",
        r"maybe",
        r"either",
        r"or should",
        r"unclear",
        r"compare",
        r"versus",
        r"pros and cons",
        r"which (?:one|option|approach)",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_clause_markers() -> Vec<String> {
    [
        r"and then",
        r"after that",
        r"also",
        r"as well as",
        r"in addition",
        r"finally",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_long_query_words() -> usize {
    40
}

fn default_medium_query_words() -> usize {
    12
}

fn default_medium_score() -> u32 {
    2
}

fn default_complex_score() -> u32 {
    4
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            complex_keywords: default_complex_keywords(),
            ambiguity_markers: default_ambiguity_markers(),
            clause_markers: default_clause_markers(),
            long_query_words: default_long_query_words(),
            medium_query_words: default_medium_query_words(),
            medium_score: default_medium_score(),
            complex_score: default_complex_score(),
        }
    }
}

impl ComplexityConfig {
    pub fn validate(&self) -> Result<(), String> {
        for fragment in self
            .complex_keywords
            .iter()
            .chain(&self.ambiguity_markers)
            .chain(&self.clause_markers)
        {
            word_pattern(fragment)
                .map_err(|e| format!("invalid complexity pattern '{}': {}", fragment, e))?;
        }
        if self.medium_query_words > self.long_query_words {
            return Err("medium_query_words must not exceed long_query_words".to_string());
        }
        if self.medium_score > self.complex_score {
            return Err("medium_score must not exceed complex_score".to_string());
        }
        Ok(())
    }
}

/// Outcome of classifying one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAssessment {
    pub level: Complexity,
    pub score: u32,
    /// Names of the signals that contributed
    pub signals: Vec<String>,
}

/// Compile a fragment as a case-insensitive, word-bounded regex.
pub(crate) fn word_pattern(fragment: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?i)\b(?:{})\b", fragment))
}

fn compile_list(fragments: &[String]) -> Vec<Regex> {
    fragments
        .iter()
        .filter_map(|f| match word_pattern(f) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern = %f, error = %e, "Skipping invalid complexity pattern");
                None
            }
        })
        .collect()
}

/// Rule-based complexity classifier.
pub struct ComplexityClassifier {
    config: ComplexityConfig,
    keywords: Vec<Regex>,
    ambiguity: Vec<Regex>,
    clauses: Vec<Regex>,
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new(ComplexityConfig::default())
    }
}

impl ComplexityClassifier {
    pub fn new(config: ComplexityConfig) -> Self {
        Self {
            keywords: compile_list(&config.complex_keywords),
            ambiguity: compile_list(&config.ambiguity_markers),
            clauses: compile_list(&config.clause_markers),
            config,
        }
    }

    /// Classify a query, taking caller hints into account.
    pub fn classify(&self, query: &str, hints: &[String]) -> ComplexityAssessment {
        let mut score = 0u32;
        let mut signals = Vec::new();

        let keyword_hits = self.keywords.iter().filter(|r| r.is_match(query)).count();
        if keyword_hits > 0 {
            score += if keyword_hits >= 2 { 3 } else { 2 };
            signals.push(format!("{} complexity keyword(s)", keyword_hits));
        }

        if self.ambiguity.iter().any(|r| r.is_match(query)) {
            score += 1;
            signals.push("ambiguity marker".to_string());
        }

        let clause_hits = self.clauses.iter().filter(|r| r.is_match(query)).count();
        if clause_hits > 0 {
            score += clause_hits.min(2) as u32;
            signals.push(format!("{} chained clause(s)", clause_hits));
        }

        let words = query.split_whitespace().count();
        if words >= self.config.long_query_words {
            score += 2;
            signals.push(format!("long query ({} words)", words));
        } else if words >= self.config.medium_query_words {
            score += 1;
            signals.push(format!("{} words", words));
        }

        if query.matches('?').count() >= 2 {
            score += 1;
            signals.push("multiple questions".to_string());
        }

        if !hints.is_empty() {
            score += hints.len().min(2) as u32;
            signals.push(format!("hints: {}", hints.join(", ")));
        }

        let level = if score >= self.config.complex_score {
            Complexity::Complex
        } else if score >= self.config.medium_score {
            Complexity::Medium
        } else {
            Complexity::Simple
        };

        ComplexityAssessment {
            level,
            score,
            signals,
        }
    }
}
