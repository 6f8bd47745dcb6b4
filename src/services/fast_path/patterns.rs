//! Pattern Detection
//!
//! Recognizes turns that do not need the full pipeline. Complexity markers
//! are checked first and always win, so "hi, can you analyze this incident"
//! is never answered from a template.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern families, in the order they are tried after complexity markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    Greeting,
    Acknowledgement,
    SimpleQuestion,
    /// Explicit complexity marker; always routed to the slow path
    Complex,
}

impl std::fmt::Display for PatternFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternFamily::Greeting => write!(f, "greeting"),
            PatternFamily::Acknowledgement => write!(f, "acknowledgement"),
            PatternFamily::SimpleQuestion => write!(f, "simple_question"),
            PatternFamily::Complex => write!(f, "complex"),
        }
    }
}

/// A detected pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub family: PatternFamily,
    /// Pattern id used for templates and speculation statistics
    pub pattern: String,
    /// Matched text
    pub matched: String,
}

impl PatternMatch {
    pub fn new(family: PatternFamily, matched: impl Into<String>) -> Self {
        Self {
            family,
            pattern: family.to_string(),
            matched: matched.into(),
        }
    }
}

/// Detects fast-path patterns in a query.
pub trait PatternMatcher: Send + Sync {
    fn name(&self) -> &str;

    /// First matching pattern, or `None` when the query fits no family.
    fn detect(&self, query: &str) -> Option<PatternMatch>;
}

/// Regex sources for each family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(default = "default_greetings")]
    pub greeting: Vec<String>,
    #[serde(default = "default_acknowledgements")]
    pub acknowledgement: Vec<String>,
    #[serde(default = "default_simple_questions")]
    pub simple_question: Vec<String>,
    #[serde(default = "default_complex_markers")]
    pub complex_markers: Vec<String>,
    /// Longer queries never count as simple questions
    #[serde(default = "default_max_simple_words")]
    pub max_simple_words: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_greetings() -> Vec<String> {
    strings(&[
        r"(?i)^\s*(hi|hello|hey|hiya|howdy|greetings)(\s+there)?\s*[!.,]*\s*$",
        r"(?i)^\s*good\s+(morning|afternoon|evening)\s*[!.,]*\s*$",
    ])
}

fn default_acknowledgements() -> Vec<String> {
    strings(&[
        r"(?i)^\s*(thanks|thank you|thx|ty)(\s+(so much|a lot))?\s*[!.,]*\s*$",
        r"(?i)^\s*(ok|okay|got it|sounds good|great|cool|perfect|alright|understood)\s*[!.,]*\s*$",
        r"(?i)^\s*(yes|no|sure|yep|nope)\s*[!.,]*\s*$",
    ])
}

fn default_simple_questions() -> Vec<String> {
    strings(&[
        r"(?i)^\s*(what|who|when|where)\s+(is|are|was|can)\b[^?]*\?\s*$",
        r"(?i)^\s*(can|could)\s+you\s+(help|tell)\b[^?]*\??\s*$",
    ])
}

fn default_complex_markers() -> Vec<String> {
    strings(&[
        r"(?i)\b(analy[sz]e|investigate|debug|diagnose|compare|evaluate)\b",
        r"(?i)\b(step[- ]by[- ]step|in detail|thoroughly|deep dive)\b",
        r"(?i)\b(why|how come)\b",
        r"(?i)\b(strategy|architecture|root cause|trade-?offs?)\b",
    ])
}

fn default_max_simple_words() -> usize {
    12
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            greeting: default_greetings(),
            acknowledgement: default_acknowledgements(),
            simple_question: default_simple_questions(),
            complex_markers: default_complex_markers(),
            max_simple_words: default_max_simple_words(),
        }
    }
}

impl PatternConfig {
    pub fn validate(&self) -> Result<(), String> {
        for source in self
            .greeting
            .iter()
            .chain(&self.acknowledgement)
            .chain(&self.simple_question)
            .chain(&self.complex_markers)
        {
            Regex::new(source).map_err(|e| format!("invalid pattern '{}': {}", source, e))?;
        }
        Ok(())
    }
}

/// Default regex-based matcher.
pub struct RegexPatternMatcher {
    greeting: Vec<Regex>,
    acknowledgement: Vec<Regex>,
    simple_question: Vec<Regex>,
    complex: Vec<Regex>,
    max_simple_words: usize,
}

impl Default for RegexPatternMatcher {
    fn default() -> Self {
        Self::new(&PatternConfig::default())
    }
}

impl RegexPatternMatcher {
    pub fn new(config: &PatternConfig) -> Self {
        Self {
            greeting: Self::compile(&config.greeting),
            acknowledgement: Self::compile(&config.acknowledgement),
            simple_question: Self::compile(&config.simple_question),
            complex: Self::compile(&config.complex_markers),
            max_simple_words: config.max_simple_words,
        }
    }

    fn compile(sources: &[String]) -> Vec<Regex> {
        sources
            .iter()
            .filter_map(|source| match Regex::new(source) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "Skipping invalid fast-path pattern");
                    None
                }
            })
            .collect()
    }

    fn first_match(patterns: &[Regex], query: &str) -> Option<String> {
        patterns
            .iter()
            .find_map(|regex| regex.find(query).map(|m| m.as_str().trim().to_string()))
    }
}

impl PatternMatcher for RegexPatternMatcher {
    fn name(&self) -> &str {
        "regex"
    }

    fn detect(&self, query: &str) -> Option<PatternMatch> {
        if let Some(matched) = Self::first_match(&self.complex, query) {
            return Some(PatternMatch::new(PatternFamily::Complex, matched));
        }
        if let Some(matched) = Self::first_match(&self.greeting, query) {
            return Some(PatternMatch::new(PatternFamily::Greeting, matched));
        }
        if let Some(matched) = Self::first_match(&self.acknowledgement, query) {
            return Some(PatternMatch::new(PatternFamily::Acknowledgement, matched));
        }
        if query.split_whitespace().count() <= self.max_simple_words {
            if let Some(matched) = Self::first_match(&self.simple_question, query) {
                return Some(PatternMatch::new(PatternFamily::SimpleQuestion, matched));
            }
        }
        None
    }
}
