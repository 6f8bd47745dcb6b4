//! Response templates for fast-path patterns.
//!
//! Templates may contain `{name}` placeholders filled from the turn's
//! parameters. A placeholder without a value is dropped together with the
//! whitespace in front of it, so "Hello {name}!" renders as "Hello!".

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"(\s*)\{([A-Za-z_][A-Za-z0-9_]*)\}").ok())
        .as_ref()
}

/// Default templates keyed by pattern id.
pub fn default_templates() -> BTreeMap<String, Vec<String>> {
    let mut templates = BTreeMap::new();
    templates.insert(
        "greeting".to_string(),
        vec![
            "Hello {name}! How can I help you today?".to_string(),
            "Hi {name}! What would you like to work on?".to_string(),
        ],
    );
    templates.insert(
        "acknowledgement".to_string(),
        vec![
            "You're welcome! Let me know if there's anything else.".to_string(),
            "Glad that helps. Anything else on your mind?".to_string(),
        ],
    );
    templates
}

/// Templates per pattern id.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, Vec<String>>,
}

impl TemplateSet {
    pub fn new(templates: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .filter(|(_, variants)| !variants.is_empty())
                .collect(),
        }
    }

    /// Whether a pattern has at least one template.
    pub fn has(&self, pattern: &str) -> bool {
        self.templates.get(pattern).is_some_and(|v| !v.is_empty())
    }

    /// Render variant `variant` (modulo the variant count) of a pattern.
    pub fn render(
        &self,
        pattern: &str,
        variant: usize,
        params: &HashMap<String, String>,
    ) -> Option<String> {
        let variants = self.templates.get(pattern)?;
        let template = variants.get(variant % variants.len().max(1))?;
        Some(fill(template, params))
    }
}

/// Substitute `{name}` placeholders.
pub fn fill(template: &str, params: &HashMap<String, String>) -> String {
    let Some(regex) = placeholder() else {
        return template.to_string();
    };
    regex
        .replace_all(template, |caps: &Captures| match params.get(&caps[2]) {
            Some(value) if !value.trim().is_empty() => format!("{}{}", &caps[1], value.trim()),
            _ => String::new(),
        })
        .into_owned()
}
