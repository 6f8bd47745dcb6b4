//! Conversation Context
//!
//! The caller-supplied key/value input for one turn. The orchestration core
//! treats it as opaque: it reads the handful of flags it needs (`mode`,
//! `deepReflection`, `critical`, `turnCount`, `complexityHints`,
//! `problemIdentified`) and keeps everything else in `extra` untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreResult;

/// Default caller identity when the context does not name one.
pub const DEFAULT_CALLER: &str = "default";

/// Per-turn conversation context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvContext {
    /// Conversation identifier (stage state and speculation are keyed by it)
    pub conversation_id: String,
    /// Caller identity for per-caller budget accounting
    pub caller_id: Option<String>,
    /// Conversation mode, e.g. "routine" or "deep"
    pub mode: Option<String>,
    /// Quality-critical reflection requested
    pub deep_reflection: bool,
    /// Safety/critical flag: always premium, never refused for budget
    pub critical: bool,
    /// Number of turns so far in this conversation (1-based)
    pub turn_count: u32,
    /// Caller-provided complexity hints
    pub complexity_hints: Vec<String>,
    /// External signal that a concrete problem has been identified
    pub problem_identified: bool,
    /// Everything else, passed through untouched
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ConvContext {
    /// Create a context for a conversation at a given turn.
    pub fn new(conversation_id: impl Into<String>, turn_count: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turn_count,
            ..Default::default()
        }
    }

    /// Parse a context from an opaque JSON object.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Set the conversation mode.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Set the caller identity.
    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller_id = Some(caller.into());
        self
    }

    /// Request deep reflection.
    pub fn with_deep_reflection(mut self, on: bool) -> Self {
        self.deep_reflection = on;
        self
    }

    /// Mark the turn as safety-critical.
    pub fn with_critical(mut self, on: bool) -> Self {
        self.critical = on;
        self
    }

    /// Mark that a concrete problem has been identified.
    pub fn with_problem_identified(mut self, on: bool) -> Self {
        self.problem_identified = on;
        self
    }

    /// Add a complexity hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.complexity_hints.push(hint.into());
        self
    }

    /// The caller id, or [`DEFAULT_CALLER`].
    pub fn caller(&self) -> &str {
        self.caller_id.as_deref().unwrap_or(DEFAULT_CALLER)
    }

    /// Whether the mode equals `name` (case-insensitive).
    pub fn mode_is(&self, name: &str) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case(name))
    }

    /// Whether an active deep mode forces the slow path.
    pub fn is_deep(&self) -> bool {
        self.deep_reflection || self.mode_is("deep")
    }
}
