//! Shared Vocabulary Types
//!
//! Small enums used by both the orchestration services and the event stream:
//! conversation stages, model tiers, and cache lookup modes.

use serde::{Deserialize, Serialize};

/// Conversation-level stage governing how much orchestration a turn gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStage {
    /// Light-weight turns, no orchestration analysis
    Exploration,
    /// Full planner + executor pipeline
    OrchestratedGathering,
    /// Final synthesis requested by the caller
    Synthesis,
}

impl Default for ConversationStage {
    fn default() -> Self {
        ConversationStage::Exploration
    }
}

impl std::fmt::Display for ConversationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationStage::Exploration => write!(f, "exploration"),
            ConversationStage::OrchestratedGathering => write!(f, "orchestrated_gathering"),
            ConversationStage::Synthesis => write!(f, "synthesis"),
        }
    }
}

impl ConversationStage {
    /// Parse stage from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exploration" | "explore" => Some(ConversationStage::Exploration),
            "orchestrated_gathering" | "gathering" => {
                Some(ConversationStage::OrchestratedGathering)
            }
            "synthesis" => Some(ConversationStage::Synthesis),
            _ => None,
        }
    }
}

/// Backing model tier for a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Cheap,
    Standard,
    Premium,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Cheap => write!(f, "cheap"),
            ModelTier::Standard => write!(f, "standard"),
            ModelTier::Premium => write!(f, "premium"),
        }
    }
}

impl ModelTier {
    /// Parse tier from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cheap" => Some(ModelTier::Cheap),
            "standard" => Some(ModelTier::Standard),
            "premium" => Some(ModelTier::Premium),
            _ => None,
        }
    }

    /// The next cheaper tier, or `None` for Cheap.
    pub fn degrade(self) -> Option<Self> {
        match self {
            ModelTier::Premium => Some(ModelTier::Standard),
            ModelTier::Standard => Some(ModelTier::Cheap),
            ModelTier::Cheap => None,
        }
    }

    /// All tiers, cheapest first.
    pub fn all() -> [ModelTier; 3] {
        [ModelTier::Cheap, ModelTier::Standard, ModelTier::Premium]
    }
}

/// How a cache lookup was (or was not) satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    /// Normalized key matched
    Exact,
    /// Embedding similarity above threshold matched
    Semantic,
    /// A semantic lookup degraded to exact matching (no embedder)
    ExactFallback,
    /// Nothing matched
    Miss,
    /// The cache was not consulted (disabled or not cacheable)
    Bypass,
}

impl std::fmt::Display for LookupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupMode::Exact => write!(f, "exact"),
            LookupMode::Semantic => write!(f, "semantic"),
            LookupMode::ExactFallback => write!(f, "exact_fallback"),
            LookupMode::Miss => write!(f, "miss"),
            LookupMode::Bypass => write!(f, "bypass"),
        }
    }
}
