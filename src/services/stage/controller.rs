//! Stage Controller
//!
//! Per-conversation state machine deciding how much orchestration a turn
//! gets. Conversations start in Exploration, move to OrchestratedGathering
//! once a turn looks complex enough, and reach Synthesis only on an explicit
//! request. Stages never move backwards; `reset` starts a conversation over.
//!
//! Turns below `min_turns` never reach the keyword heuristic at all. The
//! analysis counter makes that observable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use cascade_core::{ConvContext, ConversationStage, CoreResult, EventSink, OrchestrationEvent};

use crate::services::cost::complexity::word_pattern;
use crate::services::dependency::{DependencyGraph, ExecutionPlan};

// ============================================================================
// Configuration
// ============================================================================

/// Providers consulted in one stage, with their ordering constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProviders {
    #[serde(default)]
    pub providers: Vec<String>,
    /// dependent -> providers it waits for
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl StageProviders {
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            providers: providers.into_iter().map(Into::into).collect(),
            dependencies: BTreeMap::new(),
        }
    }

    pub fn with_dependency(mut self, dependent: impl Into<String>, depends_on: impl Into<String>) -> Self {
        self.dependencies
            .entry(dependent.into())
            .or_default()
            .push(depends_on.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Dependency graph over this stage's providers.
    pub fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for provider in &self.providers {
            graph.add_provider(provider.as_str());
        }
        for (dependent, deps) in &self.dependencies {
            for dep in deps {
                graph.add_dependency(dependent.as_str(), dep.as_str());
            }
        }
        graph
    }

    /// Execution plan for this stage.
    pub fn plan(&self) -> CoreResult<ExecutionPlan> {
        self.graph().build_plan()
    }
}

/// Stage controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Turns a conversation needs before gathering is considered
    #[serde(default = "default_min_turns")]
    pub min_turns: u32,
    /// Regex fragments (word-bounded, case-insensitive) that mark a turn as
    /// worth orchestrating
    #[serde(default = "default_gathering_keywords")]
    pub gathering_keywords: Vec<String>,
    #[serde(default = "default_exploration")]
    pub exploration: StageProviders,
    #[serde(default = "default_gathering")]
    pub gathering: StageProviders,
    #[serde(default = "default_synthesis")]
    pub synthesis: StageProviders,
}

fn default_min_turns() -> u32 {
    3
}

fn default_gathering_keywords() -> Vec<String> {
    [
        r"problem",
        r"issue",
        r"bug",
        r"broken",
        r"fail(?:s|ed|ing|ure)?",
        r"error",
        r"investigate",
        r"debug",
        r"research",
        r"analy[sz](?:e|is)",
        r"compare",
        r"strategy",
        r"root cause",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exploration() -> StageProviders {
    StageProviders::new(["memory"])
}

fn default_gathering() -> StageProviders {
    StageProviders::new(["memory", "profileLookup", "research", "synthesize"])
        .with_dependency("synthesize", "memory")
        .with_dependency("synthesize", "profileLookup")
        .with_dependency("synthesize", "research")
}

fn default_synthesis() -> StageProviders {
    StageProviders::new(["memory", "report"]).with_dependency("report", "memory")
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            min_turns: default_min_turns(),
            gathering_keywords: default_gathering_keywords(),
            exploration: default_exploration(),
            gathering: default_gathering(),
            synthesis: default_synthesis(),
        }
    }
}

impl StageConfig {
    /// Providers of a stage.
    pub fn providers(&self, stage: ConversationStage) -> &StageProviders {
        match stage {
            ConversationStage::Exploration => &self.exploration,
            ConversationStage::OrchestratedGathering => &self.gathering,
            ConversationStage::Synthesis => &self.synthesis,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for fragment in &self.gathering_keywords {
            word_pattern(fragment)
                .map_err(|e| format!("invalid gathering keyword '{}': {}", fragment, e))?;
        }
        for stage in [
            ConversationStage::Exploration,
            ConversationStage::OrchestratedGathering,
            ConversationStage::Synthesis,
        ] {
            self.providers(stage)
                .plan()
                .map_err(|e| format!("{} providers: {}", stage, e))?;
        }
        Ok(())
    }
}

// ============================================================================
// Decision
// ============================================================================

/// What the controller decided for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDecision {
    pub conversation_id: String,
    pub previous: ConversationStage,
    pub stage: ConversationStage,
    pub reason: String,
    /// Whether the keyword heuristic ran for this turn
    pub analyzed: bool,
}

impl StageDecision {
    pub fn transitioned(&self) -> bool {
        self.previous != self.stage
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Per-conversation stage tracking.
pub struct StageController {
    config: StageConfig,
    keywords: Vec<Regex>,
    conversations: DashMap<String, ConversationStage>,
    analyses: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl StageController {
    pub fn new(config: StageConfig, events: Arc<dyn EventSink>) -> Self {
        let keywords = config
            .gathering_keywords
            .iter()
            .filter_map(|fragment| match word_pattern(fragment) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    tracing::warn!(pattern = %fragment, error = %e, "Skipping invalid gathering keyword");
                    None
                }
            })
            .collect();

        Self {
            config,
            keywords,
            conversations: DashMap::new(),
            analyses: AtomicU64::new(0),
            events,
        }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Current stage of a conversation. Unknown conversations are in
    /// Exploration.
    pub fn stage(&self, conversation_id: &str) -> ConversationStage {
        self.conversations
            .get(conversation_id)
            .map(|s| *s.value())
            .unwrap_or_default()
    }

    /// How many turns ran the keyword heuristic.
    pub fn analysis_count(&self) -> u64 {
        self.analyses.load(Ordering::Relaxed)
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    /// Providers configured for a stage.
    pub fn providers_for(&self, stage: ConversationStage) -> &StageProviders {
        self.config.providers(stage)
    }

    /// Execution plan for a stage.
    pub fn plan_for(&self, stage: ConversationStage) -> CoreResult<ExecutionPlan> {
        self.config.providers(stage).plan()
    }

    /// Decide the stage for an incoming turn.
    pub fn evaluate_turn(&self, query: &str, ctx: &ConvContext) -> StageDecision {
        let id = ctx.conversation_id.as_str();
        let current = self.stage(id);

        let (target, reason, analyzed) = match current {
            ConversationStage::Exploration if ctx.turn_count < self.config.min_turns => (
                current,
                format!(
                    "turn {} is below the minimum of {}",
                    ctx.turn_count, self.config.min_turns
                ),
                false,
            ),
            ConversationStage::Exploration => {
                self.analyses.fetch_add(1, Ordering::Relaxed);
                if ctx.problem_identified {
                    (
                        ConversationStage::OrchestratedGathering,
                        "problem identified".to_string(),
                        true,
                    )
                } else if let Some(keyword) = self.matched_keyword(query) {
                    (
                        ConversationStage::OrchestratedGathering,
                        format!("complexity keyword '{}'", keyword),
                        true,
                    )
                } else {
                    (current, "no complexity signal".to_string(), true)
                }
            }
            ConversationStage::OrchestratedGathering => (
                current,
                "gathering until synthesis is requested".to_string(),
                false,
            ),
            ConversationStage::Synthesis => (current, "synthesis in progress".to_string(), false),
        };

        let (previous, stage) = match self.advance(id, target, &reason) {
            Some(from) => (from, target),
            None => {
                let stage = self.stage(id);
                (stage, stage)
            }
        };

        StageDecision {
            conversation_id: id.to_string(),
            previous,
            stage,
            reason,
            analyzed,
        }
    }

    /// Move a conversation to Synthesis.
    ///
    /// Returns `None` when it is already there.
    pub fn request_synthesis(&self, conversation_id: &str) -> Option<StageDecision> {
        let reason = "synthesis requested".to_string();
        let previous = self.advance(conversation_id, ConversationStage::Synthesis, &reason)?;
        Some(StageDecision {
            conversation_id: conversation_id.to_string(),
            previous,
            stage: ConversationStage::Synthesis,
            reason,
            analyzed: false,
        })
    }

    /// Forget a conversation; its next turn starts in Exploration.
    pub fn reset(&self, conversation_id: &str) -> bool {
        let removed = self.conversations.remove(conversation_id).is_some();
        if removed {
            tracing::debug!(conversation = %conversation_id, "Conversation stage reset");
        }
        removed
    }

    fn matched_keyword<'a>(&self, query: &'a str) -> Option<&'a str> {
        self.keywords
            .iter()
            .find_map(|regex| regex.find(query).map(|m| m.as_str()))
    }

    /// Move forward to `to`. Returns the stage left, or `None` when the
    /// conversation is already at or past `to`.
    fn advance(&self, conversation_id: &str, to: ConversationStage, reason: &str) -> Option<ConversationStage> {
        let from = {
            let mut stage = self.conversations.entry(conversation_id.to_string()).or_default();
            if *stage >= to {
                return None;
            }
            let from = *stage;
            *stage = to;
            from
        };

        tracing::info!(
            conversation = %conversation_id,
            from = %from,
            to = %to,
            reason = %reason,
            "Conversation stage transition"
        );
        self.events.emit(OrchestrationEvent::StageTransition {
            conversation_id: conversation_id.to_string(),
            from,
            to,
            reason: reason.to_string(),
        });
        Some(from)
    }
}
