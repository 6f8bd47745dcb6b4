//! Executor Module
//!
//! Runs execution plans against the provider registry.
//! - `parallel` - Phase-by-phase parallel execution with timeouts and isolation
//! - `middleware` - Cache, tier selection, budget and profiling around each call

pub mod middleware;
pub mod parallel;

pub use middleware::{CachedProvider, CallLayers, ProfiledProvider, TieredProvider};
pub use parallel::{ExecutionReport, ExecutorConfig, ParallelExecutor, PhaseFallback, PhaseReport};
