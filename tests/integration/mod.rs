//! Integration Tests Module
//!
//! End-to-end tests for the orchestration core: planning, parallel
//! execution, caching, budget-aware tier selection, stage transitions, the
//! fast path with speculation, and the full turn pipeline.
//!
//! All providers are in-process mocks; no network calls are made.

// Shared mock providers
mod common;

// Dependency graph and phase planning
mod planner_test;

// Parallel execution, timeouts and failure isolation
mod executor_test;


// Tier selection and the daily budget ledger
mod budget_test;

// Conversation stage transitions
mod stage_test;

// Fast-path routing and speculation
mod fast_path_test;

// Full turn pipeline
mod pipeline_test;

// Config files
mod config_test;
