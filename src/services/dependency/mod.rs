//! Dependency Planning Module
//!
//! Turns provider dependency edges into ordered phases of concurrently
//! runnable providers, with cycle and unknown-provider detection.

mod graph;

pub use graph::{DependencyGraph, ExecutionPlan, Phase};
