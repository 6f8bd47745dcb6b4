//! Analytics Service
//!
//! Per-provider latency profiling for the call path.

mod profiler;

pub use profiler::{Profiler, ProviderProfile};
