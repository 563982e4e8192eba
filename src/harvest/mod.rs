//! Harvest module - concurrent organization collection.
//!
//! This module provides the core abstractions for a harvest job:
//! - **Traits**: [`SourceCollector`] and the [`CandidateStream`] it yields
//! - **Sources**: the maps-search, code-forge and social-feed collectors
//! - **Errors**: [`CollectError`], the terminal item of a stopped source
//! - **Orchestration**: one-job-at-a-time executor via [`pipeline::JobOrchestrator`]

pub mod pipeline;
pub mod sources;
pub mod traits;

// Re-export commonly used types
pub use traits::{CandidateStream, CollectError, SourceCollector};

pub use pipeline::{
    JobHandle, JobOrchestrator, JobPhase, JobProgress, JobStatus, OrchestratorError,
    SourceFailure,
};
