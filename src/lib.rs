pub mod api;
pub mod config;
pub mod domain;
pub mod enrich;
pub mod executor;
pub mod fetch;
pub mod harvest;
pub mod model;
pub mod report;
pub mod store;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use model::*;
pub use traits::*;

pub use config::{ConfigError, HarvesterConfig};
pub use domain::normalize_domain;
pub use harvest::{JobHandle, JobOrchestrator, JobPhase, JobStatus, OrchestratorError};
pub use report::{Report, ReportExporter};
pub use store::{EntityStore, MemoryEntityStore, StoreError};
