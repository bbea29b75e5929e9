pub mod metrics;
pub mod service;

pub use service::{Orchestrator, OrchestratorConfig};
