//! Utility modules for the orchestration core.

pub mod errors;
pub mod logger;

pub use errors::{OrchestratorError, Result};
