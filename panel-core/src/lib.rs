//! Panel Orchestration Core
//!
//! Certificate lifecycle, backups, encrypted secret storage and the
//! scheduler that runs them in the background.

pub mod backup;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod process;
pub mod scheduler;
pub mod ssl;
pub mod utils;
pub mod workload;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types
pub use backup::{Backup, BackupKind, BackupManager};
pub use clock::{Clock, SystemClock};
pub use config::Config;
pub use crypto::EncryptionCodec;
pub use process::{ProcessRunner, TokioProcessRunner};
pub use scheduler::Scheduler;
pub use ssl::CertificateLifecycleManager;
pub use utils::errors::OrchestratorError;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
