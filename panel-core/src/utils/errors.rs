//! Error taxonomy shared by every orchestration component.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{program} failed (exit code {code:?}): {stderr}")]
    ProcessExecution {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid encrypted data format: {0}")]
    Format(String),

    #[error("Authentication failed - data may have been tampered with or the key is wrong")]
    Authentication,

    #[error("Failed to decrypt data: {0}")]
    Decryption(String),

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("No source available: {0}")]
    NoSource(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn process(program: impl Into<String>, code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::ProcessExecution {
            program: program.into(),
            code,
            stderr: stderr.into(),
        }
    }

    /// Stable machine-readable code for the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProcessExecution { .. } => "PROCESS_EXECUTION_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Format(_) => "INVALID_ENCRYPTED_FORMAT",
            Self::Authentication => "AUTHENTICATION_FAILED",
            Self::Decryption(_) => "DECRYPTION_FAILED",
            Self::Verification(_) => "VERIFICATION_FAILED",
            Self::NoSource(_) => "NO_SOURCE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InvalidConnectionString(_) => "INVALID_CONNECTION_STRING",
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::NoSource(_) => 422,
            Self::Format(_) | Self::InvalidInput(_) | Self::InvalidConnectionString(_) => 400,
            Self::ProcessExecution { .. } | Self::Verification(_) => 502,
            _ => 500,
        }
    }

    /// Message safe to show to API clients. Internal kinds are collapsed so
    /// paths, stderr and key material never leave the process.
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound(_) | Self::NoSource(_) | Self::Format(_) | Self::InvalidInput(_) => {
                self.to_string()
            }
            Self::ProcessExecution { program, .. } => format!("{program} failed"),
            Self::Verification(_) => "Expected output artifacts are missing".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let err = OrchestratorError::NotFound("backup x".into());
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(err.http_status(), 404);

        let err = OrchestratorError::process("pg_dump", Some(1), "connection refused");
        assert_eq!(err.code(), "PROCESS_EXECUTION_FAILED");
        assert_eq!(err.http_status(), 502);
        assert_eq!(err.public_message(), "pg_dump failed");
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let err = OrchestratorError::Persistence("UNIQUE constraint failed: domains.name".into());
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.public_message(), "Internal server error");
    }
}
