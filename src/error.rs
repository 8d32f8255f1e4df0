//! Error types for joblink
//!
//! Exit codes:
//! - 0: Success (including soft "already recorded" outcomes)
//! - 2: User error (bad args, missing environment, failed validation)
//! - 3: Blocked by policy (priority lock, role gating, signed out)
//! - 4: Operation failed (backend request, local state I/O)

use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the joblink CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// PostgREST reports unique constraint violations with this SQLSTATE.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Main error type for joblink operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    // Policy blocks (exit code 3)
    #[error("Finish high priority tasks first: {0} is not high priority")]
    PriorityLocked(String),

    #[error("Permission denied: {0} is not available to this role")]
    PermissionDenied(&'static str),

    #[error("Not signed in")]
    NotSignedIn,

    // Soft outcome (exit code 0)
    #[error("Already recorded: {0}")]
    AlreadyRecorded(String),

    // Operation failures (exit code 4)
    #[error("Backend error ({status}): {message}")]
    Backend {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::MissingEnv(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_)
            | Error::Validation(_)
            | Error::TaskNotFound(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::PriorityLocked(_) | Error::PermissionDenied(_) | Error::NotSignedIn => {
                exit_codes::POLICY_BLOCKED
            }

            Error::AlreadyRecorded(_) => exit_codes::SUCCESS,

            // Operation failures
            Error::Backend { .. }
            | Error::Http(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// The backend rejected the access token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Backend { status: 401, .. })
    }

    /// Build a backend error, recognising duplicate submissions.
    pub fn from_backend(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        if code.as_deref() == Some(UNIQUE_VIOLATION_CODE) {
            return Error::AlreadyRecorded(message);
        }
        Error::Backend {
            status,
            code,
            message,
        }
    }

    /// Structured details for JSON output, when the error carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::Backend {
                status,
                code,
                message,
            } => Some(serde_json::json!({
                "status": status,
                "code": code,
                "message": message,
            })),
            Error::MissingEnv(name) => Some(serde_json::json!({ "variable": name })),
            Error::InvalidConfig(message) | Error::Validation(message) => {
                Some(serde_json::json!({ "message": message }))
            }
            Error::PriorityLocked(task_id) | Error::TaskNotFound(task_id) => {
                Some(serde_json::json!({ "task_id": task_id }))
            }
            Error::LockFailed(path) => {
                Some(serde_json::json!({ "path": path.to_string_lossy() }))
            }
            _ => None,
        }
    }
}

/// Result type alias for joblink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
