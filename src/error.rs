//! Error types for progress-sync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Human-readable user messages for blocking failures
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::gateway::{RemoteError, RemoteErrorKind};
use crate::store::EntityKind;

/// Result type alias for progress-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    EntityNotFound,

    // Validation (exit 4)
    InvalidArgument,
    InvalidStatus,
    MappingError,

    // Remote (exit 5)
    PermissionDenied,
    Conflict,
    Unavailable,
    SchemaDrift,
    RemoteError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidStatus => "INVALID_STATUS",
            Self::MappingError => "MAPPING_ERROR",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Conflict => "CONFLICT",
            Self::Unavailable => "UNAVAILABLE",
            Self::SchemaDrift => "SCHEMA_DRIFT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::EntityNotFound => 3,
            Self::InvalidArgument | Self::InvalidStatus | Self::MappingError => 4,
            Self::PermissionDenied
            | Self::Conflict
            | Self::Unavailable
            | Self::SchemaDrift
            | Self::RemoteError => 5,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether the caller may retry, possibly with corrected input.
    ///
    /// Unavailability is retryable by a human or a higher layer; the
    /// core itself never retries it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument | Self::InvalidStatus | Self::Conflict | Self::Unavailable
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in progress-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `psync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Write to {table} failed after {attempts} attempts (dropped columns: {})", dropped.join(", "))]
    SchemaDriftExhausted {
        table: String,
        attempts: usize,
        dropped: Vec<String>,
    },

    #[error("Cannot map {table} row: {message}")]
    Mapping { table: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a row that could not be mapped to an entity.
    pub fn mapping(table: &str, message: impl Into<String>) -> Self {
        Self::Mapping {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// The remote error kind, if this error came from the gateway.
    #[must_use]
    pub fn remote_kind(&self) -> Option<&RemoteErrorKind> {
        match self {
            Self::Remote(e) => Some(&e.kind),
            _ => None,
        }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::NotFound { .. } => ErrorCode::EntityNotFound,
            Self::Remote(e) => match &e.kind {
                RemoteErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
                RemoteErrorKind::Conflict => ErrorCode::Conflict,
                RemoteErrorKind::Unavailable => ErrorCode::Unavailable,
                RemoteErrorKind::UnknownColumn(_) => ErrorCode::SchemaDrift,
                RemoteErrorKind::Unknown => ErrorCode::RemoteError,
            },
            Self::SchemaDriftExhausted { .. } => ErrorCode::SchemaDrift,
            Self::Mapping { .. } => ErrorCode::MappingError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Http(_) => ErrorCode::Unavailable,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidStatus(_) => ErrorCode::InvalidStatus,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether the presentation layer must block on this error.
    ///
    /// Permission denials usually mean a server-side policy or a missing
    /// migration; the user cannot fix that from the client.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self.remote_kind(), Some(RemoteErrorKind::PermissionDenied))
    }

    /// Human-readable message for the end user.
    ///
    /// Conflicts name the offending field when the store reported it.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Remote(e) => match &e.kind {
                RemoteErrorKind::PermissionDenied => {
                    "You don't have permission to save this change. The server rejected it, \
                     most likely because an access policy or database migration is missing. \
                     Please contact an administrator."
                        .to_string()
                }
                RemoteErrorKind::Conflict => match &e.column {
                    Some(column) => format!(
                        "That {} is already in use. Please choose a different one.",
                        column.replace('_', " ")
                    ),
                    None => "This change conflicts with an existing record.".to_string(),
                },
                RemoteErrorKind::Unavailable => {
                    "The server is unavailable right now. Your change was not saved; \
                     please refresh and try again."
                        .to_string()
                }
                RemoteErrorKind::UnknownColumn(_) | RemoteErrorKind::Unknown => {
                    "Your change could not be saved.".to_string()
                }
            },
            Self::SchemaDriftExhausted { .. } => "Your change could not be saved.".to_string(),
            other => other.to_string(),
        }
    }

    /// Context-aware recovery hint for operators and users.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `psync init` to create the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::NotFound { kind, id } => Some(format!(
                "No {kind} with ID '{id}'. It may have been removed remotely; reload and try again."
            )),

            Self::Remote(e) => match &e.kind {
                RemoteErrorKind::PermissionDenied => Some(
                    "Check the row-level policies for this table and that all migrations are applied"
                        .to_string(),
                ),
                RemoteErrorKind::Conflict => e
                    .column
                    .as_ref()
                    .map(|c| format!("Pick a unique value for '{c}'")),
                RemoteErrorKind::Unavailable => {
                    Some("The remote store did not respond. Retry once it is reachable.".to_string())
                }
                RemoteErrorKind::UnknownColumn(column) => Some(format!(
                    "The remote schema has no column '{column}'. Apply pending migrations."
                )),
                RemoteErrorKind::Unknown => None,
            },

            Self::SchemaDriftExhausted { dropped, .. } => Some(format!(
                "The remote schema lags the client ({} unknown columns). Apply pending migrations.",
                dropped.len()
            )),

            Self::InvalidStatus(_) => Some(
                "Valid submission statuses: pending_mark, graded, resubmission_required, \
                 verified, in_progress, late. Synonyms: marked→graded, resubmit→resubmission_required"
                    .to_string(),
            ),

            Self::InvalidArgument(msg) => {
                if msg.contains("cohort") {
                    Some("Valid cohorts: foundation, intermediate, advanced".to_string())
                } else if msg.contains("content type") {
                    Some("Valid content types: quiz, lesson, walkthrough".to_string())
                } else if msg.contains("department") {
                    Some("Valid departments: engineering, creative".to_string())
                } else {
                    None
                }
            }

            Self::Mapping { .. }
            | Self::Database(_)
            | Self::Http(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "user_message": self.user_message(),
                "retryable": code.is_retryable(),
                "blocking": self.is_blocking(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(kind: RemoteErrorKind, column: Option<&str>) -> Error {
        Error::Remote(RemoteError {
            kind,
            message: "boom".to_string(),
            column: column.map(ToString::to_string),
        })
    }

    #[test]
    fn test_permission_denied_is_blocking() {
        let err = remote(RemoteErrorKind::PermissionDenied, None);
        assert!(err.is_blocking());
        assert_eq!(err.error_code(), ErrorCode::PermissionDenied);
        assert!(err.user_message().contains("administrator"));
    }

    #[test]
    fn test_conflict_names_field() {
        let err = remote(RemoteErrorKind::Conflict, Some("username"));
        assert!(!err.is_blocking());
        assert!(err.user_message().contains("username"));
        assert_eq!(err.hint().as_deref(), Some("Pick a unique value for 'username'"));
    }

    #[test]
    fn test_structured_json() {
        let err = remote(RemoteErrorKind::Unavailable, None);
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "UNAVAILABLE");
        assert_eq!(json["error"]["retryable"], true);
        assert_eq!(json["error"]["exit_code"], 5);
    }

    #[test]
    fn test_not_found_exit_code() {
        let err = Error::NotFound {
            kind: EntityKind::Student,
            id: "stu_1".to_string(),
        };
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("student not found"));
    }
}
