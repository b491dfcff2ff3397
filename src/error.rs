//! Error types for fieldsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, etc.)
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use thiserror::Error;

/// Result type alias for fieldsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    DatabaseError,
    MigrationFailed,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    UnknownTable,
    InvalidArgument,

    // Sync (exit 6)
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
            Self::DatabaseError => "DATABASE_ERROR",
            Self::MigrationFailed => "MIGRATION_FAILED",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::UnknownTable => "UNKNOWN_TABLE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RemoteError => "REMOTE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::DatabaseError | Self::MigrationFailed => 2,
            Self::RecordNotFound => 3,
            Self::UnknownTable | Self::InvalidArgument => 4,
            Self::RemoteError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// Remote and busy-database failures are transient. A failed migration
    /// is not: the caller must treat it as a hard startup failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteError | Self::DatabaseError)
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in fieldsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: database not found")]
    NotInitialized,

    #[error("Unknown table: {name}")]
    UnknownTable { name: String },

    #[error("Record not found: {table}/{id}")]
    RecordNotFound { table: String, id: String },

    #[error("Migration to schema version {version} failed: {message}")]
    Migration { version: i64, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Migration { .. } => ErrorCode::MigrationFailed,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::UnknownTable { .. } => ErrorCode::UnknownTable,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Remote(_) => ErrorCode::RemoteError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => {
                Some("Run `fieldsync migrate` to create the local database".to_string())
            }

            Self::UnknownTable { .. } => Some(format!(
                "Valid tables: {}",
                crate::model::SyncableTable::ALL
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),

            Self::RecordNotFound { table, .. } => Some(format!(
                "Check the ID. Pending rows for '{table}' are listed by `fieldsync sync status`."
            )),

            Self::Migration { .. } => Some(
                "The database was left at its previous schema version. \
                 Fix the cause and restart; do not retry silently."
                    .to_string(),
            ),

            Self::Config(_) => Some(
                "Check ~/.fieldsync/config.json or the FIELDSYNC_REMOTE_URL / \
                 FIELDSYNC_REMOTE_KEY environment variables"
                    .to_string(),
            ),

            Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Remote(_)
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
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}
