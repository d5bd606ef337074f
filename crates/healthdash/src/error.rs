//! Error types for healthdash.
//!
//! This module defines all error types used throughout the healthdash crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for healthdash operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// Gateway credentials are not configured.
    #[error("gateway credentials missing: set HCG_USERNAME and HCG_PASSWORD (or gateway.username / gateway.password)")]
    MissingCredentials,

    // === Gateway Errors ===
    /// The HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway rejected the bearer token.
    #[error("unauthorized request to {endpoint}")]
    Unauthorized {
        /// Endpoint that returned 401.
        endpoint: String,
    },

    /// The gateway answered with a non-success status.
    #[error("gateway returned {status} for {endpoint}: {body}")]
    GatewayStatus {
        /// HTTP status code.
        status: u16,
        /// Endpoint that failed.
        endpoint: String,
        /// Response body (possibly truncated).
        body: String,
    },

    /// A token response could not be understood.
    #[error("invalid token response: {message}")]
    InvalidToken {
        /// Description of what was wrong.
        message: String,
    },

    // === Input Errors ===
    /// A time span or timestamp argument could not be parsed.
    #[error("invalid time specification '{input}': expected e.g. 7d, 24h, 2024-01-15 or an RFC 3339 timestamp")]
    InvalidTimeSpec {
        /// The rejected input.
        input: String,
    },

    /// The method name is not a known Health Connect data type.
    #[error("unknown health method: {0}")]
    UnknownMethod(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for healthdash operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create an invalid token error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Create a gateway status error.
    #[must_use]
    pub fn gateway_status(status: u16, endpoint: impl Into<String>, body: impl Into<String>) -> Self {
        Self::GatewayStatus {
            status,
            endpoint: endpoint.into(),
            body: body.into(),
        }
    }

    /// Check if this error is a rejected bearer token.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Check if the failed request is worth repeating.
    ///
    /// Transport failures, timeouts, 429 and 5xx answers are transient, and
    /// so is a success status whose body is not JSON (a proxy error page).
    /// Everything else fails the same way on a second attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_decode() && !err.is_builder(),
            Self::GatewayStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) => true,
            _ => false,
        }
    }
}
