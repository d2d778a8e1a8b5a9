//! Error types for pg-gateway
//!
//! This module defines the error hierarchy used throughout the gateway.
//! We use `thiserror` for library-style errors with clear error chains.
//! None of these cross the public operation boundary: the gateway folds
//! them into failure envelopes (see [`crate::gateway::envelope`]).

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailure {
    /// Host unreachable, refused, reset, TLS negotiation failed
    Network,
    /// Bad credentials or role not permitted to log in
    Authentication,
    /// The target database does not exist
    UnknownDatabase,
    /// Connect did not finish within the connect timeout
    Timeout,
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectFailure::Network => "network",
            ConnectFailure::Authentication => "authentication",
            ConnectFailure::UnknownDatabase => "unknown database",
            ConnectFailure::Timeout => "timeout",
        };
        f.write_str(label)
    }
}

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Failed to establish connection
    #[error("Connection failed ({kind}): {message}")]
    ConnectionFailed {
        kind: ConnectFailure,
        message: String,
    },

    /// Statement refused by the read-only policy
    #[error("Write operations not permitted: {0}")]
    PolicyRejection(String),

    /// Statement exceeded its execution bound
    #[error("Query execution timed out after {}s", .0.as_secs())]
    StatementTimeout(Duration),

    /// A system catalog lookup failed or found nothing
    #[error("Catalog query failed: {0}")]
    CatalogQueryFailure(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),
}

/// Stable, machine-readable failure category echoed in error envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConnectError,
    PolicyRejection,
    StatementTimeout,
    CatalogQueryFailure,
    QueryFailure,
    InvalidArgument,
}

impl DbError {
    /// Category used by the envelope layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::ConnectionFailed { .. } => ErrorKind::ConnectError,
            DbError::PolicyRejection(_) => ErrorKind::PolicyRejection,
            DbError::StatementTimeout(_) => ErrorKind::StatementTimeout,
            DbError::CatalogQueryFailure(_) => ErrorKind::CatalogQueryFailure,
            DbError::QueryFailed(_) => ErrorKind::QueryFailure,
        }
    }
}

/// Configuration loading/parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Home directory not found
    #[error("Could not determine home directory")]
    NoHomeDir,

    /// Config file not found or unreadable
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Request decoding errors at the dispatch boundary
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Request line is not valid JSON
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Operation name not in the exposed set
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// Arguments do not match the operation's shape
    #[error("Invalid arguments for {operation}: {message}")]
    InvalidArguments { operation: String, message: String },
}

impl RequestError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

/// Specialized Result type for database operations
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Specialized Result type for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized Result type for request decoding
pub type RequestResult<T> = std::result::Result<T, RequestError>;
