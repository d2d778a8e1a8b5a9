//! Database provider traits
//!
//! Defines the seam between the gateway and a concrete driver.
//! This abstraction allows for:
//! - Swapping the tokio-postgres backend for a scripted one in tests
//! - Counting acquisitions and releases without a live server
//! - Consistent error classification

use crate::config::ConnectionConfig;
use crate::db::types::{Param, QueryResults};
use crate::error::DbResult;

/// An open connection.
///
/// Dropping the session closes the underlying connection; there is no
/// separate disconnect call, so release cannot be forgotten or doubled.
#[allow(async_fn_in_trait)]
pub trait Session {
    /// Execute one statement with bound parameters and fetch every row
    ///
    /// # Errors
    /// Returns `DbError::QueryFailed` if preparation or execution fails
    async fn query(&self, sql: &str, params: &[Param]) -> DbResult<QueryResults>;
}

/// Opens sessions from a [`ConnectionConfig`]
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Session: Session;

    /// Establish a connection to `config.database`
    ///
    /// # Errors
    /// Returns `DbError::ConnectionFailed` with a classified
    /// [`ConnectFailure`](crate::error::ConnectFailure)
    async fn connect(&self, config: &ConnectionConfig) -> DbResult<Self::Session>;
}
