//! Connection broker
//!
//! Opens one connection per call against the context's current database or
//! an explicit override, bounds the connect with the configured timeout, and
//! hands the session out wrapped in a [`Lease`]. Dropping the lease is the
//! only way a connection is released, so every exit path of the calling
//! operation (return, `?`, timeout, cancellation) releases it exactly once.
//!
//! The broker never retries; [`Broker::startup_probe`] is the single place
//! with a retry loop.

use crate::config::{ConnectionConfig, Settings};
use crate::db::provider::{Connector, Session};
use crate::error::{ConnectFailure, DbError, DbResult};
use crate::gateway::context::DatabaseContext;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct BrokerStats {
    acquired: AtomicU64,
    released: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the broker counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub acquired: u64,
    pub released: u64,
    pub failed: u64,
}

impl StatsSnapshot {
    /// Connections acquired but not yet released
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// A connection held for the duration of one operation
pub struct Lease<S> {
    session: S,
    database: String,
    stats: Arc<BrokerStats>,
}

impl<S> Lease<S> {
    /// Database this connection was opened against
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl<S> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> Drop for Lease<S> {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(database = %self.database, "connection released");
    }
}

/// Opens connections on behalf of gateway operations
pub struct Broker<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    context: Arc<DatabaseContext>,
    stats: Arc<BrokerStats>,
}

impl<C: Connector> Broker<C> {
    pub fn new(connector: C, config: ConnectionConfig, context: Arc<DatabaseContext>) -> Self {
        Self {
            connector,
            config,
            context,
            stats: Arc::new(BrokerStats::default()),
        }
    }

    /// Base connection parameters (database field is the configured default)
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open a connection to `database`, or to the context's current target
    ///
    /// # Errors
    /// Returns `DbError::ConnectionFailed`; connect timeouts are classified
    /// as [`ConnectFailure::Timeout`]
    pub async fn acquire(&self, database: Option<&str>) -> DbResult<Lease<C::Session>> {
        let target = self.context.resolve(database);
        let config = self.config.for_database(&target);

        let connected =
            tokio::time::timeout(config.connect_timeout, self.connector.connect(&config)).await;
        let result = match connected {
            Ok(result) => result,
            Err(_elapsed) => Err(DbError::ConnectionFailed {
                kind: ConnectFailure::Timeout,
                message: format!(
                    "no connection to {}:{}/{} within {}s",
                    config.host,
                    config.port,
                    target,
                    config.connect_timeout.as_secs()
                ),
            }),
        };

        match result {
            Ok(session) => {
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(database = %target, "connection acquired");
                Ok(Lease {
                    session,
                    database: target,
                    stats: Arc::clone(&self.stats),
                })
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(database = %target, error = %e, "connection failed");
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Connect to the current target and run `SELECT 1`
    pub async fn ping(&self) -> DbResult<()> {
        let lease = self.acquire(None).await?;
        lease.query("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Best-effort connectivity check run once at startup.
    ///
    /// Retries with capped exponential backoff and only ever logs; the
    /// result is informational and never stops the process from serving.
    pub async fn startup_probe(&self, settings: &Settings) -> bool {
        let attempts = settings.startup_probe_attempts.max(1);
        let target = self.context.current();
        tracing::info!(
            "Testing connection to {}@{}:{}/{}",
            self.config.username,
            self.config.host,
            self.config.port,
            target
        );

        for attempt in 0..attempts {
            match self.ping().await {
                Ok(()) => {
                    tracing::info!(database = %target, "database connection verified");
                    return true;
                }
                Err(e) if attempt + 1 < attempts => {
                    let backoff = settings.probe_backoff(attempt);
                    tracing::warn!(
                        "startup probe attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::warn!(
                        "database connection test failed after {} attempts: {}. \
                         Serving anyway; use test_connection to debug",
                        attempts,
                        e
                    );
                }
            }
        }
        false
    }
}
