//! The database gateway
//!
//! [`Gateway`] exposes every read-only operation callers may invoke. Each
//! operation acquires its own connection through the [`Broker`], runs one
//! or more statements under the query timeout, and folds its outcome into
//! an [`Envelope`]. No error escapes an operation.
//!
//! Every operation accepting a `database` override uses it for that call
//! only; only [`Gateway::switch_database`] writes the shared context.

pub mod broker;
pub mod context;
pub mod envelope;
pub mod introspect;
pub mod policy;
pub mod statistics;

pub use broker::{Broker, Lease, StatsSnapshot};
pub use context::DatabaseContext;
pub use envelope::{Envelope, Failure};
pub use policy::{KeywordPolicy, StatementPolicy};
pub use statistics::TableStatistics;

use crate::config::{ConnectionConfig, Settings};
use crate::db::postgres::PgConnector;
use crate::db::provider::{Connector, Session};
use crate::db::schema::{ColumnDescriptor, ForeignKeyEdge, TableDescriptor, TableEntry};
use crate::db::types::Param;
use crate::error::{DbError, DbResult, ErrorKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Payload of `list_tables`
#[derive(Debug, Clone, Serialize)]
pub struct TableList {
    pub tables: Vec<TableEntry>,
    /// Table names grouped by schema
    pub schemas: BTreeMap<String, Vec<String>>,
    pub total_count: usize,
    pub schema_count: usize,
}

/// Payload of `describe_table`
#[derive(Debug, Clone, Serialize)]
pub struct TableColumns {
    pub table_name: String,
    pub schema_name: Option<String>,
    pub schemas_found: Vec<String>,
    pub columns: Vec<ColumnDescriptor>,
    pub column_count: usize,
}

/// Payload of `get_foreign_keys`
#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeys {
    /// `schema.table`
    pub table_name: String,
    pub foreign_keys: Vec<ForeignKeyEdge>,
    pub foreign_key_count: usize,
}

/// Rows returned by the query, sample and search operations
#[derive(Debug, Clone, Serialize)]
pub struct RowSet {
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    /// Statement text actually executed
    pub query: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_term: Option<String>,
}

/// Payload of `list_databases` and `list_schemas`
#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub items: Vec<Map<String, Value>>,
    pub count: usize,
}

/// Payload of `explain_query`
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    pub query: String,
    pub execution_plan: Value,
    pub database: String,
}

/// Payload of `switch_database`
#[derive(Debug, Clone, Serialize)]
pub struct Switched {
    pub message: String,
    pub previous_database: String,
    pub current_database: String,
}

/// Payload of `test_connection`
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub message: String,
    pub test_query_result: Option<i64>,
    pub database: String,
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// Configured connection parameters, reported without connecting
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub current_database: String,
    pub user: String,
    pub ssl_mode: &'static str,
}

/// Payload of `server_status`
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub server: &'static str,
    pub message: String,
    pub database_config: DatabaseConfig,
    pub connections: StatsSnapshot,
}

/// Read-only gateway over one PostgreSQL server
pub struct Gateway<C: Connector = PgConnector> {
    settings: Settings,
    broker: Broker<C>,
    context: Arc<DatabaseContext>,
    policy: Box<dyn StatementPolicy>,
}

impl<C: Connector> Gateway<C> {
    /// Build a gateway whose context starts at `config.database`
    pub fn new(connector: C, config: ConnectionConfig, settings: Settings) -> Self {
        let context = Arc::new(DatabaseContext::new(config.database.clone()));
        let broker = Broker::new(connector, config, Arc::clone(&context));
        Self {
            settings,
            broker,
            context,
            policy: Box::new(KeywordPolicy::default()),
        }
    }

    /// Replace the statement policy
    pub fn with_policy(mut self, policy: impl StatementPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Database targeted by calls without an override
    pub fn current_database(&self) -> String {
        self.context.current()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.broker.stats()
    }

    /// Run `work` under the exploratory query timeout
    async fn bounded<T>(&self, work: impl Future<Output = DbResult<T>>) -> DbResult<T> {
        let limit = self.settings.query_timeout();
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_elapsed) => Err(DbError::StatementTimeout(limit)),
        }
    }

    fn respond<T>(
        &self,
        operation: &str,
        result: DbResult<T>,
        context: impl FnOnce(Failure) -> Failure,
    ) -> Envelope<T> {
        match result {
            Ok(payload) => Envelope::Success(payload),
            Err(e) => {
                tracing::error!(operation, kind = ?e.kind(), "{}", e);
                Envelope::Error(context(Failure::from(&e)))
            }
        }
    }

    /// All user tables, grouped by schema
    pub async fn list_tables(&self, database: Option<&str>) -> Envelope<TableList> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let tables = self.bounded(introspect::list_tables(&*lease)).await?;

            let mut schemas: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for table in &tables {
                schemas
                    .entry(table.schema.clone())
                    .or_default()
                    .push(table.name.clone());
            }
            Ok::<_, DbError>(TableList {
                total_count: tables.len(),
                schema_count: schemas.len(),
                tables,
                schemas,
            })
        }
        .await;
        self.respond("list_tables", result, |f| f)
    }

    /// Column metadata for a table, searching all user schemas when
    /// `schema` is omitted
    pub async fn describe_table(
        &self,
        table: &str,
        schema: Option<&str>,
        database: Option<&str>,
    ) -> Envelope<TableColumns> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let columns = self
                .bounded(introspect::describe_table(&*lease, table, schema))
                .await?;
            Ok::<_, DbError>(TableColumns {
                table_name: table.to_string(),
                schema_name: schema.map(str::to_string),
                schemas_found: introspect::schemas_found(&columns),
                column_count: columns.len(),
                columns,
            })
        }
        .await;
        self.respond("describe_table", result, |f| {
            f.with("table_name", table).with("schema_name", schema)
        })
    }

    /// Foreign-key edges owned by a table
    pub async fn get_foreign_keys(
        &self,
        table: &str,
        schema: &str,
        database: Option<&str>,
    ) -> Envelope<ForeignKeys> {
        let display_name = format!("{}.{}", schema, table);
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let edges = self
                .bounded(introspect::foreign_keys(&*lease, table, schema))
                .await?;
            Ok::<_, DbError>(ForeignKeys {
                table_name: display_name.clone(),
                foreign_key_count: edges.len(),
                foreign_keys: edges,
            })
        }
        .await;
        self.respond("get_foreign_keys", result, |f| {
            f.with("table_name", display_name.as_str())
        })
    }

    /// Size, owner, row estimate and indexes of a table
    pub async fn get_table_info(
        &self,
        table: &str,
        schema: &str,
        database: Option<&str>,
    ) -> Envelope<TableDescriptor> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            self.bounded(introspect::table_info(&*lease, table, schema))
                .await
        }
        .await;
        self.respond("get_table_info", result, |f| {
            f.with("table_name", table).with("schema_name", schema)
        })
    }

    /// Per-column statistics over a table's numeric columns
    pub async fn get_table_statistics(
        &self,
        table: &str,
        schema: &str,
        database: Option<&str>,
    ) -> Envelope<TableStatistics> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            self.bounded(statistics::compute_statistics(&*lease, table, schema))
                .await
        }
        .await;
        self.respond("get_table_statistics", result, |f| {
            f.with("table_name", format!("{}.{}", schema, table))
        })
    }

    /// Databases visible to the configured user
    pub async fn list_databases(&self) -> Envelope<Listing> {
        let result = async {
            let lease = self.broker.acquire(None).await?;
            let results = self.bounded(introspect::list_databases(&*lease)).await?;
            let items = envelope::to_records(&results);
            Ok::<_, DbError>(Listing {
                count: items.len(),
                items,
            })
        }
        .await;
        self.respond("list_databases", result, |f| f)
    }

    /// Schemas of a database, `public` first
    pub async fn list_schemas(&self, database: Option<&str>) -> Envelope<Listing> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let results = self.bounded(introspect::list_schemas(&*lease)).await?;
            let items = envelope::to_records(&results);
            Ok::<_, DbError>(Listing {
                count: items.len(),
                items,
            })
        }
        .await;
        self.respond("list_schemas", result, |f| {
            f.with("database", self.context.resolve(database))
        })
    }

    /// Name, users, version and size of a database
    pub async fn get_database_info(&self, database: Option<&str>) -> Envelope<Map<String, Value>> {
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let results = self.bounded(introspect::database_info(&*lease)).await?;
            envelope::to_records(&results)
                .into_iter()
                .next()
                .ok_or_else(|| DbError::CatalogQueryFailure("no database info returned".into()))
        }
        .await;
        self.respond("get_database_info", result, |f| f)
    }

    /// Run a read-only statement, capped at `limit` rows unless it carries
    /// its own limit
    pub async fn execute_query(
        &self,
        query: &str,
        limit: Option<u64>,
        database: Option<&str>,
    ) -> Envelope<RowSet> {
        let target = self.context.resolve(database);
        let result = self.run_query(query, limit, database).await;
        self.respond("execute_query", result, |f| {
            f.with("query", query).with("database", target.as_str())
        })
    }

    /// [`Gateway::execute_query`] against a named database; the context is
    /// left untouched
    pub async fn query_database(
        &self,
        database: &str,
        query: &str,
        limit: Option<u64>,
    ) -> Envelope<RowSet> {
        let result = self.run_query(query, limit, Some(database)).await;
        self.respond("query_database", result, |f| {
            f.with("query", query).with("database", database)
        })
    }

    async fn run_query(
        &self,
        query: &str,
        limit: Option<u64>,
        database: Option<&str>,
    ) -> DbResult<RowSet> {
        let statement = self.policy.authorize(query)?;
        let limit = limit.unwrap_or(self.settings.default_row_limit);
        let bounded = self.policy.bound_limit(&statement, limit);

        let lease = self.broker.acquire(database).await?;
        tracing::debug!(database = %lease.database(), query = %bounded, "executing query");
        let results = self.bounded(lease.query(&bounded, &[])).await?;
        let rows = envelope::to_records(&results);
        Ok::<_, DbError>(RowSet {
            row_count: rows.len(),
            rows,
            query: bounded,
            database: lease.database().to_string(),
            table_name: None,
            search_term: None,
        })
    }

    /// First rows of a table
    pub async fn get_table_sample(
        &self,
        table: &str,
        schema: &str,
        limit: Option<u64>,
        database: Option<&str>,
    ) -> Envelope<RowSet> {
        let limit = limit.unwrap_or(self.settings.sample_row_limit);
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let sql = format!(
                "SELECT * FROM {} LIMIT $1",
                introspect::qualified_name(schema, table)
            );
            let results = self
                .bounded(async {
                    introspect::verify_table(&*lease, schema, table).await?;
                    lease.query(&sql, &[Param::Int(clamp_limit(limit))]).await
                })
                .await?;
            let rows = envelope::to_records(&results);
            Ok::<_, DbError>(RowSet {
                row_count: rows.len(),
                rows,
                query: sql,
                database: lease.database().to_string(),
                table_name: Some(format!("{}.{}", schema, table)),
                search_term: None,
            })
        }
        .await;
        self.respond("get_table_sample", result, |f| {
            f.with("table_name", format!("{}.{}", schema, table))
        })
    }

    /// Rows whose `column`, rendered as text, contains `search_term`
    /// (case-insensitive)
    pub async fn search_table(
        &self,
        table: &str,
        column: &str,
        search_term: &str,
        schema: &str,
        limit: Option<u64>,
        database: Option<&str>,
    ) -> Envelope<RowSet> {
        let limit = limit.unwrap_or(self.settings.search_row_limit);
        let result = async {
            let lease = self.broker.acquire(database).await?;
            let sql = format!(
                "SELECT * FROM {} WHERE {}::text ILIKE $1 LIMIT $2",
                introspect::qualified_name(schema, table),
                introspect::quote_ident(column)
            );
            let params = [
                Param::Text(format!("%{}%", search_term)),
                Param::Int(clamp_limit(limit)),
            ];
            let results = self
                .bounded(async {
                    introspect::verify_table(&*lease, schema, table).await?;
                    introspect::verify_column(&*lease, schema, table, column).await?;
                    lease.query(&sql, &params).await
                })
                .await?;
            let rows = envelope::to_records(&results);
            Ok::<_, DbError>(RowSet {
                row_count: rows.len(),
                rows,
                query: sql,
                database: lease.database().to_string(),
                table_name: Some(format!("{}.{}", schema, table)),
                search_term: Some(search_term.to_string()),
            })
        }
        .await;
        self.respond("search_table", result, |f| {
            f.with("table", table)
                .with("column", column)
                .with("search_term", search_term)
        })
    }

    /// Planner output for a read-only statement, as JSON
    pub async fn explain_query(&self, query: &str, database: Option<&str>) -> Envelope<QueryPlan> {
        let target = self.context.resolve(database);
        let result = async {
            let statement = self.policy.authorize(query)?;
            let lease = self.broker.acquire(database).await?;
            let sql = format!("EXPLAIN (FORMAT JSON) {}", statement);
            let results = self.bounded(lease.query(&sql, &[])).await?;
            let plan = results
                .first()
                .and_then(|row| row.values.first())
                .map(envelope::cell_to_json)
                .unwrap_or(Value::Null);
            Ok::<_, DbError>(QueryPlan {
                query: statement,
                execution_plan: plan,
                database: lease.database().to_string(),
            })
        }
        .await;
        self.respond("explain_query", result, |f| {
            f.with("query", query).with("database", target.as_str())
        })
    }

    /// Point the context at `database` after proving it is reachable.
    ///
    /// On any failure the context is restored to its previous value before
    /// returning, unless a concurrent switch has replaced it since.
    pub async fn switch_database(&self, database: &str) -> Envelope<Switched> {
        let database = database.trim();
        if database.is_empty() {
            let failure = Failure::new("database name must not be empty", ErrorKind::InvalidArgument)
                .with("current_database", self.context.current());
            return Envelope::Error(failure);
        }

        let previous = self.context.replace(database);
        let result = async {
            let lease = self.broker.acquire(Some(database)).await?;
            let results = self
                .bounded(lease.query("SELECT current_database() AS current_database", &[]))
                .await?;
            Ok::<_, DbError>(
                results
                    .first()
                    .and_then(|row| results.text(row, "current_database"))
                    .unwrap_or_else(|| database.to_string()),
            )
        }
        .await;

        match result {
            Ok(current) => {
                tracing::info!(from = %previous, to = %current, "switched database");
                Envelope::Success(Switched {
                    message: format!("Successfully switched to database: {}", current),
                    previous_database: previous,
                    current_database: current,
                })
            }
            Err(e) => {
                if !self.context.restore(database, &previous) {
                    tracing::warn!(
                        requested = %database,
                        "context changed during failed switch; keeping newer value"
                    );
                }
                tracing::error!(operation = "switch_database", kind = ?e.kind(), "{}", e);
                Envelope::Error(
                    Failure::from(&e)
                        .with("requested_database", database)
                        .with("current_database", self.context.current()),
                )
            }
        }
    }

    /// Connect to the current database and run `SELECT 1`
    pub async fn test_connection(&self) -> Envelope<ConnectionCheck> {
        let config = self.broker.config();
        let database = self.context.current();
        let result = async {
            let lease = self.broker.acquire(None).await?;
            let results = self.bounded(lease.query("SELECT 1 AS result", &[])).await?;
            Ok::<_, DbError>(ConnectionCheck {
                message: "Database connection successful".to_string(),
                test_query_result: results.first().and_then(|row| results.int(row, "result")),
                database: lease.database().to_string(),
                host: config.host.clone(),
                port: config.port,
                user: config.username.clone(),
            })
        }
        .await;
        self.respond("test_connection", result, |f| {
            f.with("database", database.as_str())
                .with("host", config.host.as_str())
                .with("port", config.port)
                .with("user", config.username.as_str())
        })
    }

    /// Liveness probe: reports configuration without opening a connection
    pub fn server_status(&self) -> Envelope<ServerStatus> {
        let config = self.broker.config();
        Envelope::Success(ServerStatus {
            server: "running",
            message: "Gateway is accepting requests".to_string(),
            database_config: DatabaseConfig {
                host: config.host.clone(),
                port: config.port,
                database: config.database.clone(),
                current_database: self.context.current(),
                user: config.username.clone(),
                ssl_mode: config.ssl_mode.as_str(),
            },
            connections: self.broker.stats(),
        })
    }

    /// Best-effort connectivity check; see [`Broker::startup_probe`]
    pub async fn startup_probe(&self) -> bool {
        self.broker.startup_probe(&self.settings).await
    }
}

fn clamp_limit(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
