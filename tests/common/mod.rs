//! Common test utilities and helpers
//!
//! A scripted in-memory [`Connector`]: it knows a fixed set of databases,
//! answers statements through handlers matched by SQL substring, and
//! records every connect and every executed statement.

#![allow(dead_code)]

use pg_gateway::config::{ConnectionConfig, Settings};
use pg_gateway::db::{CellValue, Connector, Param, QueryResults, Session};
use pg_gateway::error::{ConnectFailure, DbError, DbResult};
use pg_gateway::gateway::Gateway;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// One statement as the scripted server saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub database: String,
    pub sql: String,
    pub params: Vec<Param>,
}

type Handler = Box<dyn Fn(&Executed) -> DbResult<QueryResults>>;

/// Scripted server shared between the connector and the test body
pub struct MockServer {
    databases: Vec<String>,
    handlers: Vec<(String, Handler)>,
    stalls: Vec<(String, Duration)>,
    connects: RefCell<Vec<String>>,
    executed: RefCell<Vec<Executed>>,
}

impl MockServer {
    pub fn new(databases: &[&str]) -> Self {
        Self {
            databases: databases.iter().map(|d| d.to_string()).collect(),
            handlers: Vec::new(),
            stalls: Vec::new(),
            connects: RefCell::new(Vec::new()),
            executed: RefCell::new(Vec::new()),
        }
    }

    /// Answer statements containing `needle`; earlier handlers win
    pub fn on(
        mut self,
        needle: &str,
        handler: impl Fn(&Executed) -> DbResult<QueryResults> + 'static,
    ) -> Self {
        self.handlers.push((needle.to_string(), Box::new(handler)));
        self
    }

    /// Answer statements containing `needle` with a fixed result
    pub fn rows(self, needle: &str, results: QueryResults) -> Self {
        self.on(needle, move |_| Ok(results.clone()))
    }

    /// Fail statements containing `needle` with a query error
    pub fn fail(self, needle: &str, message: &str) -> Self {
        let message = message.to_string();
        self.on(needle, move |_| Err(DbError::QueryFailed(message.clone())))
    }

    /// Sleep before answering statements containing `needle`
    pub fn stall(mut self, needle: &str, delay: Duration) -> Self {
        self.stalls.push((needle.to_string(), delay));
        self
    }

    /// Databases connected to, in order
    pub fn connects(&self) -> Vec<String> {
        self.connects.borrow().clone()
    }

    pub fn executed(&self) -> Vec<Executed> {
        self.executed.borrow().clone()
    }

    /// Executed statements containing `needle`
    pub fn executed_matching(&self, needle: &str) -> Vec<Executed> {
        self.executed
            .borrow()
            .iter()
            .filter(|e| e.sql.contains(needle))
            .cloned()
            .collect()
    }

    fn answer(&self, executed: &Executed) -> DbResult<QueryResults> {
        self.handlers
            .iter()
            .find(|(needle, _)| executed.sql.contains(needle.as_str()))
            .map(|(_, handler)| handler(executed))
            .unwrap_or_else(|| {
                Err(DbError::QueryFailed(format!(
                    "no scripted answer for: {}",
                    executed.sql
                )))
            })
    }
}

#[derive(Clone)]
pub struct MockConnector {
    server: Rc<MockServer>,
}

pub struct MockSession {
    server: Rc<MockServer>,
    database: String,
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<MockSession> {
        self.server
            .connects
            .borrow_mut()
            .push(config.database.clone());
        if !self.server.databases.contains(&config.database) {
            return Err(DbError::ConnectionFailed {
                kind: ConnectFailure::UnknownDatabase,
                message: format!("database \"{}\" does not exist", config.database),
            });
        }
        Ok(MockSession {
            server: Rc::clone(&self.server),
            database: config.database.clone(),
        })
    }
}

impl Session for MockSession {
    async fn query(&self, sql: &str, params: &[Param]) -> DbResult<QueryResults> {
        let executed = Executed {
            database: self.database.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.server.executed.borrow_mut().push(executed.clone());

        let delay = self
            .server
            .stalls
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.server.answer(&executed)
    }
}

/// Gateway over a scripted server; the context starts at `postgres`
pub fn gateway(server: MockServer) -> (Gateway<MockConnector>, Rc<MockServer>) {
    gateway_with(server, Settings::default())
}

pub fn gateway_with(
    server: MockServer,
    settings: Settings,
) -> (Gateway<MockConnector>, Rc<MockServer>) {
    let server = Rc::new(server);
    let config = ConnectionConfig::with_settings(&settings);
    let connector = MockConnector {
        server: Rc::clone(&server),
    };
    (Gateway::new(connector, config, settings), server)
}

/// Result set from column names and rows
pub fn results(names: &[&str], rows: Vec<Vec<CellValue>>) -> QueryResults {
    QueryResults::from_values(names, rows)
}

pub fn text(s: &str) -> CellValue {
    CellValue::Text(s.to_string())
}

pub fn int(i: i64) -> CellValue {
    CellValue::Integer(i)
}

/// Scripted answers for a numeric column set: `aggregates` computes
/// min/max/avg/count and `median` applies the bound offset to the sorted
/// non-null values, the way the server would.
pub fn numeric_column(values: Vec<Option<i64>>) -> (QueryResults, impl Fn(&Executed) -> DbResult<QueryResults>) {
    let mut present: Vec<i64> = values.into_iter().flatten().collect();
    present.sort_unstable();

    let count = present.len() as i64;
    let aggregates = if present.is_empty() {
        results(
            &["min_value", "max_value", "avg_value", "non_null_count"],
            vec![vec![CellValue::Null, CellValue::Null, CellValue::Null, int(0)]],
        )
    } else {
        let sum: i64 = present.iter().sum();
        results(
            &["min_value", "max_value", "avg_value", "non_null_count"],
            vec![vec![
                int(present[0]),
                int(present[present.len() - 1]),
                CellValue::Float(sum as f64 / count as f64),
                int(count),
            ]],
        )
    };

    let median = move |executed: &Executed| {
        let offset = match executed.params.first() {
            Some(Param::Int(n)) => *n as usize,
            _ => return Err(DbError::QueryFailed("offset must be bound".into())),
        };
        let rows = present
            .get(offset)
            .map(|v| vec![vec![int(*v)]])
            .unwrap_or_default();
        Ok(results(&["median_value"], rows))
    };

    (aggregates, median)
}
