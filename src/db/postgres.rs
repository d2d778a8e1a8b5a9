//! PostgreSQL database provider
//!
//! Concrete implementation using tokio-postgres.

use crate::config::{ConnectionConfig, SslMode};
use crate::db::provider::{Connector, Session};
use crate::db::render::Rendered;
use crate::db::types::{CellValue, ColumnDef, DataType, Param, QueryResults, Row};
use crate::error::{ConnectFailure, DbError, DbResult};
use std::error::Error as _;
use std::io;
use tokio::task::JoinHandle;
use tokio_postgres::Client;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};

/// Opens one tokio-postgres connection per call
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

/// A live PostgreSQL connection
pub struct PgSession {
    /// The tokio-postgres client
    client: Client,
    /// Task driving the socket; aborted on drop so the connection closes
    /// even if the client is still referenced by an in-flight future
    driver: JoinHandle<()>,
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self, config: &ConnectionConfig) -> DbResult<PgSession> {
        let pg_config = pg_config(config);

        let connected = match config.ssl_mode {
            SslMode::Disable => connect_with(&pg_config, tokio_postgres::NoTls).await,
            SslMode::Prefer | SslMode::Require => {
                let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                connect_with(&pg_config, tls).await
            }
        };

        let (client, driver) = connected.map_err(|e| DbError::ConnectionFailed {
            kind: classify_connect_error(&e),
            message: describe(&e),
        })?;
        Ok(PgSession { client, driver })
    }
}

async fn connect_with<T>(
    pg_config: &tokio_postgres::Config,
    tls: T,
) -> Result<(Client, JoinHandle<()>), tokio_postgres::Error>
where
    T: tokio_postgres::tls::MakeTlsConnect<tokio_postgres::Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = pg_config.connect(tls).await?;
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "connection closed with error");
        }
    });
    Ok((client, driver))
}

impl Session for PgSession {
    async fn query(&self, sql: &str, params: &[Param]) -> DbResult<QueryResults> {
        let stmt = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| DbError::QueryFailed(describe(&e)))?;

        let columns: Vec<ColumnDef> = stmt
            .columns()
            .iter()
            .map(|col| ColumnDef {
                name: col.name().to_string(),
                data_type: pg_type_to_datatype(col.type_()),
            })
            .collect();

        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| match p {
                Param::Text(s) => s as &(dyn ToSql + Sync),
                Param::Int(n) => n as &(dyn ToSql + Sync),
            })
            .collect();

        let pg_rows = self
            .client
            .query(&stmt, &bound)
            .await
            .map_err(|e| DbError::QueryFailed(describe(&e)))?;

        let mut rows = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let values = columns
                .iter()
                .enumerate()
                .map(|(i, col_def)| extract_cell_value(pg_row, i, &col_def.data_type))
                .collect();
            rows.push(Row { values });
        }

        Ok(QueryResults::new(columns, rows))
    }
}

/// Translate our connection parameters into a driver config
fn pg_config(config: &ConnectionConfig) -> tokio_postgres::Config {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.username)
        .application_name(&config.application_name)
        .connect_timeout(config.connect_timeout)
        .keepalives(true)
        .keepalives_idle(config.keepalive.idle)
        .keepalives_interval(config.keepalive.interval)
        .keepalives_retries(config.keepalive.retries)
        .options(&format!(
            "-c statement_timeout={}",
            config.command_timeout.as_millis()
        ))
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require => tokio_postgres::config::SslMode::Require,
        });
    if let Some(ref pw) = config.password {
        pg.password(pw);
    }
    pg
}

/// Classify a connect-time failure
fn classify_connect_error(err: &tokio_postgres::Error) -> ConnectFailure {
    if let Some(db_err) = err.as_db_error() {
        return classify_sqlstate(db_err.code());
    }
    let timed_out = err
        .source()
        .and_then(|s| s.downcast_ref::<io::Error>())
        .is_some_and(|io_err| io_err.kind() == io::ErrorKind::TimedOut);
    if timed_out || err.to_string().contains("timeout") {
        ConnectFailure::Timeout
    } else {
        ConnectFailure::Network
    }
}

/// Map server-reported SQLSTATE codes seen during startup
pub fn classify_sqlstate(code: &SqlState) -> ConnectFailure {
    if *code == SqlState::INVALID_CATALOG_NAME {
        ConnectFailure::UnknownDatabase
    } else if *code == SqlState::INVALID_PASSWORD
        || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
    {
        ConnectFailure::Authentication
    } else {
        ConnectFailure::Network
    }
}

/// Prefer the server's message over the driver's generic "db error"
fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db_err) => match db_err.detail() {
            Some(detail) => format!("{} ({})", db_err.message(), detail),
            None => db_err.message().to_string(),
        },
        None => err.to_string(),
    }
}

/// Map tokio_postgres Type to our DataType enum
fn pg_type_to_datatype(pg_type: &Type) -> DataType {
    match *pg_type {
        Type::INT2 => DataType::SmallInt,
        Type::INT4 => DataType::Integer,
        Type::INT8 => DataType::BigInt,
        Type::FLOAT4 => DataType::Real,
        Type::FLOAT8 => DataType::Double,
        Type::NUMERIC => DataType::Numeric,
        Type::TEXT | Type::NAME => DataType::Text,
        Type::VARCHAR => DataType::Varchar,
        Type::CHAR | Type::BPCHAR => DataType::Char,
        Type::BOOL => DataType::Boolean,
        Type::DATE => DataType::Date,
        Type::TIME => DataType::Time,
        Type::TIMESTAMP => DataType::Timestamp,
        Type::TIMESTAMPTZ => DataType::TimestampTz,
        Type::INTERVAL => DataType::Interval,
        Type::JSON => DataType::Json,
        Type::JSONB => DataType::Jsonb,
        Type::BYTEA => DataType::Bytea,
        Type::UUID => DataType::Uuid,
        // Array types
        Type::BOOL_ARRAY => DataType::Array(Box::new(DataType::Boolean)),
        Type::INT2_ARRAY => DataType::Array(Box::new(DataType::SmallInt)),
        Type::INT4_ARRAY => DataType::Array(Box::new(DataType::Integer)),
        Type::INT8_ARRAY => DataType::Array(Box::new(DataType::BigInt)),
        Type::FLOAT4_ARRAY => DataType::Array(Box::new(DataType::Real)),
        Type::FLOAT8_ARRAY => DataType::Array(Box::new(DataType::Double)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::NAME_ARRAY => {
            DataType::Array(Box::new(DataType::Text))
        }
        Type::UUID_ARRAY => DataType::Array(Box::new(DataType::Uuid)),
        Type::JSONB_ARRAY => DataType::Array(Box::new(DataType::Jsonb)),
        Type::JSON_ARRAY => DataType::Array(Box::new(DataType::Json)),
        Type::NUMERIC_ARRAY => DataType::Array(Box::new(DataType::Numeric)),
        _ => DataType::Unknown(pg_type.name().to_string()),
    }
}

/// Build a rustls ClientConfig that trusts OS certificates (with Mozilla roots as fallback)
fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let mut loaded = 0;
    for cert in native_certs.certs {
        if root_store.add(cert).is_ok() {
            loaded += 1;
        }
    }
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Extract a cell value from a tokio_postgres Row based on the column's DataType.
///
/// Integers, floats, booleans and JSON keep their JSON shape. Everything
/// else, `numeric` included, goes through [`Rendered`] so the text matches
/// what the server would print and no precision is lost.
fn extract_cell_value(row: &tokio_postgres::Row, idx: usize, data_type: &DataType) -> CellValue {
    match data_type {
        DataType::SmallInt => match row.try_get::<_, Option<i16>>(idx) {
            Ok(Some(v)) => CellValue::Integer(v as i64),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Integer => match row.try_get::<_, Option<i32>>(idx) {
            Ok(Some(v)) => CellValue::Integer(v as i64),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::BigInt => match row.try_get::<_, Option<i64>>(idx) {
            Ok(Some(v)) => CellValue::Integer(v),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Real => match row.try_get::<_, Option<f32>>(idx) {
            Ok(Some(v)) => CellValue::Float(v as f64),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Double => match row.try_get::<_, Option<f64>>(idx) {
            Ok(Some(v)) => CellValue::Float(v),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Boolean => match row.try_get::<_, Option<bool>>(idx) {
            Ok(Some(v)) => CellValue::Boolean(v),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Json | DataType::Jsonb => {
            match row.try_get::<_, Option<serde_json::Value>>(idx) {
                Ok(Some(v)) => CellValue::Json(v),
                Ok(None) => CellValue::Null,
                Err(_) => rendered(row, idx),
            }
        }
        DataType::Bytea => match row.try_get::<_, Option<Vec<u8>>>(idx) {
            Ok(Some(v)) => CellValue::Binary(v),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Uuid => match row.try_get::<_, Option<uuid::Uuid>>(idx) {
            Ok(Some(v)) => CellValue::Uuid(v.to_string()),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Array(inner) => extract_array_value(row, idx, inner),
        DataType::Timestamp => match row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            Ok(Some(v)) => CellValue::DateTime(v.to_string()),
            Ok(None) => CellValue::Null,
            // infinity / -infinity
            Err(_) => rendered(row, idx),
        },
        DataType::TimestampTz => {
            match row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx) {
                Ok(Some(v)) => CellValue::DateTime(v.to_rfc3339()),
                Ok(None) => CellValue::Null,
                Err(_) => rendered(row, idx),
            }
        }
        DataType::Date => match row.try_get::<_, Option<chrono::NaiveDate>>(idx) {
            Ok(Some(v)) => CellValue::DateTime(v.to_string()),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        DataType::Time => match row.try_get::<_, Option<chrono::NaiveTime>>(idx) {
            Ok(Some(v)) => CellValue::DateTime(v.to_string()),
            Ok(None) => CellValue::Null,
            Err(_) => rendered(row, idx),
        },
        // numeric, text types, interval and everything without a mapping
        _ => rendered(row, idx),
    }
}

/// Extract an array value from a tokio_postgres Row.
///
/// Elements are decoded individually so NULL elements survive; element
/// types without a direct Rust mapping are rendered as text.
fn extract_array_value(row: &tokio_postgres::Row, idx: usize, inner: &DataType) -> CellValue {
    match inner {
        DataType::SmallInt => array_of(row, idx, |n: i16| CellValue::Integer(n as i64)),
        DataType::Integer => array_of(row, idx, |n: i32| CellValue::Integer(n as i64)),
        DataType::BigInt => array_of(row, idx, CellValue::Integer),
        DataType::Real => array_of(row, idx, |n: f32| CellValue::Float(n as f64)),
        DataType::Double => array_of(row, idx, CellValue::Float),
        DataType::Boolean => array_of(row, idx, CellValue::Boolean),
        DataType::Uuid => array_of(row, idx, |u: uuid::Uuid| CellValue::Uuid(u.to_string())),
        DataType::Json | DataType::Jsonb => array_of(row, idx, CellValue::Json),
        _ => rendered(row, idx),
    }
}

fn array_of<'a, T>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    cell: impl Fn(T) -> CellValue,
) -> CellValue
where
    T: FromSql<'a>,
{
    match row.try_get::<_, Option<Vec<Option<T>>>>(idx) {
        Ok(Some(items)) => CellValue::Array(
            items
                .into_iter()
                .map(|item| item.map_or(CellValue::Null, &cell))
                .collect(),
        ),
        Ok(None) => CellValue::Null,
        Err(_) => rendered(row, idx),
    }
}

/// Text rendering for values the typed decoders could not take.
///
/// One-dimensional arrays stay arrays of rendered elements; anything else
/// is rendered whole, falling back to hex, so no value is ever replaced by
/// a placeholder.
fn rendered(row: &tokio_postgres::Row, idx: usize) -> CellValue {
    let is_array = row
        .columns()
        .get(idx)
        .is_some_and(|c| matches!(c.type_().kind(), Kind::Array(_)));
    if is_array {
        if let Ok(Some(items)) = row.try_get::<_, Option<Vec<Option<Rendered>>>>(idx) {
            return CellValue::Array(
                items
                    .into_iter()
                    .map(|item| item.map_or(CellValue::Null, |Rendered(text)| CellValue::Text(text)))
                    .collect(),
            );
        }
    }
    match row.try_get::<_, Option<Rendered>>(idx) {
        Ok(Some(Rendered(text))) => CellValue::Text(text),
        Ok(None) | Err(_) => CellValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_classify_sqlstate() {
        assert_eq!(
            classify_sqlstate(&SqlState::from_code("3D000")),
            ConnectFailure::UnknownDatabase
        );
        assert_eq!(
            classify_sqlstate(&SqlState::from_code("28P01")),
            ConnectFailure::Authentication
        );
        assert_eq!(
            classify_sqlstate(&SqlState::from_code("28000")),
            ConnectFailure::Authentication
        );
        assert_eq!(
            classify_sqlstate(&SqlState::from_code("53300")),
            ConnectFailure::Network
        );
    }

    #[test]
    fn test_pg_config_carries_timeouts() {
        let config = ConnectionConfig::with_settings(&Settings::default());
        let pg = pg_config(&config);
        assert_eq!(pg.get_dbname(), Some("postgres"));
        assert_eq!(pg.get_user(), Some("postgres"));
        assert_eq!(pg.get_connect_timeout(), Some(&config.connect_timeout));
        assert_eq!(pg.get_options(), Some("-c statement_timeout=60000"));
        assert_eq!(pg.get_application_name(), Some("pg_gateway"));
        assert!(pg.get_keepalives());
    }

    #[test]
    fn test_pg_type_mapping() {
        assert_eq!(pg_type_to_datatype(&Type::NUMERIC), DataType::Numeric);
        assert_eq!(pg_type_to_datatype(&Type::NAME), DataType::Text);
        assert_eq!(
            pg_type_to_datatype(&Type::INT4_ARRAY),
            DataType::Array(Box::new(DataType::Integer))
        );
    }
}
