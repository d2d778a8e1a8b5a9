//! Gateway against a live PostgreSQL server
//!
//! Each test creates its own schema so runs do not interfere, and drops it
//! at the end through a direct tokio-postgres connection (the gateway
//! itself cannot write).

use pg_gateway::config::{ConnectionConfig, Settings, SslMode};
use pg_gateway::db::PgConnector;
use pg_gateway::gateway::Gateway;
use std::time::Duration;
use tokio_postgres::NoTls;

fn test_config(settings: &Settings) -> ConnectionConfig {
    let mut config = ConnectionConfig::with_settings(settings);
    config.host = std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string());
    config.port = std::env::var("TEST_DB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5433);
    config.database = std::env::var("TEST_DB_NAME").unwrap_or_else(|_| "test_db".to_string());
    config.username = std::env::var("TEST_DB_USER").unwrap_or_else(|_| "test_user".to_string());
    config.password =
        Some(std::env::var("TEST_DB_PASSWORD").unwrap_or_else(|_| "test_password".to_string()));
    config.ssl_mode = SslMode::Disable;
    config.connect_timeout = Duration::from_secs(3);
    config
}

/// Admin client for fixtures, or `None` when no server is reachable
async fn admin(config: &ConnectionConfig) -> Option<tokio_postgres::Client> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .dbname(&config.database)
        .user(&config.username)
        .connect_timeout(Duration::from_secs(3));
    if let Some(password) = &config.password {
        pg.password(password);
    }
    match pg.connect(NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(async move {
                let _ = connection.await;
            });
            Some(client)
        }
        Err(e) => {
            eprintln!(
                "Skipping test: Database not available at {}:{} - {}",
                config.host, config.port, e
            );
            None
        }
    }
}

async fn fixture(client: &tokio_postgres::Client, schema: &str) {
    let setup = format!(
        "DROP SCHEMA IF EXISTS {schema} CASCADE;
         CREATE SCHEMA {schema};
         CREATE TABLE {schema}.customers (id integer PRIMARY KEY, name text NOT NULL);
         CREATE TABLE {schema}.orders (
             id integer PRIMARY KEY,
             customer_id integer REFERENCES {schema}.customers(id),
             amount numeric(12, 2),
             qty integer,
             note text
         );
         CREATE TABLE {schema}.tags (label text);
         INSERT INTO {schema}.customers VALUES (1, 'Alice'), (2, 'Bob');
         INSERT INTO {schema}.orders VALUES
             (1, 1, 10.50, 1, 'first'),
             (2, 1, 20.25, 2, NULL),
             (3, 2, 30.00, 3, 'third'),
             (4, 2, NULL, 4, NULL);"
    );
    client
        .batch_execute(&setup)
        .await
        .expect("fixture setup failed");
}

async fn teardown(client: &tokio_postgres::Client, schema: &str) {
    let _ = client
        .batch_execute(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .await;
}

#[tokio::test]
async fn test_live_introspection_and_statistics() {
    let settings = Settings::default();
    let config = test_config(&settings);
    let Some(client) = admin(&config).await else {
        return;
    };
    let schema = "gw_live_intro";
    fixture(&client, schema).await;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let gw = Gateway::new(PgConnector, config.clone(), settings.clone());

            let tables = gw.list_tables(None).await.to_value();
            assert_eq!(tables["status"], "success");
            let names: Vec<String> = tables["tables"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["full_name"].as_str().unwrap().to_string())
                .collect();
            assert!(names.contains(&format!("{schema}.orders")));
            assert!(!names.iter().any(|n| n.starts_with("pg_catalog.")));

            let described = gw.describe_table("orders", Some(schema), None).await.to_value();
            assert_eq!(described["column_count"], 5);
            assert_eq!(described["columns"][0]["column_name"], "id");

            let fks = gw.get_foreign_keys("orders", schema, None).await.to_value();
            assert_eq!(fks["foreign_key_count"], 1);
            assert_eq!(fks["foreign_keys"][0]["foreign_table_name"], "customers");
            let none = gw.get_foreign_keys("tags", schema, None).await.to_value();
            assert_eq!(none["status"], "success");
            assert_eq!(none["foreign_key_count"], 0);

            let info = gw.get_table_info("orders", schema, None).await.to_value();
            assert_eq!(info["status"], "success");
            assert!(info["indexes"].as_array().unwrap().len() >= 1);

            let stats = gw.get_table_statistics("orders", schema, None).await.to_value();
            assert_eq!(stats["status"], "success");
            assert_eq!(stats["total_rows"], 4);
            let columns = stats["numeric_columns"].as_array().unwrap();
            let qty = columns.iter().find(|c| c["column_name"] == "qty").unwrap();
            // upper median of {1, 2, 3, 4}
            assert_eq!(qty["median_value"], 3);
            let amount = columns.iter().find(|c| c["column_name"] == "amount").unwrap();
            assert_eq!(amount["non_null_count"], 3);
            assert_eq!(amount["median_value"], "20.25");

            let empty = gw.get_table_statistics("tags", schema, None).await.to_value();
            assert_eq!(empty["status"], "success");
            assert!(empty["numeric_columns"].as_array().unwrap().is_empty());

            let search = gw
                .search_table("customers", "name", "ali", schema, None, None)
                .await
                .to_value();
            assert_eq!(search["row_count"], 1);

            let stats = gw.stats();
            assert_eq!(stats.acquired, stats.released);
        })
        .await;

    teardown(&client, schema).await;
}

#[tokio::test]
async fn test_live_queries_and_context() {
    let settings = Settings::default();
    let config = test_config(&settings);
    let Some(client) = admin(&config).await else {
        return;
    };
    let schema = "gw_live_query";
    fixture(&client, schema).await;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let gw = Gateway::new(PgConnector, config.clone(), settings.clone());

            let rows = gw
                .execute_query(&format!("SELECT id, amount FROM {schema}.orders ORDER BY id"), Some(2), None)
                .await
                .to_value();
            assert_eq!(rows["status"], "success");
            assert_eq!(rows["row_count"], 2);
            assert_eq!(rows["rows"][0]["amount"], "10.50");

            let rejected = gw
                .execute_query(&format!("DELETE FROM {schema}.orders"), None, None)
                .await
                .to_value();
            assert_eq!(rejected["kind"], "policy_rejection");

            let switched = gw.switch_database("gw_no_such_database").await.to_value();
            assert_eq!(switched["status"], "error");
            assert_eq!(gw.current_database(), config.database);

            let check = gw.test_connection().await.to_value();
            assert_eq!(check["status"], "success");
            assert_eq!(check["test_query_result"], 1);

            let stats = gw.stats();
            assert_eq!(stats.acquired, stats.released);
        })
        .await;

    let rows = client
        .query(&format!("SELECT count(*) FROM {schema}.orders"), &[])
        .await
        .expect("count failed");
    let count: i64 = rows[0].get(0);
    assert_eq!(count, 4, "gateway must not have deleted anything");

    teardown(&client, schema).await;
}

#[tokio::test]
async fn test_live_values_render_losslessly() {
    let settings = Settings::default();
    let config = test_config(&settings);
    let Some(client) = admin(&config).await else {
        return;
    };
    let schema = "gw_live_values";
    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {schema} CASCADE;
             CREATE SCHEMA {schema};
             CREATE TABLE {schema}.wide (b numeric);
             INSERT INTO {schema}.wide VALUES
                 (1.5),
                 (2.75),
                 (99999999999999999999999999999999.25);"
        ))
        .await
        .expect("fixture setup failed");

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let gw = Gateway::new(PgConnector, config.clone(), settings.clone());

            let env = gw
                .execute_query(
                    "SELECT 12345678901234567890123456789012.5::numeric AS big,
                            'NaN'::numeric AS nan,
                            interval '1 day 2 hours' AS iv,
                            '10.0.0.1'::inet AS ip,
                            '192.168.0.0/16'::cidr AS net,
                            '12:00:00+02'::timetz AS tz,
                            16384::oid AS o,
                            12.34::numeric::money AS m,
                            'infinity'::timestamp AS ts,
                            ARRAY[1, NULL, 3] AS arr,
                            ARRAY[1.10, NULL]::numeric[] AS nums",
                    None,
                    None,
                )
                .await
                .to_value();
            assert_eq!(env["status"], "success", "{env}");
            let row = &env["rows"][0];
            assert_eq!(row["big"], "12345678901234567890123456789012.5");
            assert_eq!(row["nan"], "NaN");
            assert_eq!(row["iv"], "1 day 02:00:00");
            assert_eq!(row["ip"], "10.0.0.1");
            assert_eq!(row["net"], "192.168.0.0/16");
            assert_eq!(row["tz"], "12:00:00+02");
            assert_eq!(row["o"], "16384");
            assert_eq!(row["m"], "12.34");
            assert_eq!(row["ts"], "infinity");
            assert_eq!(row["arr"], serde_json::json!([1, null, 3]));
            assert_eq!(row["nums"], serde_json::json!(["1.10", null]));

            let stats = gw.get_table_statistics("wide", schema, None).await.to_value();
            assert_eq!(stats["status"], "success");
            let b = &stats["numeric_columns"][0];
            assert_eq!(b["max_value"], "99999999999999999999999999999999.25");
            assert_eq!(b["min_value"], "1.5");
            assert_eq!(b["median_value"], "2.75");
        })
        .await;

    teardown(&client, schema).await;
}
