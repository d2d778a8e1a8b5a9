//! Request dispatch
//!
//! Maps one request line (`{"operation": ..., "arguments": {...}, "id": ...}`)
//! to a gateway call and always answers with an envelope, echoing `id` when
//! the request carried one. Unknown argument keys are ignored.

use crate::db::provider::Connector;
use crate::error::{RequestError, RequestResult};
use crate::gateway::{Envelope, Failure, Gateway};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Operation names accepted by [`dispatch`]
pub const OPERATIONS: [&str; 16] = [
    "list_tables",
    "describe_table",
    "execute_query",
    "get_table_sample",
    "search_table",
    "list_databases",
    "list_schemas",
    "get_database_info",
    "get_table_info",
    "test_connection",
    "switch_database",
    "query_database",
    "get_table_statistics",
    "get_foreign_keys",
    "explain_query",
    "server_status",
];

fn public_schema() -> String {
    "public".to_string()
}

#[derive(Debug, Deserialize)]
struct Request {
    operation: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
    #[serde(default)]
    id: Option<Value>,
}

/// A decoded gateway call
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Call {
    ListTables {
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    DescribeTable {
        table_name: String,
        schema_name: Option<String>,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    ExecuteQuery {
        query: String,
        limit: Option<u64>,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    GetTableSample {
        table_name: String,
        #[serde(default = "public_schema")]
        schema_name: String,
        limit: Option<u64>,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    SearchTable {
        table_name: String,
        column_name: String,
        search_term: String,
        #[serde(default = "public_schema")]
        schema_name: String,
        limit: Option<u64>,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    ListDatabases,
    ListSchemas {
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    GetDatabaseInfo {
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    GetTableInfo {
        table_name: String,
        #[serde(default = "public_schema")]
        schema_name: String,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    TestConnection,
    SwitchDatabase {
        database_name: String,
    },
    QueryDatabase {
        database_name: String,
        query: String,
        limit: Option<u64>,
    },
    GetTableStatistics {
        table_name: String,
        #[serde(default = "public_schema")]
        schema_name: String,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    GetForeignKeys {
        table_name: String,
        #[serde(default = "public_schema")]
        schema_name: String,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    ExplainQuery {
        query: String,
        #[serde(alias = "database_name")]
        database: Option<String>,
    },
    ServerStatus,
}

impl Call {
    /// Decode an operation name and its flat argument mapping
    pub fn decode(operation: &str, arguments: Map<String, Value>) -> RequestResult<Self> {
        if !OPERATIONS.contains(&operation) {
            return Err(RequestError::UnknownOperation(operation.to_string()));
        }
        let mut tagged = arguments;
        tagged.insert("operation".to_string(), Value::String(operation.to_string()));
        serde_json::from_value(Value::Object(tagged)).map_err(|e| RequestError::InvalidArguments {
            operation: operation.to_string(),
            message: e.to_string(),
        })
    }

    /// Run the call and serialize its envelope
    pub async fn execute<C: Connector>(self, gateway: &Gateway<C>) -> Value {
        match self {
            Call::ListTables { database } => {
                gateway.list_tables(database.as_deref()).await.to_value()
            }
            Call::DescribeTable {
                table_name,
                schema_name,
                database,
            } => gateway
                .describe_table(&table_name, schema_name.as_deref(), database.as_deref())
                .await
                .to_value(),
            Call::ExecuteQuery {
                query,
                limit,
                database,
            } => gateway
                .execute_query(&query, limit, database.as_deref())
                .await
                .to_value(),
            Call::GetTableSample {
                table_name,
                schema_name,
                limit,
                database,
            } => gateway
                .get_table_sample(&table_name, &schema_name, limit, database.as_deref())
                .await
                .to_value(),
            Call::SearchTable {
                table_name,
                column_name,
                search_term,
                schema_name,
                limit,
                database,
            } => gateway
                .search_table(
                    &table_name,
                    &column_name,
                    &search_term,
                    &schema_name,
                    limit,
                    database.as_deref(),
                )
                .await
                .to_value(),
            Call::ListDatabases => gateway.list_databases().await.to_value(),
            Call::ListSchemas { database } => {
                gateway.list_schemas(database.as_deref()).await.to_value()
            }
            Call::GetDatabaseInfo { database } => {
                gateway.get_database_info(database.as_deref()).await.to_value()
            }
            Call::GetTableInfo {
                table_name,
                schema_name,
                database,
            } => gateway
                .get_table_info(&table_name, &schema_name, database.as_deref())
                .await
                .to_value(),
            Call::TestConnection => gateway.test_connection().await.to_value(),
            Call::SwitchDatabase { database_name } => {
                gateway.switch_database(&database_name).await.to_value()
            }
            Call::QueryDatabase {
                database_name,
                query,
                limit,
            } => gateway
                .query_database(&database_name, &query, limit)
                .await
                .to_value(),
            Call::GetTableStatistics {
                table_name,
                schema_name,
                database,
            } => gateway
                .get_table_statistics(&table_name, &schema_name, database.as_deref())
                .await
                .to_value(),
            Call::GetForeignKeys {
                table_name,
                schema_name,
                database,
            } => gateway
                .get_foreign_keys(&table_name, &schema_name, database.as_deref())
                .await
                .to_value(),
            Call::ExplainQuery { query, database } => gateway
                .explain_query(&query, database.as_deref())
                .await
                .to_value(),
            Call::ServerStatus => gateway.server_status().to_value(),
        }
    }
}

fn request_failure(e: &RequestError) -> Value {
    tracing::warn!("rejected request: {}", e);
    let mut failure = Failure::new(e.to_string(), e.kind());
    if let RequestError::UnknownOperation(op) | RequestError::InvalidArguments { operation: op, .. } = e {
        failure = failure.with("operation", op.as_str());
    }
    Envelope::<()>::Error(failure).to_value()
}

/// Decode one request line, run it, and return the response envelope
pub async fn dispatch<C: Connector>(gateway: &Gateway<C>, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return request_failure(&RequestError::Malformed(e.to_string())),
    };

    tracing::debug!(operation = %request.operation, "dispatching");
    let arguments = request.arguments.unwrap_or_default();
    let mut response = match Call::decode(&request.operation, arguments) {
        Ok(call) => call.execute(gateway).await,
        Err(e) => request_failure(&e),
    };

    if let (Some(id), Value::Object(obj)) = (request.id, &mut response) {
        obj.insert("id".to_string(), id);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_defaults_apply() {
        let call = Call::decode("get_table_info", args(json!({"table_name": "users"}))).unwrap();
        assert_eq!(
            call,
            Call::GetTableInfo {
                table_name: "users".to_string(),
                schema_name: "public".to_string(),
                database: None,
            }
        );
    }

    #[test]
    fn test_database_alias() {
        let call = Call::decode(
            "get_foreign_keys",
            args(json!({"table_name": "orders", "database_name": "shop"})),
        )
        .unwrap();
        assert!(matches!(
            call,
            Call::GetForeignKeys { database: Some(ref db), .. } if db == "shop"
        ));
    }

    #[test]
    fn test_ignores_placeholder_arguments() {
        let call = Call::decode("list_databases", args(json!({"random_string": "dummy"}))).unwrap();
        assert_eq!(call, Call::ListDatabases);
        let call = Call::decode("server_status", Map::new()).unwrap();
        assert_eq!(call, Call::ServerStatus);
    }

    #[test]
    fn test_unknown_operation() {
        let err = Call::decode("drop_everything", Map::new()).unwrap_err();
        assert!(matches!(err, RequestError::UnknownOperation(ref op) if op == "drop_everything"));
    }

    #[test]
    fn test_missing_required_argument() {
        let err = Call::decode("execute_query", Map::new()).unwrap_err();
        match err {
            RequestError::InvalidArguments { operation, message } => {
                assert_eq!(operation, "execute_query");
                assert!(message.contains("query"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_negative_limit_rejected() {
        let err = Call::decode("execute_query", args(json!({"query": "SELECT 1", "limit": -1})));
        assert!(err.is_err());
    }
}
