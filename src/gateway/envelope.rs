//! Result envelopes and row normalization
//!
//! Every gateway operation answers with an [`Envelope`]: either
//! `{"status": "success", ...payload}` or
//! `{"status": "error", "error": ..., "kind": ..., ...context}`, so callers
//! can tell outcomes apart without looking inside the payload.

use crate::db::render;
use crate::db::types::{CellValue, QueryResults};
use crate::error::{DbError, ErrorKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Uniform response shape of every operation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Envelope<T> {
    Success(T),
    Error(Failure),
}

/// Failure body: a message, a stable kind, and whatever request fields
/// (table, query, database) were known when the call failed
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub error: String,
    pub kind: ErrorKind,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl Failure {
    pub fn new(error: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            error: error.into(),
            kind,
            context: Map::new(),
        }
    }

    /// Echo a request-identifying field alongside the error
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl From<&DbError> for Failure {
    fn from(e: &DbError) -> Self {
        Failure::new(e.to_string(), e.kind())
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize into a JSON value for the transport
    pub fn to_value(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => value,
            Err(e) => {
                let failure = Failure::new(
                    format!("failed to serialize response: {}", e),
                    ErrorKind::QueryFailure,
                );
                serde_json::to_value(Envelope::<()>::Error(failure)).unwrap_or(Value::Null)
            }
        }
    }
}

/// Convert a result set into ordered row mappings.
///
/// Keys follow column declaration order. A repeated column name gets a
/// `_2`, `_3`, ... suffix so every key in a row is unique.
pub fn to_records(results: &QueryResults) -> Vec<Map<String, Value>> {
    let keys = unique_keys(results.columns.iter().map(|c| c.name.as_str()));

    results
        .rows
        .iter()
        .map(|row| {
            let mut obj = Map::with_capacity(keys.len());
            for (key, cell) in keys.iter().zip(row.values.iter()) {
                obj.insert(key.clone(), cell_to_json(cell));
            }
            obj
        })
        .collect()
}

fn unique_keys<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let names: Vec<&str> = names.collect();
    let mut taken: HashSet<String> = HashSet::with_capacity(names.len());
    let mut keys = Vec::with_capacity(names.len());

    for name in names {
        let key = if taken.contains(name) {
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if !taken.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            }
        } else {
            name.to_string()
        };
        taken.insert(key.clone());
        keys.push(key);
    }
    keys
}

/// Convert a CellValue to a JSON value with type preservation.
///
/// Lossless text is used for anything JSON numbers cannot carry exactly.
pub fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Integer(i) => Value::from(*i),
        CellValue::Float(f) => {
            if f.is_finite() {
                Value::from(*f)
            } else {
                // NaN / Infinity aren't valid JSON numbers
                Value::String(f.to_string())
            }
        }
        CellValue::Text(s) | CellValue::DateTime(s) | CellValue::Uuid(s) => {
            Value::String(s.clone())
        }
        CellValue::Boolean(b) => Value::Bool(*b),
        CellValue::Json(v) => v.clone(),
        CellValue::Binary(b) => Value::String(render::hex(b)),
        CellValue::Array(arr) => Value::Array(arr.iter().map(cell_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Rows {
        row_count: usize,
    }

    #[test]
    fn test_success_shape() {
        let env = Envelope::Success(Rows { row_count: 0 });
        let json = env.to_value();
        assert_eq!(json["status"], "success");
        assert_eq!(json["row_count"], 0);
        assert!(json.get("error").is_none());
        // status leads the object
        assert_eq!(json.as_object().unwrap().keys().next().unwrap(), "status");
    }

    #[test]
    fn test_error_shape_echoes_context() {
        let err = DbError::PolicyRejection("only SELECT statements are allowed, got DROP".into());
        let env: Envelope<Rows> =
            Envelope::Error(Failure::from(&err).with("query", "DROP TABLE t"));
        let json = env.to_value();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "policy_rejection");
        assert_eq!(json["query"], "DROP TABLE t");
        assert!(json["error"].as_str().unwrap().contains("not permitted"));
    }

    #[test]
    fn test_records_preserve_order() {
        let results = QueryResults::from_values(
            &["zeta", "alpha", "mid"],
            vec![vec![
                CellValue::Integer(1),
                CellValue::Text("a".into()),
                CellValue::Null,
            ]],
        );
        let records = to_records(&results);
        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
        assert!(records[0]["mid"].is_null());
    }

    #[test]
    fn test_duplicate_columns_get_suffixes() {
        let results = QueryResults::from_values(
            &["id", "id", "id_2", "id"],
            vec![vec![
                CellValue::Integer(1),
                CellValue::Integer(2),
                CellValue::Integer(3),
                CellValue::Integer(4),
            ]],
        );
        let records = to_records(&results);
        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, ["id", "id_2", "id_2_2", "id_3"]);
        assert_eq!(records[0]["id_2"], 2);
        assert_eq!(records[0]["id_3"], 4);
    }

    #[test]
    fn test_zero_rows() {
        let results = QueryResults::new(Vec::new(), Vec::new());
        assert!(to_records(&results).is_empty());
    }

    #[test]
    fn test_lossless_values() {
        assert_eq!(
            cell_to_json(&CellValue::Text("12345678901234567890.123".into())),
            "12345678901234567890.123"
        );
        assert_eq!(
            cell_to_json(&CellValue::Binary(vec![0xde, 0xad, 0xbe, 0xef])),
            "\\xdeadbeef"
        );
        assert_eq!(cell_to_json(&CellValue::Float(f64::NAN)), "NaN");
        assert_eq!(cell_to_json(&CellValue::Float(f64::INFINITY)), "inf");
        assert_eq!(cell_to_json(&CellValue::Float(1.5)), 1.5);
    }

    #[test]
    fn test_nested_values() {
        let inner = serde_json::json!({"nested": [1, 2, 3]});
        assert_eq!(cell_to_json(&CellValue::Json(inner.clone())), inner);
        let arr = CellValue::Array(vec![CellValue::Text("a".into()), CellValue::Null]);
        assert_eq!(cell_to_json(&arr), serde_json::json!(["a", null]));
    }
}
