//! Database type definitions
//!
//! Core data structures for representing query results, data types,
//! values and bound parameters independently of the driver.

/// Query execution results
#[derive(Debug, Clone)]
pub struct QueryResults {
    /// Column definitions, in declaration order
    pub columns: Vec<ColumnDef>,
    /// Result rows (fully fetched snapshot)
    pub rows: Vec<Row>,
}

/// Column definition in query results
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
}

/// Database data types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    // Integer types
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,
    Numeric,

    // Text types
    Text,
    Varchar,
    Char,

    // Boolean
    Boolean,

    // Date/time types
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,

    // JSON types
    Json,
    Jsonb,

    // Binary data
    Bytea,

    // UUID
    Uuid,

    // Array type
    Array(Box<DataType>),

    // Other/unknown types
    Unknown(String),
}

/// A single row of query results
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Cell values in column order
    pub values: Vec<CellValue>,
}

/// A cell value (single column value in a row)
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// NULL value
    Null,

    /// Integer value
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Text/string value; also carries lossless `numeric` renderings
    Text(String),

    /// Boolean value
    Boolean(bool),

    /// JSON value (parsed)
    Json(serde_json::Value),

    /// Binary data
    Binary(Vec<u8>),

    /// Date/time value, rendered as text
    DateTime(String),

    /// UUID value
    Uuid(String),

    /// Array value
    Array(Vec<CellValue>),
}

/// A bound statement parameter.
///
/// Catalog lookups only ever bind names and counts, so two variants cover
/// every statement the gateway issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Text(String),
    Int(i64),
}

static NULL: CellValue = CellValue::Null;

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Param::Int(n)
    }
}

impl QueryResults {
    pub fn new(columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build results from column names and raw values (types unknown)
    pub fn from_values(names: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let columns = names
            .iter()
            .map(|name| ColumnDef {
                name: name.to_string(),
                data_type: DataType::Unknown("unknown".to_string()),
            })
            .collect();
        let rows = rows.into_iter().map(|values| Row { values }).collect();
        Self::new(columns, rows)
    }

    /// Empty result with the given columns
    pub fn empty(names: &[&str]) -> Self {
        Self::from_values(names, Vec::new())
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// First row, if any
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Value of `column` in `row`, `Null` when either is missing
    pub fn value<'a>(&'a self, row: &'a Row, column: &str) -> &'a CellValue {
        self.column_index(column)
            .and_then(|idx| row.values.get(idx))
            .unwrap_or(&NULL)
    }

    /// Text value of `column` in `row`
    pub fn text(&self, row: &Row, column: &str) -> Option<String> {
        self.value(row, column).as_text()
    }

    /// Integer value of `column` in `row`
    pub fn int(&self, row: &Row, column: &str) -> Option<i64> {
        self.value(row, column).as_i64()
    }
}

impl CellValue {
    /// Textual view of scalar values; `None` for NULL, arrays and binary
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Text(s) | CellValue::DateTime(s) | CellValue::Uuid(s) => Some(s.clone()),
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Float(f) => Some(f.to_string()),
            CellValue::Boolean(b) => Some(b.to_string()),
            CellValue::Json(v) => Some(v.to_string()),
            CellValue::Null | CellValue::Binary(_) | CellValue::Array(_) => None,
        }
    }

    /// Integer view; accepts integral text such as a `bigint` rendered by a cast
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Floating point view, used only for explicitly requested aggregates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(f) => Some(*f),
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_text_views() {
        let v = CellValue::Text("12.50".to_string());
        assert_eq!(v.as_f64(), Some(12.5));
        assert_eq!(v.as_i64(), None);
        assert_eq!(CellValue::Text("42".to_string()).as_i64(), Some(42));
        assert_eq!(CellValue::Null.as_f64(), None);
    }

    #[test]
    fn test_named_lookup() {
        let results = QueryResults::from_values(
            &["schema", "name"],
            vec![vec![
                CellValue::Text("public".to_string()),
                CellValue::Text("users".to_string()),
            ]],
        );
        let row = results.first().unwrap();
        assert_eq!(results.text(row, "name").as_deref(), Some("users"));
        assert_eq!(results.text(row, "missing"), None);
    }
}
