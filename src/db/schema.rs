//! Catalog descriptors
//!
//! Structures built from system catalog rows. All are transient: built
//! fresh per call and serialized straight into a response envelope.

use serde::Serialize;

/// A base table outside the system schemas
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    pub schema: String,
    pub name: String,
    /// `schema.name`
    pub full_name: String,
}

/// Column metadata from `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i64>,
    pub table_schema: String,
}

/// One column pairing of a foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyEdge {
    pub constraint_name: String,
    pub table_name: String,
    pub column_name: String,
    pub foreign_table_name: String,
    pub foreign_column_name: String,
}

/// An index and its `CREATE INDEX` definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDefinition {
    pub index_name: String,
    pub index_definition: String,
}

/// A sub-query of a multi-step lookup that failed while the others succeeded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialFailure {
    pub step: String,
    pub error: String,
}

/// Physical and planner facts about one table.
///
/// Each group of fields comes from an independent catalog query; a group
/// whose query failed or found nothing is left empty and, on failure,
/// noted in `partial_failures`.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TableDescriptor {
    pub schema_name: String,
    pub table_name: String,
    pub table_owner: Option<String>,
    pub total_size: Option<String>,
    pub table_size: Option<String>,
    pub estimated_row_count: Option<i64>,
    pub indexes: Vec<IndexDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partial_failures: Vec<PartialFailure>,
}

/// Summary statistics for one numeric column.
///
/// `min_value`, `max_value` and `median_value` keep the column's own type
/// (integers as numbers, `numeric` as lossless strings); `avg_value` is a
/// float because it is an explicitly requested aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStatistic {
    pub column_name: String,
    pub data_type: String,
    pub min_value: serde_json::Value,
    pub max_value: serde_json::Value,
    pub avg_value: Option<f64>,
    pub median_value: serde_json::Value,
    pub non_null_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ColumnStatistic {
    /// A column whose computation failed; the run continues without it
    pub fn failed(column_name: String, data_type: String, error: String) -> Self {
        Self {
            column_name,
            data_type,
            min_value: serde_json::Value::Null,
            max_value: serde_json::Value::Null,
            avg_value: None,
            median_value: serde_json::Value::Null,
            non_null_count: None,
            error: Some(error),
        }
    }
}
