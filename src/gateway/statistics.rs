//! Column statistics
//!
//! Min, max, mean, median and non-null count for every numeric column of a
//! table, all computed on one held session.
//!
//! The median is the element at offset `floor(n / 2)` of the ascending
//! non-null values. For odd `n` that is the textbook median; for even `n`
//! it is the upper of the two middle elements, not their average
//! (`{1, 2, 3, 4}` yields `3`). The offset is bound as a parameter.

use crate::db::provider::Session;
use crate::db::schema::ColumnStatistic;
use crate::db::types::Param;
use crate::error::{DbError, DbResult};
use crate::gateway::envelope::cell_to_json;
use crate::gateway::introspect::{self, qualified_name, quote_ident};
use serde::Serialize;

/// Declared types that qualify a column for statistics
pub const NUMERIC_TYPES: [&str; 7] = [
    "smallint",
    "integer",
    "bigint",
    "numeric",
    "decimal",
    "real",
    "double precision",
];

const NUMERIC_COLUMNS_SQL: &str = "\
SELECT column_name::text AS column_name, data_type::text AS data_type
FROM information_schema.columns
WHERE table_name::text = $1::text AND table_schema::text = $2::text
  AND data_type IN ('smallint', 'integer', 'bigint', 'numeric', 'decimal', 'real', 'double precision')
ORDER BY ordinal_position";

/// Statistics payload for one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatistics {
    /// `schema.table`
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<i64>,
    pub numeric_columns: Vec<ColumnStatistic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Offset of the median element among `non_null_count` sorted values
pub fn median_offset(non_null_count: i64) -> i64 {
    non_null_count.max(0) / 2
}

/// Compute statistics for every numeric column of `schema.table`.
///
/// A table without numeric columns is a success with a message and an
/// empty column list. A column whose aggregates fail is reported with null
/// statistics and its error; the remaining columns are still computed.
pub async fn compute_statistics<S: Session>(
    session: &S,
    table: &str,
    schema: &str,
) -> DbResult<TableStatistics> {
    let display_name = format!("{}.{}", schema, table);
    introspect::verify_table(session, schema, table).await?;

    let columns = session
        .query(NUMERIC_COLUMNS_SQL, &[table.into(), schema.into()])
        .await
        .map_err(|e| DbError::CatalogQueryFailure(e.to_string()))?;

    if columns.rows.is_empty() {
        return Ok(TableStatistics {
            table_name: display_name,
            total_rows: None,
            numeric_columns: Vec::new(),
            message: Some("No numeric columns found for statistics".to_string()),
        });
    }

    let relation = qualified_name(schema, table);
    let count = session
        .query(&format!("SELECT COUNT(*) AS total_rows FROM {}", relation), &[])
        .await?;
    let total_rows = count.first().and_then(|row| count.int(row, "total_rows"));

    let mut numeric_columns = Vec::with_capacity(columns.rows.len());
    for row in &columns.rows {
        let name = columns.text(row, "column_name").unwrap_or_default();
        let data_type = columns.text(row, "data_type").unwrap_or_default();

        let stat = match column_statistic(session, &relation, &name, &data_type).await {
            Ok(stat) => stat,
            Err(e) => {
                tracing::warn!(column = %name, table = %display_name, error = %e, "column statistics failed");
                ColumnStatistic::failed(name, data_type, e.to_string())
            }
        };
        numeric_columns.push(stat);
    }

    Ok(TableStatistics {
        table_name: display_name,
        total_rows,
        numeric_columns,
        message: None,
    })
}

async fn column_statistic<S: Session>(
    session: &S,
    relation: &str,
    column: &str,
    data_type: &str,
) -> DbResult<ColumnStatistic> {
    let col = quote_ident(column);

    let aggregates = session
        .query(
            &format!(
                "SELECT MIN({col}) AS min_value, MAX({col}) AS max_value, \
                 AVG({col})::float8 AS avg_value, COUNT({col}) AS non_null_count \
                 FROM {relation} WHERE {col} IS NOT NULL"
            ),
            &[],
        )
        .await?;
    let row = aggregates
        .first()
        .ok_or_else(|| DbError::QueryFailed(format!("no aggregate row for {}", column)))?;
    let non_null_count = aggregates.int(row, "non_null_count").unwrap_or(0);

    let median_value = if non_null_count > 0 {
        let median = session
            .query(
                &format!(
                    "SELECT {col} AS median_value FROM {relation} \
                     WHERE {col} IS NOT NULL ORDER BY {col} LIMIT 1 OFFSET $1"
                ),
                &[Param::Int(median_offset(non_null_count))],
            )
            .await?;
        median
            .first()
            .map(|r| cell_to_json(median.value(r, "median_value")))
            .unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::Null
    };

    Ok(ColumnStatistic {
        column_name: column.to_string(),
        data_type: data_type.to_string(),
        min_value: cell_to_json(aggregates.value(row, "min_value")),
        max_value: cell_to_json(aggregates.value(row, "max_value")),
        avg_value: aggregates.value(row, "avg_value").as_f64(),
        median_value,
        non_null_count: Some(non_null_count),
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn median_of(sorted: &[i64]) -> i64 {
        sorted[median_offset(sorted.len() as i64) as usize]
    }

    #[test]
    fn test_odd_count_median() {
        assert_eq!(median_offset(5), 2);
        assert_eq!(median_of(&[1, 2, 3, 4, 5]), 3);
    }

    #[test]
    fn test_even_count_takes_upper_middle() {
        assert_eq!(median_offset(4), 2);
        assert_eq!(median_of(&[1, 2, 3, 4]), 3);
    }

    #[test]
    fn test_degenerate_counts() {
        assert_eq!(median_offset(0), 0);
        assert_eq!(median_offset(1), 0);
        assert_eq!(median_offset(-3), 0);
    }

    #[test]
    fn test_numeric_type_set_matches_catalog_filter() {
        for ty in NUMERIC_TYPES {
            assert!(NUMERIC_COLUMNS_SQL.contains(&format!("'{}'", ty)));
        }
        assert!(!NUMERIC_TYPES.contains(&"text"));
    }

    #[test]
    fn test_empty_payload_shape() {
        let stats = TableStatistics {
            table_name: "public.tags".to_string(),
            total_rows: None,
            numeric_columns: Vec::new(),
            message: Some("No numeric columns found for statistics".to_string()),
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("total_rows").is_none());
        assert!(json["numeric_columns"].as_array().unwrap().is_empty());
    }
}
