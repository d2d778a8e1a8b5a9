//! Schema introspection
//!
//! Pure reads against `information_schema` and `pg_catalog`. Catalog
//! columns are cast to `text` in the select list because their domain types
//! (`sql_identifier`, `yes_or_no`, `name`) do not decode as strings, and
//! every bound name is compared as `$n::text` for the same reason.
//!
//! Identifiers that must be interpolated (sampling, search, statistics)
//! are first looked up here and only the catalog-reported spelling is
//! quoted into statement text.

use crate::db::provider::Session;
use crate::db::schema::{
    ColumnDescriptor, ForeignKeyEdge, IndexDefinition, PartialFailure, TableDescriptor, TableEntry,
};
use crate::db::types::{Param, QueryResults, Row};
use crate::error::{DbError, DbResult};

/// Schemas never reported as user schemas
pub const SYSTEM_SCHEMAS: [&str; 3] = ["information_schema", "pg_catalog", "pg_toast"];

const LIST_TABLES_SQL: &str = "\
SELECT table_schema::text AS table_schema,
       table_name::text AS table_name,
       (table_schema || '.' || table_name)::text AS full_name
FROM information_schema.tables
WHERE table_type = 'BASE TABLE'
  AND table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
ORDER BY table_schema, table_name";

const COLUMNS_IN_SCHEMA_SQL: &str = "\
SELECT column_name::text AS column_name,
       data_type::text AS data_type,
       is_nullable::text AS is_nullable,
       column_default::text AS column_default,
       character_maximum_length::bigint AS character_maximum_length,
       table_schema::text AS table_schema
FROM information_schema.columns
WHERE table_name::text = $1::text AND table_schema::text = $2::text
ORDER BY ordinal_position";

const COLUMNS_ANY_SCHEMA_SQL: &str = "\
SELECT column_name::text AS column_name,
       data_type::text AS data_type,
       is_nullable::text AS is_nullable,
       column_default::text AS column_default,
       character_maximum_length::bigint AS character_maximum_length,
       table_schema::text AS table_schema
FROM information_schema.columns
WHERE table_name::text = $1::text
  AND table_schema NOT IN ('information_schema', 'pg_catalog', 'pg_toast')
ORDER BY table_schema, ordinal_position";

const FOREIGN_KEYS_SQL: &str = "\
SELECT tc.constraint_name::text AS constraint_name,
       tc.table_name::text AS table_name,
       kcu.column_name::text AS column_name,
       ccu.table_name::text AS foreign_table_name,
       ccu.column_name::text AS foreign_column_name
FROM information_schema.table_constraints AS tc
JOIN information_schema.key_column_usage AS kcu
  ON tc.constraint_name = kcu.constraint_name
 AND tc.table_schema = kcu.table_schema
JOIN information_schema.constraint_column_usage AS ccu
  ON ccu.constraint_name = tc.constraint_name
 AND ccu.table_schema = tc.table_schema
WHERE tc.constraint_type = 'FOREIGN KEY'
  AND tc.table_name::text = $1::text
  AND tc.table_schema::text = $2::text
ORDER BY tc.constraint_name, kcu.ordinal_position";

const TABLE_SIZE_SQL: &str = "\
SELECT tableowner::text AS table_owner,
       pg_size_pretty(pg_total_relation_size(format('%I.%I', schemaname, tablename)::regclass)) AS total_size,
       pg_size_pretty(pg_relation_size(format('%I.%I', schemaname, tablename)::regclass)) AS table_size
FROM pg_tables
WHERE tablename::text = $1::text AND schemaname::text = $2::text";

const ROW_ESTIMATE_SQL: &str = "\
SELECT c.reltuples::bigint AS estimated_row_count
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relname::text = $1::text AND n.nspname::text = $2::text";

const INDEXES_SQL: &str = "\
SELECT indexname::text AS index_name,
       indexdef AS index_definition
FROM pg_indexes
WHERE tablename::text = $1::text AND schemaname::text = $2::text
ORDER BY indexname";

const LIST_DATABASES_SQL: &str = "\
SELECT datname::text AS database_name,
       pg_encoding_to_char(encoding)::text AS encoding,
       datcollate::text AS collation,
       pg_size_pretty(pg_database_size(datname)) AS size
FROM pg_database
WHERE datistemplate = false
ORDER BY datname";

const LIST_SCHEMAS_SQL: &str = "\
SELECT schema_name::text AS schema_name,
       schema_owner::text AS schema_owner,
       CASE WHEN schema_name IN ('information_schema', 'pg_catalog', 'pg_toast')
            THEN 'system' ELSE 'user' END AS schema_type
FROM information_schema.schemata
ORDER BY CASE WHEN schema_name = 'public' THEN 0 ELSE 1 END, schema_name";

const DATABASE_INFO_SQL: &str = "\
SELECT current_database()::text AS database_name,
       current_user::text AS current_user,
       session_user::text AS session_user,
       version() AS postgresql_version,
       current_setting('server_version') AS server_version,
       pg_size_pretty(pg_database_size(current_database())) AS database_size";

const TABLE_EXISTS_SQL: &str = "\
SELECT table_name::text AS table_name
FROM information_schema.tables
WHERE table_schema::text = $1::text AND table_name::text = $2::text";

const COLUMN_EXISTS_SQL: &str = "\
SELECT column_name::text AS column_name
FROM information_schema.columns
WHERE table_schema::text = $1::text AND table_name::text = $2::text
  AND column_name::text = $3::text";

/// Double-quote an identifier for interpolation into statement text
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Run a catalog statement, folding execution errors into
/// `CatalogQueryFailure`. Connection errors keep their own kind.
async fn catalog<S: Session>(
    session: &S,
    sql: &str,
    params: &[Param],
) -> DbResult<QueryResults> {
    session.query(sql, params).await.map_err(|e| match e {
        DbError::QueryFailed(msg) => {
            DbError::CatalogQueryFailure(msg)
        }
        other => other,
    })
}

fn required_text(results: &QueryResults, row: &Row, column: &str) -> String {
    results.text(row, column).unwrap_or_default()
}

/// All base tables outside the system schemas, ordered by (schema, table)
pub async fn list_tables<S: Session>(session: &S) -> DbResult<Vec<TableEntry>> {
    let results = catalog(session, LIST_TABLES_SQL, &[]).await?;
    Ok(results
        .rows
        .iter()
        .map(|row| TableEntry {
            schema: required_text(&results, row, "table_schema"),
            name: required_text(&results, row, "table_name"),
            full_name: required_text(&results, row, "full_name"),
        })
        .filter(|t| !SYSTEM_SCHEMAS.contains(&t.schema.as_str()))
        .collect())
}

/// Column metadata for `table`.
///
/// With no schema, every non-system schema is searched and columns of all
/// matching tables are returned, each schema's columns in ordinal order.
pub async fn describe_table<S: Session>(
    session: &S,
    table: &str,
    schema: Option<&str>,
) -> DbResult<Vec<ColumnDescriptor>> {
    let results = match schema {
        Some(schema) => {
            catalog(session, COLUMNS_IN_SCHEMA_SQL, &[table.into(), schema.into()]).await?
        }
        None => catalog(session, COLUMNS_ANY_SCHEMA_SQL, &[table.into()]).await?,
    };

    Ok(results
        .rows
        .iter()
        .map(|row| ColumnDescriptor {
            column_name: required_text(&results, row, "column_name"),
            data_type: required_text(&results, row, "data_type"),
            is_nullable: results
                .text(row, "is_nullable")
                .is_some_and(|v| v.eq_ignore_ascii_case("YES")),
            column_default: results.text(row, "column_default"),
            character_maximum_length: results.int(row, "character_maximum_length"),
            table_schema: required_text(&results, row, "table_schema"),
        })
        .collect())
}

/// Distinct schemas in which the described columns were found, in order
pub fn schemas_found(columns: &[ColumnDescriptor]) -> Vec<String> {
    let mut schemas: Vec<String> = Vec::new();
    for column in columns {
        if !schemas.contains(&column.table_schema) {
            schemas.push(column.table_schema.clone());
        }
    }
    schemas
}

/// Foreign-key edges owned by `schema.table`
pub async fn foreign_keys<S: Session>(
    session: &S,
    table: &str,
    schema: &str,
) -> DbResult<Vec<ForeignKeyEdge>> {
    let results = catalog(session, FOREIGN_KEYS_SQL, &[table.into(), schema.into()]).await?;
    Ok(results
        .rows
        .iter()
        .map(|row| ForeignKeyEdge {
            constraint_name: required_text(&results, row, "constraint_name"),
            table_name: required_text(&results, row, "table_name"),
            column_name: required_text(&results, row, "column_name"),
            foreign_table_name: required_text(&results, row, "foreign_table_name"),
            foreign_column_name: required_text(&results, row, "foreign_column_name"),
        })
        .collect())
}

/// Size, owner, planner estimate and indexes of one table.
///
/// The three lookups run one after another on the same session and fail
/// independently; a failed lookup is recorded in `partial_failures` and its
/// fields stay empty. The call only fails when every lookup failed or the
/// table is unknown to both the size and the estimate lookups.
pub async fn table_info<S: Session>(
    session: &S,
    table: &str,
    schema: &str,
) -> DbResult<TableDescriptor> {
    let params = [Param::from(table), Param::from(schema)];
    let mut info = TableDescriptor {
        schema_name: schema.to_string(),
        table_name: table.to_string(),
        ..Default::default()
    };
    let mut failures = 0;
    let mut found = false;

    match catalog(session, TABLE_SIZE_SQL, &params).await {
        Ok(results) => {
            if let Some(row) = results.first() {
                found = true;
                info.table_owner = results.text(row, "table_owner");
                info.total_size = results.text(row, "total_size");
                info.table_size = results.text(row, "table_size");
            }
        }
        Err(e) => {
            failures += 1;
            info.partial_failures.push(PartialFailure {
                step: "size".to_string(),
                error: e.to_string(),
            });
        }
    }

    match catalog(session, ROW_ESTIMATE_SQL, &params).await {
        Ok(results) => {
            if let Some(row) = results.first() {
                found = true;
                // -1 means the table was never vacuumed or analyzed
                info.estimated_row_count = results
                    .int(row, "estimated_row_count")
                    .filter(|estimate| *estimate >= 0);
            }
        }
        Err(e) => {
            failures += 1;
            info.partial_failures.push(PartialFailure {
                step: "row_estimate".to_string(),
                error: e.to_string(),
            });
        }
    }

    match catalog(session, INDEXES_SQL, &params).await {
        Ok(results) => {
            info.indexes = results
                .rows
                .iter()
                .map(|row| IndexDefinition {
                    index_name: required_text(&results, row, "index_name"),
                    index_definition: required_text(&results, row, "index_definition"),
                })
                .collect();
        }
        Err(e) => {
            failures += 1;
            info.partial_failures.push(PartialFailure {
                step: "indexes".to_string(),
                error: e.to_string(),
            });
        }
    }

    if failures == 3 {
        let detail = info
            .partial_failures
            .iter()
            .map(|f| format!("{}: {}", f.step, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(DbError::CatalogQueryFailure(detail));
    }
    if !found && info.partial_failures.is_empty() {
        return Err(DbError::CatalogQueryFailure(format!(
            "table {}.{} not found",
            schema, table
        )));
    }

    Ok(info)
}

/// Non-template databases with encoding, collation and size
pub async fn list_databases<S: Session>(session: &S) -> DbResult<QueryResults> {
    catalog(session, LIST_DATABASES_SQL, &[]).await
}

/// All schemas, `public` first then by name
pub async fn list_schemas<S: Session>(session: &S) -> DbResult<QueryResults> {
    catalog(session, LIST_SCHEMAS_SQL, &[]).await
}

/// Current database, users, server version and size
pub async fn database_info<S: Session>(session: &S) -> DbResult<QueryResults> {
    catalog(session, DATABASE_INFO_SQL, &[]).await
}

/// Confirm `schema.table` exists before its name is interpolated
pub async fn verify_table<S: Session>(session: &S, schema: &str, table: &str) -> DbResult<()> {
    let results = catalog(session, TABLE_EXISTS_SQL, &[schema.into(), table.into()]).await?;
    if results.rows.is_empty() {
        return Err(DbError::CatalogQueryFailure(format!(
            "table {}.{} not found",
            schema, table
        )));
    }
    Ok(())
}

/// Confirm `column` belongs to `schema.table` before its name is interpolated
pub async fn verify_column<S: Session>(
    session: &S,
    schema: &str,
    table: &str,
    column: &str,
) -> DbResult<()> {
    let results = catalog(
        session,
        COLUMN_EXISTS_SQL,
        &[schema.into(), table.into(), column.into()],
    )
    .await?;
    if results.rows.is_empty() {
        return Err(DbError::CatalogQueryFailure(format!(
            "column {} not found in {}.{}",
            column, schema, table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("Order Items"), "\"Order Items\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified_name("public", "users"), "\"public\".\"users\"");
    }

    #[test]
    fn test_schemas_found_keeps_first_seen_order() {
        let col = |schema: &str, name: &str| ColumnDescriptor {
            column_name: name.to_string(),
            data_type: "integer".to_string(),
            is_nullable: false,
            column_default: None,
            character_maximum_length: None,
            table_schema: schema.to_string(),
        };
        let columns = vec![col("billing", "id"), col("billing", "amount"), col("public", "id")];
        assert_eq!(schemas_found(&columns), ["billing", "public"]);
        assert!(schemas_found(&[]).is_empty());
    }

    #[test]
    fn test_catalog_sql_excludes_system_schemas() {
        for schema in SYSTEM_SCHEMAS {
            assert!(LIST_TABLES_SQL.contains(schema));
            assert!(COLUMNS_ANY_SCHEMA_SQL.contains(schema));
        }
    }
}
