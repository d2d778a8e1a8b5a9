//! Database abstraction layer
//!
//! This module provides a trait-based abstraction over database connections,
//! a tokio-postgres backend with lossless value rendering, and the catalog
//! descriptor types returned by introspection.

pub mod postgres;
pub mod provider;
pub mod render;
pub mod schema;
pub mod types;

// Re-export main types
pub use postgres::{PgConnector, PgSession};
pub use provider::{Connector, Session};
pub use schema::{
    ColumnDescriptor, ColumnStatistic, ForeignKeyEdge, IndexDefinition, PartialFailure,
    TableDescriptor, TableEntry,
};
pub use types::{CellValue, ColumnDef, DataType, Param, QueryResults, Row};
