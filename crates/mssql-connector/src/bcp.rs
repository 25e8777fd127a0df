//! BCP bulk ingest orchestration.
//!
//! Thin glue between [`crate::catalog::TableMetadata`] and
//! [`mssql_client::bulk`]: derives the bulk column list from catalog
//! metadata, then drives [`mssql_client::Client::bulk_insert`] over a
//! pooled connection, flushing every `copy_flush_rows` rows.

use mssql_client::bulk::{BulkColumn, BulkInsertBuilder, BulkInsertResult, BulkOptions};
use mssql_driver_pool::Pool;
use mssql_types::SqlValue;

use crate::catalog::{logical_to_sql_type, CatalogColumn};
use crate::error::Result;
use crate::settings::{CtasTextType, Settings};

/// Map a catalog column to the wire-level [`BulkColumn`] the native BCP row
/// format needs, reusing the same logical-to-SQL-type reverse mapping CTAS
/// uses so a bulk load always sees the same type string a `CREATE TABLE`
/// generated from the same metadata would.
fn to_bulk_column(column: &CatalogColumn, ordinal: usize) -> BulkColumn {
    let sql_type = logical_to_sql_type(column.logical_type, CtasTextType::NVarchar);
    BulkColumn::new(column.name.clone(), sql_type, ordinal).with_nullable(column.nullable)
}

/// Run a bulk ingest of `rows` into `schema.table`, batching by
/// `settings.copy_flush_rows`.
pub async fn bulk_load(
    pool: &Pool,
    schema: &str,
    table: &str,
    columns: &[CatalogColumn],
    settings: &Settings,
    rows: impl IntoIterator<Item = Vec<SqlValue>>,
) -> Result<BulkInsertResult> {
    let bulk_columns: Vec<BulkColumn> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| to_bulk_column(c, i))
        .collect();
    let column_names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    let options = BulkOptions {
        batch_size: settings.copy_flush_rows,
        table_lock: true,
        ..Default::default()
    };

    let builder = BulkInsertBuilder::new(format!("{schema}.{table}"))
        .with_columns(&column_names)
        .with_typed_columns(bulk_columns)
        .with_options(options);

    tracing::debug!(schema, table, batch_size = settings.copy_flush_rows, "starting bulk load");
    let mut conn = pool.get().await?;
    let result = conn.bulk_insert(&builder, rows).await?;
    tracing::debug!(schema, table, rows = result.rows_affected, "bulk load complete");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogColumn, LogicalType};

    #[test]
    fn maps_catalog_column_to_bulk_column() {
        let column = CatalogColumn {
            name: "Total".to_string(),
            ordinal: 1,
            logical_type: LogicalType::Decimal(10, 2),
            nullable: true,
            collation: None,
        };
        let bulk_column = to_bulk_column(&column, 0);
        assert_eq!(bulk_column.name, "Total");
        assert_eq!(bulk_column.sql_type, "DECIMAL(10,2)");
        assert!(bulk_column.nullable);
    }
}
