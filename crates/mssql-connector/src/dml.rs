//! Batched INSERT/UPDATE/DELETE and CTAS.
//!
//! Mirrors the batching shape of [`mssql_client::bulk::BulkInsertBuilder`]
//! (accumulate, flush on a size threshold) but emits ordinary parameterized
//! T-SQL rather than the native BCP row format; see [`crate::bcp`] for the
//! high-throughput path.

use mssql_client::Row;
use mssql_driver_pool::Pool;
use mssql_types::SqlValue;

use crate::catalog::{logical_to_sql_type, CatalogColumn, TableMetadata};
use crate::error::{ConnectorError, Result};
use crate::planner::quote_ident;
use crate::settings::Settings;

/// Accumulates rows for a single target table and flushes batched INSERT
/// statements once `insert_batch_size` rows or `insert_max_sql_bytes` is
/// reached.
pub struct InsertBatcher<'a> {
    schema: String,
    table: String,
    columns: Vec<String>,
    returning: Vec<String>,
    settings: &'a Settings,
    pending: Vec<Vec<SqlValue>>,
    pending_bytes: usize,
    rows_affected: u64,
    returned_rows: Vec<Row>,
}

impl<'a> InsertBatcher<'a> {
    /// Start a batcher targeting `schema.table` with the given projection
    /// of column names (INSERT column order).
    #[must_use]
    pub fn new(schema: impl Into<String>, table: impl Into<String>, columns: Vec<String>, settings: &'a Settings) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            columns,
            returning: Vec::new(),
            settings,
            pending: Vec::new(),
            pending_bytes: 0,
            rows_affected: 0,
            returned_rows: Vec::new(),
        }
    }

    /// Request `OUTPUT INSERTED.<col>` for the given columns on every
    /// flushed INSERT (spec §4.7 RETURNING). Rows come back in the same
    /// order, retrievable via [`Self::take_returned_rows`].
    #[must_use]
    pub fn with_returning(mut self, returning: Vec<String>) -> Self {
        self.returning = returning;
        self
    }

    /// Buffer one row, flushing automatically if a threshold is crossed.
    pub async fn push_row(&mut self, pool: &Pool, values: Vec<SqlValue>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(ConnectorError::Config(format!(
                "row has {} values but {} columns were declared",
                values.len(),
                self.columns.len()
            )));
        }
        self.pending_bytes += estimate_literal_bytes(&values);
        self.pending.push(values);

        if self.pending.len() >= self.settings.insert_batch_size
            || self.pending_bytes >= self.settings.insert_max_sql_bytes
        {
            self.flush(pool).await?;
        }
        Ok(())
    }

    /// Flush any buffered rows as a single batched INSERT.
    pub async fn flush(&mut self, pool: &Pool) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let stmt = build_insert_statement(&self.schema, &self.table, &self.columns, &self.pending, &self.returning);
        tracing::debug!(
            schema = %self.schema,
            table = %self.table,
            rows = self.pending.len(),
            returning = !self.returning.is_empty(),
            "flushing insert batch"
        );
        let mut conn = pool.get().await?;
        if self.returning.is_empty() {
            let affected = conn.execute(&stmt, &[]).await?;
            self.rows_affected += affected;
        } else {
            let rows = conn.query(&stmt, &[]).await?.collect_all().await?;
            self.rows_affected += rows.len() as u64;
            self.returned_rows.extend(rows);
        }

        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    /// Total rows affected across all flushes so far.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Take the `OUTPUT INSERTED.*` rows accumulated so far, leaving the
    /// batcher's own buffer empty.
    pub fn take_returned_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.returned_rows)
    }
}

fn estimate_literal_bytes(values: &[SqlValue]) -> usize {
    values.iter().map(literal_len_estimate).sum::<usize>() + values.len() * 2
}

fn literal_len_estimate(value: &SqlValue) -> usize {
    match value {
        SqlValue::Null => 4,
        SqlValue::String(s) => s.len() + 3,
        SqlValue::Binary(b) => b.len() * 2 + 4,
        _ => 24,
    }
}

fn build_insert_statement(
    schema: &str,
    table: &str,
    columns: &[String],
    rows: &[Vec<SqlValue>],
    returning: &[String],
) -> String {
    let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let rows_sql = rows
        .iter()
        .map(|row| {
            let values = row
                .iter()
                .map(sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({values})")
        })
        .collect::<Vec<_>>()
        .join(", ");

    let output_clause = if returning.is_empty() {
        String::new()
    } else {
        let cols = returning
            .iter()
            .map(|c| format!("INSERTED.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" OUTPUT {cols}")
    };

    format!("INSERT INTO {table_ref} ({cols}){output_clause} VALUES {rows_sql};")
}

/// Serialize a value as a T-SQL literal, with `N'...'` for text.
fn sql_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        SqlValue::TinyInt(v) => v.to_string(),
        SqlValue::SmallInt(v) => v.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Double(v) => v.to_string(),
        SqlValue::String(s) => format!("N'{}'", s.replace('\'', "''")),
        SqlValue::Binary(b) => format!("0x{}", hex_encode(b)),
        other => format!("N'{}'", other_to_string(other).replace('\'', "''")),
    }
}

fn other_to_string(value: &SqlValue) -> String {
    // Fallback path for feature-gated variants (Decimal/Uuid/chrono/Json/Xml)
    // whose Display formatting already produces valid literal text.
    format!("{value:?}")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// A row's primary key, extracted from the engine's rowid column(s).
/// Composite keys are AND-joined in [`build_update_statement`]/[`build_delete_statement`].
#[derive(Debug, Clone)]
pub struct RowKey(pub Vec<(String, SqlValue)>);

/// Build a single-row `UPDATE ... WHERE pk = ...;` statement. Rejects
/// tables with no primary key, per spec.
pub fn build_update_statement(
    schema: &str,
    table: &str,
    metadata: &TableMetadata,
    assignments: &[(String, SqlValue)],
    key: &RowKey,
) -> Result<String> {
    require_primary_key(metadata)?;
    let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let set_clause = assignments
        .iter()
        .map(|(col, v)| format!("{} = {}", quote_ident(col), sql_literal(v)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = key
        .0
        .iter()
        .map(|(col, v)| format!("{} = {}", quote_ident(col), sql_literal(v)))
        .collect::<Vec<_>>()
        .join(" AND ");
    Ok(format!("UPDATE {table_ref} SET {set_clause} WHERE {where_clause};"))
}

/// Build a single-row `DELETE ... WHERE pk = ...;` statement. Rejects
/// tables with no primary key, per spec.
pub fn build_delete_statement(schema: &str, table: &str, metadata: &TableMetadata, key: &RowKey) -> Result<String> {
    require_primary_key(metadata)?;
    let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let where_clause = key
        .0
        .iter()
        .map(|(col, v)| format!("{} = {}", quote_ident(col), sql_literal(v)))
        .collect::<Vec<_>>()
        .join(" AND ");
    Ok(format!("DELETE FROM {table_ref} WHERE {where_clause};"))
}

fn require_primary_key(metadata: &TableMetadata) -> Result<()> {
    if metadata.primary_key.is_empty() {
        return Err(ConnectorError::Unsupported(
            "UPDATE/DELETE requires a primary key; table has none".to_string(),
        ));
    }
    Ok(())
}

/// Phase 1 of CTAS: `CREATE TABLE` with reverse-mapped column types.
#[must_use]
pub fn build_create_table_statement(
    schema: &str,
    table: &str,
    columns: &[CatalogColumn],
    settings: &Settings,
) -> String {
    let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let cols = columns
        .iter()
        .map(|c| {
            let sql_type = logical_to_sql_type(c.logical_type, settings.ctas_text_type);
            let nullability = if c.nullable { "NULL" } else { "NOT NULL" };
            format!("{} {} {}", quote_ident(&c.name), sql_type, nullability)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {table_ref} ({cols});")
}

/// Cleanup statement for a failed CTAS phase 2.
#[must_use]
pub fn build_drop_table_statement(schema: &str, table: &str) -> String {
    format!(
        "DROP TABLE {}.{};",
        quote_ident(schema),
        quote_ident(table)
    )
}

/// Run a full CREATE TABLE AS SELECT: phase 1 creates `schema.table` with
/// `columns`' reverse-mapped types, phase 2 batch-inserts `rows` into it.
/// If phase 2 fails partway through, the table is dropped before the
/// original error is returned, so a failed CTAS never leaves a
/// half-populated table behind.
pub async fn create_table_as(
    pool: &Pool,
    schema: &str,
    table: &str,
    columns: &[CatalogColumn],
    settings: &Settings,
    rows: impl IntoIterator<Item = Vec<SqlValue>>,
) -> Result<u64> {
    let create_stmt = build_create_table_statement(schema, table, columns, settings);
    tracing::debug!(schema, table, "creating table for CTAS");
    {
        let mut conn = pool.get().await?;
        conn.execute(&create_stmt, &[]).await?;
    }

    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let mut batcher = InsertBatcher::new(schema, table, column_names, settings);
    let populate = async {
        for row in rows {
            batcher.push_row(pool, row).await?;
        }
        batcher.flush(pool).await
    }
    .await;

    match populate {
        Ok(()) => Ok(batcher.rows_affected()),
        Err(err) => {
            tracing::debug!(schema, table, error = %err, "CTAS populate failed, dropping table");
            let drop_stmt = build_drop_table_statement(schema, table);
            if let Ok(mut conn) = pool.get().await {
                let _ = conn.execute(&drop_stmt, &[]).await;
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LogicalType, ObjectKind};

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn builds_multi_row_insert() {
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::String("a".to_string())],
            vec![SqlValue::Int(2), SqlValue::String("b".to_string())],
        ];
        let stmt = build_insert_statement("dbo", "T", &["Id".to_string(), "Name".to_string()], &rows, &[]);
        assert!(stmt.starts_with("INSERT INTO [dbo].[T] ([Id], [Name]) VALUES"));
        assert!(stmt.contains("(1, N'a')"));
        assert!(stmt.contains("(2, N'b')"));
    }

    #[test]
    fn insert_with_returning_emits_output_clause() {
        let rows = vec![vec![SqlValue::Int(1), SqlValue::String("a".to_string())]];
        let stmt = build_insert_statement(
            "dbo",
            "T",
            &["Id".to_string(), "Name".to_string()],
            &rows,
            &["Id".to_string()],
        );
        assert!(stmt.contains("OUTPUT INSERTED.[Id]"));
        assert!(stmt.contains(") OUTPUT INSERTED.[Id] VALUES"));
    }

    #[test]
    fn update_requires_primary_key() {
        let metadata = TableMetadata {
            kind: ObjectKind::Table,
            columns: vec![],
            primary_key: vec![],
            approx_row_count: 0,
        };
        let key = RowKey(vec![("Id".to_string(), SqlValue::Int(1))]);
        let result = build_update_statement("dbo", "T", &metadata, &[], &key);
        assert!(result.is_err());
    }

    #[test]
    fn composite_key_delete_ands_columns() {
        let metadata = TableMetadata {
            kind: ObjectKind::Table,
            columns: vec![],
            primary_key: vec!["A".to_string(), "B".to_string()],
            approx_row_count: 0,
        };
        let key = RowKey(vec![
            ("A".to_string(), SqlValue::Int(1)),
            ("B".to_string(), SqlValue::Int(2)),
        ]);
        let stmt = build_delete_statement("dbo", "T", &metadata, &key).unwrap();
        assert!(stmt.contains("[A] = 1 AND [B] = 2"));
    }

    #[test]
    fn ctas_reverse_maps_types() {
        let columns = vec![CatalogColumn {
            name: "Id".to_string(),
            ordinal: 1,
            logical_type: LogicalType::I64,
            nullable: false,
            collation: None,
        }];
        let stmt = build_create_table_statement("dbo", "NewTable", &columns, &settings());
        assert!(stmt.contains("[Id] BIGINT NOT NULL"));
    }
}
