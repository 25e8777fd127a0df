//! Schema/table/column/primary-key discovery through `sys.*` catalog views.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mssql_driver_pool::Pool;
use parking_lot::Mutex;

use crate::error::Result;

/// Discovery queries issued on demand; caches populated lazily.
pub mod queries {
    /// Schemas that own at least one table or view, excluding system
    /// schemas.
    pub const SCHEMAS: &str = r"
        SELECT s.name
        FROM sys.schemas s
        WHERE s.name NOT IN ('sys', 'INFORMATION_SCHEMA')
          AND EXISTS (
              SELECT 1 FROM sys.objects o
              WHERE o.schema_id = s.schema_id AND o.type IN ('U', 'V')
          )
        ORDER BY s.name;";

    /// Tables and views in a schema, with an approximate row count.
    pub const TABLES: &str = r"
        SELECT o.name, o.type,
               ISNULL((SELECT SUM(p.rows) FROM sys.partitions p
                       WHERE p.object_id = o.object_id AND p.index_id IN (0, 1)), 0) AS approx_rows
        FROM sys.objects o
        JOIN sys.schemas s ON s.schema_id = o.schema_id
        WHERE s.name = @schema AND o.type IN ('U', 'V')
        ORDER BY o.name;";

    /// Columns of an object, joined with `sys.types` for the SQL type name.
    /// `collation_name` is `NULL` for non-character columns and for
    /// character columns using the database's default collation.
    pub const COLUMNS: &str = r"
        SELECT c.name, c.column_id, t.name AS type_name, c.max_length, c.precision, c.scale,
               c.is_nullable, c.collation_name
        FROM sys.columns c
        JOIN sys.types t ON t.user_type_id = c.user_type_id
        JOIN sys.objects o ON o.object_id = c.object_id
        JOIN sys.schemas s ON s.schema_id = o.schema_id
        WHERE s.name = @schema AND o.name = @table
        ORDER BY c.column_id;";

    /// Primary key columns of an object, in key order.
    pub const PRIMARY_KEY: &str = r"
        SELECT c.name, ic.key_ordinal
        FROM sys.indexes i
        JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
        JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
        JOIN sys.objects o ON o.object_id = i.object_id
        JOIN sys.schemas s ON s.schema_id = o.schema_id
        WHERE s.name = @schema AND o.name = @table AND i.is_primary_key = 1
        ORDER BY ic.key_ordinal;";
}

/// Kind of a catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A base table (`sys.objects.type = 'U'`).
    Table,
    /// A view (`sys.objects.type = 'V'`).
    View,
}

/// A column as exposed through the catalog.
#[derive(Debug, Clone)]
pub struct CatalogColumn {
    /// Column name.
    pub name: String,
    /// 1-based ordinal within the object.
    pub ordinal: u32,
    /// The engine's logical type, after mapping (see [`sql_type_to_logical`]).
    pub logical_type: LogicalType,
    /// Whether the column allows NULL.
    pub nullable: bool,
    /// `sys.columns.collation_name`, when the column carries character data;
    /// `None` for non-character columns and for NULL-returning defaults.
    pub collation: Option<String>,
}

/// Whether a SQL Server collation name denotes case-insensitive comparison,
/// per the `_CI_`/`_CS_` naming convention Windows and SQL collations share.
/// A collation with neither marker (binary collations) is treated as
/// case-sensitive.
#[must_use]
pub fn is_case_insensitive_collation(collation: &str) -> bool {
    collation.contains("_CI_") || collation.ends_with("_CI")
}

/// Build the `column name -> collation name` map [`crate::planner::ScanPlan`]
/// needs, from a table's discovered columns. Only case-insensitive
/// collations are case-insensitive for `ILIKE` pushdown purposes, but every
/// explicit collation is included so [`crate::planner`] can still emit a
/// `COLLATE` clause for case-sensitive comparisons.
#[must_use]
pub fn column_collations(metadata: &TableMetadata) -> HashMap<String, String> {
    metadata
        .columns
        .iter()
        .filter_map(|c| c.collation.clone().map(|collation| (c.name.clone(), collation)))
        .collect()
}

/// Engine-facing logical type, the target of the fixed SQL Server → engine
/// mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// `BOOL`.
    Bool,
    /// `U8`.
    U8,
    /// `I16`.
    I16,
    /// `I32`.
    I32,
    /// `I64`.
    I64,
    /// `F32`.
    F32,
    /// `F64`.
    F64,
    /// `DEC(p, s)`.
    Decimal(u8, u8),
    /// `STRING`.
    String,
    /// `BYTES`.
    Bytes,
    /// `DATE`.
    Date,
    /// `TIME`.
    Time,
    /// `TIMESTAMP`.
    Timestamp,
    /// `TIMESTAMP_TZ`.
    TimestampTz,
    /// `UUID`.
    Uuid,
}

/// Map a SQL Server type name (as returned by `sys.types.name`) to the
/// engine's logical type. Types with no entry here (XML, UDT, SQL_VARIANT,
/// HIERARCHYID, IMAGE, TEXT, NTEXT) are rejected by [`crate::error::ConnectorError::Unsupported`]
/// at the caller.
#[must_use]
pub fn sql_type_to_logical(type_name: &str, precision: u8, scale: u8) -> Option<LogicalType> {
    Some(match type_name {
        "bit" => LogicalType::Bool,
        "tinyint" => LogicalType::U8,
        "smallint" => LogicalType::I16,
        "int" => LogicalType::I32,
        "bigint" => LogicalType::I64,
        "real" => LogicalType::F32,
        "float" => LogicalType::F64,
        "decimal" | "numeric" => LogicalType::Decimal(precision, scale),
        "money" => LogicalType::Decimal(19, 4),
        "smallmoney" => LogicalType::Decimal(10, 4),
        "char" | "varchar" | "nchar" | "nvarchar" => LogicalType::String,
        "binary" | "varbinary" => LogicalType::Bytes,
        "date" => LogicalType::Date,
        "time" => LogicalType::Time,
        "datetime" | "datetime2" | "smalldatetime" => LogicalType::Timestamp,
        "datetimeoffset" => LogicalType::TimestampTz,
        "uniqueidentifier" => LogicalType::Uuid,
        _ => return None,
    })
}

/// The reverse mapping, used for CTAS and `ADD COLUMN`. `UBIGINT` widens to
/// `DECIMAL(20,0)` since SQL Server has no unsigned 64-bit type; string
/// columns default to `NVARCHAR` unless [`crate::settings::CtasTextType::Varchar`]
/// is configured.
#[must_use]
pub fn logical_to_sql_type(logical: LogicalType, text_type: crate::settings::CtasTextType) -> String {
    use crate::settings::CtasTextType;
    match logical {
        LogicalType::Bool => "BIT".to_string(),
        LogicalType::U8 => "TINYINT".to_string(),
        LogicalType::I16 => "SMALLINT".to_string(),
        LogicalType::I32 => "INT".to_string(),
        LogicalType::I64 => "BIGINT".to_string(),
        LogicalType::F32 => "REAL".to_string(),
        LogicalType::F64 => "FLOAT".to_string(),
        LogicalType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
        LogicalType::String => match text_type {
            CtasTextType::NVarchar => "NVARCHAR(MAX)".to_string(),
            CtasTextType::Varchar => "VARCHAR(MAX)".to_string(),
        },
        LogicalType::Bytes => "VARBINARY(MAX)".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Time => "TIME".to_string(),
        LogicalType::Timestamp => "DATETIME2".to_string(),
        LogicalType::TimestampTz => "DATETIMEOFFSET".to_string(),
        LogicalType::Uuid => "UNIQUEIDENTIFIER".to_string(),
    }
}

/// One entry from [`CatalogCache::list_tables`]: identity and size only, no
/// column detail (callers fetch that separately via `get_or_refresh`).
#[derive(Debug, Clone)]
pub struct CatalogTable {
    /// Table or view name.
    pub name: String,
    /// `Table` or `View`.
    pub kind: ObjectKind,
    /// Approximate row count from `sys.partitions`.
    pub approx_row_count: u64,
}

/// A discovered table or view: columns plus primary key ordinals.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    /// `Table` or `View`.
    pub kind: ObjectKind,
    /// Columns in ordinal order.
    pub columns: Vec<CatalogColumn>,
    /// Names of the primary key columns, in key order; empty if none.
    pub primary_key: Vec<String>,
    /// Approximate row count from `sys.partitions`.
    pub approx_row_count: u64,
}

enum CacheState {
    Loaded { fetched_at: Instant, metadata: TableMetadata },
    Stale { metadata: TableMetadata },
}

/// The per-attachment metadata cache: `(schema, table) -> TableMetadata`,
/// refetched once `catalog_cache_ttl` has elapsed since the last fetch.
/// `ttl == Duration::ZERO` disables automatic refresh (manual only).
pub struct CatalogCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), CacheState>>,
}

impl CatalogCache {
    /// An empty cache with the given refresh TTL.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up cached metadata for `(schema, table)`, triggering a refetch
    /// through `pool` if the entry is missing or stale.
    pub async fn get_or_refresh(
        &self,
        pool: &Pool,
        schema: &str,
        table: &str,
    ) -> Result<TableMetadata> {
        if let Some(metadata) = self.cached_fresh(schema, table) {
            return Ok(metadata);
        }

        let metadata = self.fetch(pool, schema, table).await?;
        self.entries.lock().insert(
            (schema.to_string(), table.to_string()),
            CacheState::Loaded {
                fetched_at: Instant::now(),
                metadata: metadata.clone(),
            },
        );
        Ok(metadata)
    }

    fn cached_fresh(&self, schema: &str, table: &str) -> Option<TableMetadata> {
        let mut entries = self.entries.lock();
        let key = (schema.to_string(), table.to_string());
        match entries.get(&key) {
            Some(CacheState::Loaded { fetched_at, metadata }) => {
                if self.ttl.is_zero() || fetched_at.elapsed() < self.ttl {
                    Some(metadata.clone())
                } else {
                    let metadata = metadata.clone();
                    entries.insert(key, CacheState::Stale { metadata });
                    None
                }
            }
            Some(CacheState::Stale { .. }) | None => None,
        }
    }

    async fn fetch(&self, pool: &Pool, schema: &str, table: &str) -> Result<TableMetadata> {
        tracing::debug!(schema, table, "refreshing catalog metadata");
        let mut conn = pool.get().await?;
        let stmt = queries::COLUMNS
            .replace("@schema", &quote_literal(schema))
            .replace("@table", &quote_literal(table));
        let mut columns = Vec::new();
        let rows = conn.query(&stmt, &[]).await?.collect_all().await?;
        for (ordinal, row) in rows.iter().enumerate() {
            let name: String = row.get(0).unwrap_or_default();
            let type_name: String = row.get(2).unwrap_or_default();
            let precision: u8 = row.get(4).unwrap_or(0);
            let scale: u8 = row.get(5).unwrap_or(0);
            let nullable: bool = row.get(6).unwrap_or(true);
            let collation: Option<String> = row.get(7).ok();
            let logical_type = sql_type_to_logical(&type_name, precision, scale).ok_or_else(|| {
                crate::error::ConnectorError::Unsupported(format!(
                    "column {schema}.{table}.{name} has unsupported type {type_name}"
                ))
            })?;
            columns.push(CatalogColumn {
                name,
                ordinal: ordinal as u32 + 1,
                logical_type,
                nullable,
                collation,
            });
        }

        let pk_stmt = queries::PRIMARY_KEY
            .replace("@schema", &quote_literal(schema))
            .replace("@table", &quote_literal(table));
        let pk_rows = conn.query(&pk_stmt, &[]).await?.collect_all().await?;
        let primary_key = pk_rows
            .iter()
            .map(|r| r.get::<String>(0).unwrap_or_default())
            .collect();

        let tables_stmt = queries::TABLES.replace("@schema", &quote_literal(schema));
        let table_rows = conn.query(&tables_stmt, &[]).await?.collect_all().await?;
        let approx_row_count = table_rows
            .iter()
            .find(|r| r.get::<String>(0).as_deref() == Ok(table))
            .map(|r| r.get::<i64>(2).unwrap_or(0).max(0) as u64)
            .unwrap_or(0);

        Ok(TableMetadata {
            kind: ObjectKind::Table,
            columns,
            primary_key,
            approx_row_count,
        })
    }

    /// List the non-system schemas that own at least one table or view.
    pub async fn list_schemas(&self, pool: &Pool) -> Result<Vec<String>> {
        let mut conn = pool.get().await?;
        let rows = conn.query(queries::SCHEMAS, &[]).await?.collect_all().await?;
        Ok(rows
            .iter()
            .map(|r| r.get::<String>(0).unwrap_or_default())
            .collect())
    }

    /// List the tables and views directly under `schema`, with their kind
    /// and approximate row count.
    pub async fn list_tables(&self, pool: &Pool, schema: &str) -> Result<Vec<CatalogTable>> {
        let mut conn = pool.get().await?;
        let stmt = queries::TABLES.replace("@schema", &quote_literal(schema));
        let rows = conn.query(&stmt, &[]).await?.collect_all().await?;
        Ok(rows
            .iter()
            .map(|r| CatalogTable {
                name: r.get(0).unwrap_or_default(),
                kind: match r.get::<String>(1).unwrap_or_default().as_str() {
                    "V" => ObjectKind::View,
                    _ => ObjectKind::Table,
                },
                approx_row_count: r.get::<i64>(2).unwrap_or(0).max(0) as u64,
            })
            .collect())
    }

    /// Force the next access for `(schema, table)` to refetch.
    pub fn invalidate(&self, schema: &str, table: &str) {
        tracing::debug!(schema, table, "invalidating catalog entry");
        self.entries
            .lock()
            .remove(&(schema.to_string(), table.to_string()));
    }

    /// Invalidate every cached entry under `schema`, called after a
    /// successful DDL statement.
    pub fn invalidate_schema(&self, schema: &str) {
        tracing::debug!(schema, "invalidating catalog schema");
        self.entries.lock().retain(|(s, _), _| s != schema);
    }
}

/// Quote a catalog identifier as a T-SQL string literal (discovery queries
/// bind schema/table names as literals, not as SQL parameters, since they
/// select against system catalog views rather than user data).
fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_sql_types() {
        assert_eq!(sql_type_to_logical("int", 0, 0), Some(LogicalType::I32));
        assert_eq!(
            sql_type_to_logical("decimal", 10, 2),
            Some(LogicalType::Decimal(10, 2))
        );
        assert_eq!(sql_type_to_logical("money", 0, 0), Some(LogicalType::Decimal(19, 4)));
    }

    #[test]
    fn rejects_unmapped_sql_types() {
        assert_eq!(sql_type_to_logical("xml", 0, 0), None);
        assert_eq!(sql_type_to_logical("sql_variant", 0, 0), None);
        assert_eq!(sql_type_to_logical("hierarchyid", 0, 0), None);
    }

    #[test]
    fn quotes_embedded_single_quotes() {
        assert_eq!(quote_literal("O'Brien"), "N'O''Brien'");
    }

    #[test]
    fn cache_starts_empty() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        assert!(cache.cached_fresh("dbo", "Orders").is_none());
    }

    #[test]
    fn recognizes_case_insensitive_collations() {
        assert!(is_case_insensitive_collation("SQL_Latin1_General_CP1_CI_AS"));
        assert!(!is_case_insensitive_collation("Latin1_General_CS_AS"));
        assert!(!is_case_insensitive_collation("Latin1_General_BIN2"));
    }

    #[test]
    fn builds_column_collation_map_skipping_defaults() {
        let metadata = TableMetadata {
            kind: ObjectKind::Table,
            columns: vec![
                CatalogColumn {
                    name: "Name".to_string(),
                    ordinal: 1,
                    logical_type: LogicalType::String,
                    nullable: false,
                    collation: Some("Latin1_General_CI_AS".to_string()),
                },
                CatalogColumn {
                    name: "Id".to_string(),
                    ordinal: 2,
                    logical_type: LogicalType::I32,
                    nullable: false,
                    collation: None,
                },
            ],
            primary_key: vec![],
            approx_row_count: 0,
        };
        let map = column_collations(&metadata);
        assert_eq!(map.get("Name").map(String::as_str), Some("Latin1_General_CI_AS"));
        assert!(!map.contains_key("Id"));
    }
}
