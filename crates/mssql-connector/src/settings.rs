//! Extension settings recognized at attach time.
//!
//! These govern pool sizing, timeouts, catalog caching, and DML/BCP
//! batching. Unlike [`crate::secret::Secret`] (connection identity) these
//! are read-mostly configuration the attachment keeps for its lifetime.

use std::time::Duration;

use crate::error::ConnectorError;

/// How large an `IN(...)` list may grow before the whole predicate falls
/// back to local evaluation. Not part of the engine-facing settings table;
/// governs [`crate::planner`] only.
pub const DEFAULT_MAX_IN_LIST: usize = 1000;

/// Recognized extension settings (spec §6).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Max connections per attachment.
    pub connection_limit: u32,
    /// Enable idle caching (if `false`, connections close on release).
    pub connection_cache: bool,
    /// TCP + handshake timeout.
    pub connection_timeout: Duration,
    /// Idle reap threshold; `Duration::ZERO` disables reaping.
    pub idle_timeout: Duration,
    /// Floor the idle reaper respects.
    pub min_connections: u32,
    /// Pool wait budget; `Duration::ZERO` fails acquisition immediately.
    pub acquire_timeout: Duration,
    /// Per-query wall clock budget; `Duration::ZERO` is infinite.
    pub query_timeout: Duration,
    /// Metadata auto-refresh interval; `Duration::ZERO` means manual-only.
    pub catalog_cache_ttl: Duration,
    /// Expose row count to the engine's optimizer.
    pub enable_statistics: bool,
    /// Statistics detail level.
    pub statistics_level: StatisticsLevel,
    /// Rows per batched INSERT statement.
    pub insert_batch_size: usize,
    /// Safety cap on batched INSERT statement size, in bytes.
    pub insert_max_sql_bytes: usize,
    /// UPDATE/DELETE batch size.
    pub dml_batch_size: usize,
    /// Text column type CTAS emits for string columns.
    pub ctas_text_type: CtasTextType,
    /// BCP flush threshold, in rows.
    pub copy_flush_rows: usize,
    /// Whether this attachment rejects DDL and raw exec before I/O.
    pub read_only: bool,
}

/// `statistics_level` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsLevel {
    /// Row count only.
    RowCount = 0,
    /// Row count plus column histograms.
    Histogram = 1,
    /// Row count, histograms, and number-distinct-values estimates.
    Ndv = 2,
}

/// `ctas_text_type` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtasTextType {
    /// `NVARCHAR` (default).
    NVarchar,
    /// `VARCHAR`.
    Varchar,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_limit: 10,
            connection_cache: true,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::ZERO,
            catalog_cache_ttl: Duration::from_secs(300),
            enable_statistics: true,
            statistics_level: StatisticsLevel::RowCount,
            insert_batch_size: 1000,
            insert_max_sql_bytes: 4 * 1024 * 1024,
            dml_batch_size: 500,
            ctas_text_type: CtasTextType::NVarchar,
            copy_flush_rows: 10_000,
            read_only: false,
        }
    }
}

impl Settings {
    /// Parse from the engine's flat `key -> value` configuration map.
    pub fn from_map<'a, I>(entries: I) -> Result<Self, ConnectorError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();
        for (key, value) in entries {
            match key {
                "connection_limit" => settings.connection_limit = parse_u32(key, value)?,
                "connection_cache" => settings.connection_cache = parse_bool(key, value)?,
                "connection_timeout" => settings.connection_timeout = parse_secs(key, value)?,
                "idle_timeout" => settings.idle_timeout = parse_secs(key, value)?,
                "min_connections" => settings.min_connections = parse_u32(key, value)?,
                "acquire_timeout" => settings.acquire_timeout = parse_secs(key, value)?,
                "query_timeout" => settings.query_timeout = parse_secs(key, value)?,
                "catalog_cache_ttl" => settings.catalog_cache_ttl = parse_secs(key, value)?,
                "enable_statistics" => settings.enable_statistics = parse_bool(key, value)?,
                "statistics_level" => {
                    settings.statistics_level = match value {
                        "0" => StatisticsLevel::RowCount,
                        "1" => StatisticsLevel::Histogram,
                        "2" => StatisticsLevel::Ndv,
                        other => {
                            return Err(ConnectorError::Config(format!(
                                "invalid statistics_level: {other}"
                            )));
                        }
                    };
                }
                "insert_batch_size" => settings.insert_batch_size = parse_usize(key, value)?,
                "insert_max_sql_bytes" => {
                    settings.insert_max_sql_bytes = parse_usize(key, value)?;
                }
                "dml_batch_size" => settings.dml_batch_size = parse_usize(key, value)?,
                "ctas_text_type" => {
                    settings.ctas_text_type = match value.to_ascii_lowercase().as_str() {
                        "nvarchar" => CtasTextType::NVarchar,
                        "varchar" => CtasTextType::Varchar,
                        other => {
                            return Err(ConnectorError::Config(format!(
                                "invalid ctas_text_type: {other}"
                            )));
                        }
                    };
                }
                "copy_flush_rows" => settings.copy_flush_rows = parse_usize(key, value)?,
                "read_only" => settings.read_only = parse_bool(key, value)?,
                _ => {
                    // Unrecognized keys are ignored rather than rejected: the
                    // engine may pass settings meant for other modules.
                }
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field invariants the builder can't express at the type level.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.min_connections > self.connection_limit {
            return Err(ConnectorError::Config(format!(
                "min_connections ({}) exceeds connection_limit ({})",
                self.min_connections, self.connection_limit
            )));
        }
        if self.insert_batch_size == 0 {
            return Err(ConnectorError::Config(
                "insert_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConnectorError> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConnectorError::Config(format!("invalid boolean for {key}: {other}"))),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConnectorError> {
    value
        .parse()
        .map_err(|_| ConnectorError::Config(format!("invalid integer for {key}: {value}")))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConnectorError> {
    value
        .parse()
        .map_err(|_| ConnectorError::Config(format!("invalid integer for {key}: {value}")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConnectorError> {
    let secs: u64 = value
        .parse()
        .map_err(|_| ConnectorError::Config(format!("invalid duration for {key}: {value}")))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn rejects_min_exceeding_limit() {
        let settings = Settings::from_map([("min_connections", "20"), ("connection_limit", "10")]);
        assert!(settings.is_err());
    }

    #[test]
    fn parses_recognized_keys() {
        let settings = Settings::from_map([
            ("connection_limit", "25"),
            ("idle_timeout", "120"),
            ("ctas_text_type", "varchar"),
        ])
        .unwrap();
        assert_eq!(settings.connection_limit, 25);
        assert_eq!(settings.idle_timeout, Duration::from_secs(120));
        assert_eq!(settings.ctas_text_type, CtasTextType::Varchar);
    }

    #[test]
    fn ignores_unrecognized_keys() {
        let settings = Settings::from_map([("some_other_module_setting", "x")]).unwrap();
        assert_eq!(settings.connection_limit, Settings::default().connection_limit);
    }
}
