//! Column-oriented chunked result materialization.
//!
//! [`mssql_client::stream::QueryStream`] is row-major and fits the simple
//! query runner; the pushdown planner's consumer (an embedding engine doing
//! columnar execution) wants fixed-size column-major chunks instead. This
//! module re-shapes [`mssql_client::Row`] values pulled off a `QueryStream`
//! into [`ColumnChunk`]s without a second round-trip to the server.

use mssql_client::{Column, Row};
use mssql_types::SqlValue;

use crate::error::{ConnectorError, Result};

/// Lifecycle of a chunked result, mirroring the state names used
/// throughout the connector's other streaming paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStreamState {
    /// Columns not yet known; waiting on the first `COLMETADATA`.
    Initializing,
    /// Rows are being produced.
    Streaming,
    /// Cancellation requested; discarding remaining rows without
    /// materializing them.
    Draining,
    /// Final `DONE` seen; connection reusable.
    Complete,
    /// A fatal error ended the stream; connection is broken.
    Error,
}

/// One column's worth of materialized values for a chunk of rows.
#[derive(Debug, Clone)]
pub struct ColumnBuffer {
    /// Source column metadata.
    pub column: Column,
    /// One value per row in the chunk, in row order.
    pub values: Vec<SqlValue>,
}

/// A fixed-size, column-oriented slice of a result set.
#[derive(Debug, Clone, Default)]
pub struct ColumnChunk {
    /// One buffer per projected column.
    pub columns: Vec<ColumnBuffer>,
    /// Number of rows actually filled (<= the chunk's row capacity).
    pub row_count: usize,
}

/// Incrementally fills fixed-size [`ColumnChunk`]s from a sequence of
/// already-decoded [`Row`]s (e.g. drained from a `QueryStream`).
///
/// This does not itself own a connection or drive socket I/O — the
/// `mssql-client` read loop already does that via `QueryStream`; this type
/// only reshapes what comes out of it, so cancellation and error handling
/// stay the simple query runner's responsibility.
pub struct ChunkBuilder {
    columns: Vec<Column>,
    chunk_rows: usize,
    state: ResultStreamState,
}

impl ChunkBuilder {
    /// Start a chunk builder for `columns`, each chunk holding up to
    /// `chunk_rows` rows.
    #[must_use]
    pub fn new(columns: Vec<Column>, chunk_rows: usize) -> Self {
        Self {
            columns,
            chunk_rows: chunk_rows.max(1),
            state: ResultStreamState::Initializing,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResultStreamState {
        self.state
    }

    /// Materialize up to `chunk_rows` rows from `rows` into a
    /// [`ColumnChunk`], advancing `rows` past what was consumed.
    ///
    /// A second `COLMETADATA`-bearing result set is unsupported: callers
    /// must not feed rows from a second result set into the same builder.
    pub fn fill_chunk<I>(&mut self, rows: &mut I) -> Result<ColumnChunk>
    where
        I: Iterator<Item = Row>,
    {
        self.state = ResultStreamState::Streaming;

        let mut buffers: Vec<ColumnBuffer> = self
            .columns
            .iter()
            .cloned()
            .map(|column| ColumnBuffer {
                column,
                values: Vec::with_capacity(self.chunk_rows),
            })
            .collect();

        let mut row_count = 0;
        for row in rows.by_ref().take(self.chunk_rows) {
            for (idx, buffer) in buffers.iter_mut().enumerate() {
                let value = row.get_raw(idx).ok_or_else(|| {
                    ConnectorError::Protocol(format!("row missing column at index {idx}"))
                })?;
                buffer.values.push(value);
            }
            row_count += 1;
        }

        if row_count < self.chunk_rows {
            self.state = ResultStreamState::Complete;
        }

        Ok(ColumnChunk {
            columns: buffers,
            row_count,
        })
    }

    /// Mark the stream as cancelled; subsequent `fill_chunk` calls still
    /// run (the caller is expected to stop pulling from `rows` once the
    /// underlying `QueryStream`'s own cancellation has drained it) but the
    /// reported state reflects the request.
    pub fn cancel(&mut self) {
        self.state = ResultStreamState::Draining;
    }

    /// Mark the stream as terminated by a fatal error.
    pub fn fail(&mut self) {
        self.state = ResultStreamState::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mssql_client::Column;

    fn columns() -> Vec<Column> {
        vec![Column::new("id", 0, "INT"), Column::new("name", 1, "NVARCHAR")]
    }

    #[test]
    fn starts_initializing() {
        let builder = ChunkBuilder::new(columns(), 100);
        assert_eq!(builder.state(), ResultStreamState::Initializing);
    }

    #[test]
    fn empty_input_completes_immediately() {
        let mut builder = ChunkBuilder::new(columns(), 100);
        let mut rows = std::iter::empty();
        let chunk = builder.fill_chunk(&mut rows).unwrap();
        assert_eq!(chunk.row_count, 0);
        assert_eq!(builder.state(), ResultStreamState::Complete);
    }

    #[test]
    fn cancel_transitions_to_draining() {
        let mut builder = ChunkBuilder::new(columns(), 100);
        builder.cancel();
        assert_eq!(builder.state(), ResultStreamState::Draining);
    }
}
