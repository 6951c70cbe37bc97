//! The driver seam: small async traits the manager and executor operate
//! against, so the connection state machine is testable without a server
//! and the concrete driver stays swappable.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::error::Result;

/// One result row as a JSON object, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Options for a single execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    /// Always set by the executor; a driver that cannot auto-commit must
    /// reject the execution.
    pub auto_commit: bool,
    /// Row cap for buffered results and the batch size hint for cursors.
    pub max_rows: u32,
    /// Open a cursor instead of buffering the row set (multi mode).
    pub streaming: bool,
}

/// Terminal outcome of one execution.
pub enum Outcome {
    /// The buffered row set, capped at `max_rows`.
    Rows(Vec<Row>),
    /// The statement produced no row set; the execution summary stands in
    /// for output bindings.
    Summary {
        rows_affected: u64,
        last_insert_id: Option<u64>,
    },
    /// An open cursor over the row set (streaming mode only).
    Cursor(Box<dyn Cursor>),
}

/// A finite, non-restartable sequence of row batches.
#[async_trait]
pub trait Cursor: Send {
    /// Fetch up to `max_rows` rows. An empty batch means exhaustion.
    async fn fetch(&mut self, max_rows: u32) -> Result<Vec<Row>>;
    /// Close the cursor. Never reopens it, even on error.
    async fn close(&mut self) -> Result<()>;
}

/// A live database session. Owned exclusively by the connection manager;
/// never shared with callers.
#[async_trait]
pub trait Connection: Send {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<Outcome>;

    /// Release the session. Errors are reported by the caller but do not
    /// block the closed transition.
    async fn release(&mut self) -> Result<()>;
}

/// Factory for connections, in the spirit of a driver registry entry.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Connection>>;
}
