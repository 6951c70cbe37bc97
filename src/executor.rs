//! Query execution: runs one request against an established connection,
//! classifies the outcome, and drives either a single-shot delivery or the
//! cursor-drain loop.

use serde_json::Value;

use crate::connection::{Connection, Cursor, ExecuteOptions, Outcome};
use crate::error::Error;
use crate::request::{QueryRequest, ResultMode};

/// What the executor tells the connection manager after a request finishes.
pub(crate) enum ExecReport {
    /// All deliveries (if any) were made.
    Done,
    /// The query failed without severing the session; the error was
    /// delivered to the caller and is not retried.
    QueryFailed(String),
    /// The session was severed. The request is handed back so the manager
    /// can clear the connection and schedule a retry of the same request.
    ConnectionLost { request: QueryRequest, error: Error },
}

/// Execute one request on `conn` and deliver its results.
pub(crate) async fn execute(conn: &mut dyn Connection, request: QueryRequest) -> ExecReport {
    let options = ExecuteOptions {
        auto_commit: true,
        max_rows: request.row_limit,
        streaming: request.mode == ResultMode::Multi,
    };
    tracing::debug!(sql = %request.sql, mode = ?request.mode, "query execution started");

    let outcome = match conn.execute(&request.sql, &request.params, options).await {
        Ok(outcome) => outcome,
        Err(error) => {
            if error.is_connection_loss() {
                tracing::warn!(error = %error, "session severed during query");
                return ExecReport::ConnectionLost { request, error };
            }
            let message = error.to_string();
            tracing::error!(error = %message, "query failed");
            request.deliver_error(&message);
            return ExecReport::QueryFailed(message);
        }
    };

    match (request.mode, outcome) {
        (ResultMode::Single, outcome) => {
            let payload = match outcome {
                Outcome::Rows(rows) => {
                    Value::Array(rows.into_iter().map(Value::Object).collect())
                }
                Outcome::Summary {
                    rows_affected,
                    last_insert_id,
                } => serde_json::json!({
                    "rowsAffected": rows_affected,
                    "lastInsertId": last_insert_id,
                }),
                // A driver handing back a cursor in single mode is drained
                // into one delivery so the caller still gets its result.
                Outcome::Cursor(mut cursor) => {
                    match drain_fully(cursor.as_mut(), request.row_limit).await {
                        Ok(rows) => Value::Array(rows),
                        Err(error) => {
                            let message = error.to_string();
                            request.deliver_error(&message);
                            return ExecReport::QueryFailed(message);
                        }
                    }
                }
            };
            request.deliver(payload);
            tracing::debug!("single result delivered");
            ExecReport::Done
        }
        (ResultMode::Multi, Outcome::Cursor(mut cursor)) => {
            drain_cursor(cursor.as_mut(), &request).await
        }
        (ResultMode::Multi, Outcome::Rows(rows)) => {
            // Buffered fallback: deliver the rows as batches of row_limit.
            let limit = (request.row_limit as usize).max(1);
            for batch in rows.chunks(limit) {
                request.deliver(Value::Array(
                    batch.iter().cloned().map(Value::Object).collect(),
                ));
            }
            ExecReport::Done
        }
        (ResultMode::Multi, Outcome::Summary { .. }) => ExecReport::Done,
        (ResultMode::Discard, _) => {
            tracing::debug!("no result delivery requested");
            ExecReport::Done
        }
    }
}

/// The cursor-drain loop: fetch up to `row_limit` rows at a time, deliver
/// each non-empty batch as its own result, close on the first empty batch.
/// Fetch and close errors are reported to the caller and never reopen the
/// cursor.
async fn drain_cursor(cursor: &mut dyn Cursor, request: &QueryRequest) -> ExecReport {
    loop {
        match cursor.fetch(request.row_limit).await {
            Ok(batch) if batch.is_empty() => {
                if let Err(error) = cursor.close().await {
                    let message = format!("error closing cursor: {error}");
                    tracing::error!(error = %error, "cursor close failed");
                    request.deliver_error(&message);
                    return ExecReport::QueryFailed(message);
                }
                tracing::debug!("cursor drained and closed");
                return ExecReport::Done;
            }
            Ok(batch) => {
                request.deliver(Value::Array(
                    batch.into_iter().map(Value::Object).collect(),
                ));
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(error = %message, "cursor fetch failed");
                request.deliver_error(&message);
                return ExecReport::QueryFailed(message);
            }
        }
    }
}

async fn drain_fully(
    cursor: &mut dyn Cursor,
    row_limit: u32,
) -> crate::error::Result<Vec<Value>> {
    let mut all = Vec::new();
    loop {
        let batch = cursor.fetch(row_limit).await?;
        if batch.is_empty() {
            cursor.close().await?;
            return Ok(all);
        }
        all.extend(batch.into_iter().map(Value::Object));
    }
}
