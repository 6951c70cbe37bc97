//! sqlx-backed MySQL driver binding: a single `MySqlConnection` behind the
//! [`Connection`] seam, plus the JSON conversions for rows and parameters
//! and the mapping from sqlx errors into the crate taxonomy.
//!
//! Streaming mode buffers the full result set in memory before the cursor
//! is handed out: the text protocol sends every row regardless, so
//! `max_rows` acts only as the batch size on the cursor side, not as a cap
//! on what the fetch loop collects.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Either, Executor, Row as _, TypeInfo};

use crate::config::ServerConfig;
use crate::connection::{Connection, Connector, Cursor, ExecuteOptions, Outcome, Row};
use crate::error::{is_connection_loss_code, Error, Result};

/// Connects single MySQL sessions from a [`ServerConfig`].
#[derive(Debug, Default)]
pub struct MySqlConnector;

#[async_trait]
impl Connector for MySqlConnector {
    async fn connect(&self, config: &ServerConfig) -> Result<Box<dyn Connection>> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password);
        if let Some(db) = &config.database {
            options = options.database(db);
        }
        let mut conn = options
            .connect()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        // Executions run in auto-commit mode; make the session explicit
        // about it rather than relying on the server default.
        sqlx::query("SET autocommit = 1")
            .execute(&mut conn)
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;
        Ok(Box::new(MySqlSession { inner: Some(conn) }))
    }
}

struct MySqlSession {
    /// Taken on release; an executed-after-release session is a bug in the
    /// manager, reported as a connect error.
    inner: Option<MySqlConnection>,
}

#[async_trait]
impl Connection for MySqlSession {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        options: ExecuteOptions,
    ) -> Result<Outcome> {
        let conn = self
            .inner
            .as_mut()
            .ok_or_else(|| Error::Connect("connection already released".into()))?;
        if !options.auto_commit {
            return Err(Error::Query("only auto-commit execution is supported".into()));
        }

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }

        let mut rows: Vec<Row> = Vec::new();
        let mut summary: Option<(u64, u64)> = None;
        {
            let mut stream = conn.fetch_many(query);
            while let Some(item) = stream.try_next().await.map_err(map_execute_error)? {
                match item {
                    Either::Left(result) => {
                        summary = Some((result.rows_affected(), result.last_insert_id()));
                    }
                    Either::Right(row) => {
                        // In streaming mode the cap applies per batch, not to
                        // the result set; buffered mode truncates at max_rows.
                        if options.streaming || rows.len() < options.max_rows as usize {
                            rows.push(row_to_json(&row));
                        }
                    }
                }
            }
        }

        if options.streaming {
            return Ok(Outcome::Cursor(Box::new(MySqlCursor {
                rows: rows.into(),
            })));
        }
        if rows.is_empty() {
            if let Some((rows_affected, last_insert_id)) = summary {
                if rows_affected > 0 || last_insert_id > 0 {
                    return Ok(Outcome::Summary {
                        rows_affected,
                        last_insert_id: (last_insert_id > 0).then_some(last_insert_id),
                    });
                }
            }
        }
        Ok(Outcome::Rows(rows))
    }

    async fn release(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(conn) => sqlx::Connection::close(conn)
                .await
                .map_err(|e| Error::Connect(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Client-side cursor over a materialized row set. The MySQL text protocol
/// delivers the full result anyway; batching happens on this side, which
/// preserves the finite, non-restartable batch sequence the executor drains.
struct MySqlCursor {
    rows: VecDeque<Row>,
}

#[async_trait]
impl Cursor for MySqlCursor {
    async fn fetch(&mut self, max_rows: u32) -> Result<Vec<Row>> {
        let take = (max_rows as usize).min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

fn bind_value<'q>(query: MySqlQuery<'q>, value: &'q Value) -> MySqlQuery<'q> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(u) = n.as_u64() {
                query.bind(u)
            } else {
                query.bind(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        // Structured values travel as their JSON text.
        other => query.bind(other.to_string()),
    }
}

/// Classify an execution failure: database errors carrying a number from
/// the loss signature and transport-level failures sever the session;
/// everything else is an ordinary query error.
fn map_execute_error(error: sqlx::Error) -> Error {
    match &error {
        sqlx::Error::Database(db) => {
            if let Some(mysql) = db.try_downcast_ref::<MySqlDatabaseError>() {
                let code = mysql.number();
                if is_connection_loss_code(code) {
                    return Error::ConnectionLost {
                        code,
                        message: mysql.message().to_string(),
                    };
                }
            }
            Error::Query(error.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => {
            // The transport died under us; report it under the client-side
            // "lost connection during query" number.
            Error::ConnectionLost {
                code: 2013,
                message: error.to_string(),
            }
        }
        _ => Error::Query(error.to_string()),
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), column_to_json(row, i, col));
    }
    map
}

fn column_to_json(row: &MySqlRow, idx: usize, col: &sqlx::mysql::MySqlColumn) -> Value {
    match col.type_info().name() {
        "TINYINT(1)" | "BOOLEAN" | "BOOL" => {
            if let Ok(v) = row.try_get::<bool, _>(idx) {
                return Value::Bool(v);
            }
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            if let Ok(v) = row.try_get::<i64, _>(idx) {
                return Value::Number(v.into());
            }
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            if let Ok(v) = row.try_get::<u64, _>(idx) {
                return serde_json::json!(v);
            }
        }
        "FLOAT" | "DOUBLE" | "DECIMAL" | "NUMERIC" => {
            if let Ok(v) = row.try_get::<f64, _>(idx) {
                return serde_json::Number::from_f64(v)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
            }
        }
        _ => {}
    }
    // String covers VARCHAR, TEXT, CHAR, DATE, TIME, DATETIME, etc.
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    // Bytes as last resort: UTF-8 when possible, hex for genuinely binary data.
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v
            .map(|b| {
                String::from_utf8(b).map(Value::String).unwrap_or_else(|e| {
                    let hex: String =
                        e.into_bytes().iter().map(|byte| format!("{:02x}", byte)).collect();
                    Value::String(format!("0x{}", hex))
                })
            })
            .unwrap_or(Value::Null);
    }
    Value::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Live round-trip against a real server. Set MYSQL_RELAY_TEST_HOST
    /// (and optionally _PORT/_USER/_PASS/_DB) to enable; skipped otherwise.
    #[tokio::test]
    async fn test_live_select_round_trip() {
        let Ok(host) = std::env::var("MYSQL_RELAY_TEST_HOST") else {
            return;
        };
        let config = ServerConfig {
            host,
            port: std::env::var("MYSQL_RELAY_TEST_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3306),
            user: std::env::var("MYSQL_RELAY_TEST_USER").unwrap_or_else(|_| "root".into()),
            password: std::env::var("MYSQL_RELAY_TEST_PASS").unwrap_or_default(),
            database: std::env::var("MYSQL_RELAY_TEST_DB").ok(),
            ..Default::default()
        };
        let mut conn = MySqlConnector.connect(&config).await.unwrap();
        let outcome = conn
            .execute(
                "SELECT 1 AS one, 'x' AS s",
                &[],
                ExecuteOptions {
                    auto_commit: true,
                    max_rows: 10,
                    streaming: false,
                },
            )
            .await
            .unwrap();
        match outcome {
            Outcome::Rows(rows) => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["one"], serde_json::json!(1));
                assert_eq!(rows[0]["s"], serde_json::json!("x"));
            }
            _ => panic!("expected a row set"),
        }
        conn.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_batches_from_materialized_rows() {
        let rows: VecDeque<Row> = (0..5)
            .map(|i| {
                let mut r = Row::new();
                r.insert("n".into(), serde_json::json!(i));
                r
            })
            .collect();
        let mut cursor = MySqlCursor { rows };
        assert_eq!(cursor.fetch(2).await.unwrap().len(), 2);
        assert_eq!(cursor.fetch(2).await.unwrap().len(), 2);
        assert_eq!(cursor.fetch(2).await.unwrap().len(), 1);
        assert!(cursor.fetch(2).await.unwrap().is_empty());
        cursor.close().await.unwrap();
    }
}
