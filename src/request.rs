//! Request shaping: turning an incoming message plus a [`RelayConfig`] into
//! the record the connection manager queues and executes.

use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::mapping;

/// Opaque caller context. Passed through unmodified except that successful
/// deliveries attach the result under its `payload` key.
pub type Msg = Value;

/// How the outcome of a query is delivered back to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// One terminal delivery containing the full row set (or the execution
    /// summary when the statement produced no rows).
    Single,
    /// Incremental deliveries of row batches drained from a cursor.
    Multi,
    /// Fire-and-forget: execute, deliver nothing.
    Discard,
}

impl ResultMode {
    /// Any value other than "single" or "multi" (including absence) means
    /// fire-and-forget.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("single") => ResultMode::Single,
            Some("multi") => ResultMode::Multi,
            _ => ResultMode::Discard,
        }
    }
}

/// Per-request delivery back to the submitting flow: one or more results,
/// or an error carrying a human-readable message and the original context.
#[derive(Debug, Clone)]
pub enum Reply {
    Result(Msg),
    Error { message: String, msg: Msg },
}

pub type ReplySender = mpsc::UnboundedSender<Reply>;

/// One unit of work: the query, its bound values, the delivery mode, and
/// the originating caller's context and reply handle. The same record is
/// queued while disconnected and resubmitted on retry.
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<Value>,
    pub mode: ResultMode,
    pub row_limit: u32,
    pub reply: ReplySender,
    pub msg: Msg,
}

impl QueryRequest {
    /// Attach a payload to the caller context and deliver it.
    pub(crate) fn deliver(&self, payload: Value) {
        let _ = self.reply.send(Reply::Result(with_payload(self.msg.clone(), payload)));
    }

    /// Deliver an error with the original context.
    pub(crate) fn deliver_error(&self, message: impl Into<String>) {
        let _ = self.reply.send(Reply::Error {
            message: message.into(),
            msg: self.msg.clone(),
        });
    }
}

/// Attach `payload` under the message's `payload` key. A non-object context
/// is replaced by a fresh object so the payload is never silently dropped.
pub(crate) fn with_payload(mut msg: Msg, payload: Value) -> Msg {
    match msg.as_object_mut() {
        Some(obj) => {
            obj.insert("payload".to_string(), payload);
            msg
        }
        None => serde_json::json!({ "payload": payload }),
    }
}

/// Build a [`QueryRequest`] from an incoming message.
///
/// - The parameter list comes from the field mappings when `use_mappings`
///   is set or the payload is not already an array; otherwise the payload
///   array is used directly.
/// - The query text comes from the stored query when `use_stored_query` is
///   set or the message carries no `query` field; a message-supplied query
///   is consumed (removed from the context) so it does not travel further.
/// - `resultAction` and `resultSetLimit` on the message override the
///   configured defaults; a zero or out-of-range limit is treated as
///   absent.
pub fn build_request(
    config: &RelayConfig,
    mappings: &[String],
    mut msg: Msg,
    reply: ReplySender,
) -> QueryRequest {
    let payload = msg.get("payload").cloned().unwrap_or(Value::Null);

    let params = if config.use_mappings || !payload.is_array() {
        mapping::resolve_values(&payload, mappings)
    } else {
        payload.as_array().cloned().unwrap_or_default()
    };

    let msg_query = msg
        .get("query")
        .and_then(|q| q.as_str())
        .map(|q| q.to_string());
    let sql = if config.use_stored_query || msg_query.is_none() {
        config.query.clone()
    } else {
        msg_query.unwrap_or_default()
    };
    if let Some(obj) = msg.as_object_mut() {
        obj.remove("query");
    }

    let mode = ResultMode::parse(
        msg.get("resultAction")
            .and_then(|v| v.as_str())
            .or(config.result_action.as_deref()),
    );
    // Zero and out-of-range overrides count as absent, like an unset
    // option; the configured limit already passed validation.
    let row_limit = msg
        .get("resultSetLimit")
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .unwrap_or(config.result_limit);

    QueryRequest {
        sql,
        params,
        mode,
        row_limit,
        reply,
        msg,
    }
}
