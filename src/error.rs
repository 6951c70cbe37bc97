//! Error taxonomy for the relay.
//!
//! The important distinction is between errors that sever the database
//! session (`ConnectionLost`) and everything else: lost sessions are
//! recovered locally by the reconnect/retry policy, while plain query and
//! cursor errors are surfaced to the submitting caller and never retried.

use thiserror::Error;

/// MySQL error numbers that mean the session was severed rather than the
/// statement being at fault. Client errors 2006 (server has gone away) and
/// 2013 (lost connection during query), plus server-side 1053 (shutdown in
/// progress) and 1927 (connection killed).
pub const CONNECTION_LOSS_CODES: &[u16] = &[1053, 1927, 2006, 2013];

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("connect error: {0}")]
    Connect(String),

    /// The session was severed mid-query. Carries the MySQL error number
    /// that matched the loss signature.
    #[error("connection lost ({code}): {message}")]
    ConnectionLost { code: u16, message: String },

    /// Any other execution failure. The connection is assumed still valid.
    #[error("query error: {0}")]
    Query(String),

    /// A failure while fetching from or closing an open cursor.
    #[error("cursor error: {0}")]
    Cursor(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Error::ConnectionLost { .. })
    }
}

/// Check a MySQL error number against the connection-loss signature.
pub fn is_connection_loss_code(code: u16) -> bool {
    CONNECTION_LOSS_CODES.contains(&code)
}
