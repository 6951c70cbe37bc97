use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Connection-level configuration. Immutable once a manager is created.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: String,
    pub password: String,
    /// When false, neither failed connects nor lost sessions are retried.
    pub reconnect_enabled: bool,
    /// Cooldown between reconnect attempts; also the delay before a lost
    /// query is resubmitted.
    pub reconnect_delay_ms: u64,
    /// Capacity of the pending-query queue. A push at capacity evicts the
    /// oldest entry.
    pub max_queue_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            database: None,
            user: "root".to_string(),
            password: String::new(),
            reconnect_enabled: false,
            reconnect_delay_ms: 5_000,
            max_queue_length: 200,
        }
    }
}

impl ServerConfig {
    /// The connect target string used in logs and notifications:
    /// `host:port` or `host:port/database`.
    pub fn connect_string(&self) -> String {
        match &self.database {
            Some(db) => format!("{}:{}/{}", self.host, self.port, db),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port cannot be 0".into()));
        }
        if self.max_queue_length == 0 {
            return Err(Error::Config("maxQueueLength must be >= 1".into()));
        }
        // A zero delay would make the retry timer a busy loop.
        if self.reconnect_delay_ms < 100 {
            return Err(Error::Config(format!(
                "reconnectDelayMs must be at least 100ms (got {}ms)",
                self.reconnect_delay_ms
            )));
        }
        Ok(())
    }
}

/// Request-shaping configuration for one submitting flow element: the stored
/// query, the field mappings applied to incoming payloads, and the default
/// result handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// Stored query text, used when `use_stored_query` is set or the
    /// message carries no query of its own.
    pub query: String,
    pub use_stored_query: bool,
    /// Field mappings: either a JSON array of path expressions or a string
    /// containing the serialized array (the form host editors produce).
    /// Parsed once at setup by [`crate::mapping::parse_mappings`].
    pub mappings: Option<serde_json::Value>,
    pub use_mappings: bool,
    /// "single" | "multi"; anything else means fire-and-forget.
    pub result_action: Option<String>,
    /// Row cap for a single delivery (and the cursor batch size in multi
    /// mode).
    pub result_limit: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            query: String::new(),
            use_stored_query: false,
            mappings: None,
            use_mappings: false,
            result_action: None,
            result_limit: 100,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.result_limit == 0 {
            return Err(Error::Config("resultLimit must be >= 1".into()));
        }
        Ok(())
    }
}
