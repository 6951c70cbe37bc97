//! A single shared MySQL connection with queued submission and automatic
//! retry, for flows that relay messages through a relational database.
//!
//! One [`manager::ConnectionManager`] owns one physical connection on
//! behalf of every submitting flow. Queries arriving while disconnected
//! are queued (bounded, oldest dropped first) and drained in order once
//! the connection is up. A connection loss detected mid-query schedules
//! one retry of the same request after a shared cooldown.

pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod executor;
pub mod manager;
pub mod mapping;
pub mod mysql;
pub mod queue;
pub mod request;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{RelayConfig, ServerConfig};
pub use error::{Error, Result};
pub use manager::{ConnectionManager, ConnectionState, StatusEvent};
pub use mysql::MySqlConnector;
pub use request::{build_request, QueryRequest, Reply, ResultMode};
