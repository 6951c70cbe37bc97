//! The connection manager: owns the single database connection, its status
//! state machine, the pending-query queue, and the reconnect timer.
//!
//! The manager runs as a dedicated task owning all mutable state. Commands
//! from callers and completions from spawned connect/timer tasks arrive on
//! channels and are processed one at a time, so queue and state mutations
//! are serialized in arrival order of their triggering events. At most one
//! physical connection and one in-flight connect attempt exist at any time.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::connection::{Connection, Connector};
use crate::error::{Error, Result};
use crate::executor::{self, ExecReport};
use crate::queue::QueryQueue;
use crate::request::QueryRequest;

/// Lifecycle of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Status notifications for observability and host status rendering.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    Connecting,
    Connected,
    Closed,
    Error(String),
    Reconnecting,
}

enum Command {
    Submit(QueryRequest),
    Claim,
    Free,
}

/// Completions from spawned connect attempts and scheduled retries.
enum Event {
    ConnectFinished(Result<Box<dyn Connection>>),
    RetryClaim,
    RetryQuery(QueryRequest),
}

/// Handle to a running manager. Cloneable into every submitting flow;
/// dropping the last handle tears the manager down, releasing any held
/// connection.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_tx: broadcast::Sender<StatusEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Validate the configuration and spawn the manager task. No connection
    /// is attempted until the first claim or submission.
    pub fn new(config: ServerConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let task = ManagerTask {
            queue: QueryQueue::new(config.max_queue_length),
            config: Arc::new(config),
            connector,
            state: state_tx,
            connection: None,
            connect_in_flight: false,
            first_connection: true,
            last_attempt_at: None,
            reconnect_timer: None,
            query_retry: None,
            status_tx: status_tx.clone(),
            event_tx,
        };
        tokio::spawn(task.run(cmd_rx, event_rx));
        Ok(Self {
            cmd_tx,
            status_tx,
            state_rx,
        })
    }

    /// Subscribe to status notifications.
    pub fn status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Current lifecycle state, as last published by the manager task.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Ask the manager to establish the connection. Idempotent: a held
    /// connection or an in-flight attempt makes this a no-op. Returns a
    /// status subscription so the caller can watch the outcome.
    pub fn claim_connection(&self) -> broadcast::Receiver<StatusEvent> {
        let status = self.status_tx.subscribe();
        let _ = self.cmd_tx.send(Command::Claim);
        status
    }

    /// Submit a query. Executed immediately when connected; queued (with
    /// oldest-entry eviction at capacity) and triggering a connection claim
    /// otherwise.
    pub fn submit(&self, request: QueryRequest) {
        let _ = self.cmd_tx.send(Command::Submit(request));
    }

    /// Cancel any scheduled retry and release the held connection,
    /// transitioning to Closed.
    pub fn free_connection(&self) {
        let _ = self.cmd_tx.send(Command::Free);
    }
}

struct ManagerTask {
    config: Arc<ServerConfig>,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    connection: Option<Box<dyn Connection>>,
    queue: QueryQueue<QueryRequest>,
    connect_in_flight: bool,
    first_connection: bool,
    /// Shared cooldown clock for both the connect-retry and query-retry
    /// paths: set whenever a retry is scheduled.
    last_attempt_at: Option<Instant>,
    /// The scheduled reconnect tick. At most one exists; cancelled when an
    /// attempt starts or succeeds, on free, and at teardown.
    reconnect_timer: Option<JoinHandle<()>>,
    /// The scheduled resubmission of a lost query. At most one exists
    /// (enforced by the shared cooldown); cancelled on free and teardown.
    query_retry: Option<JoinHandle<()>>,
    status_tx: broadcast::Sender<StatusEvent>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl ManagerTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Submit(request)) => self.submit(request).await,
                    Some(Command::Claim) => self.start_connect(),
                    Some(Command::Free) => self.free_connection().await,
                    None => break,
                },
                Some(event) = event_rx.recv() => match event {
                    Event::ConnectFinished(result) => self.connect_finished(result).await,
                    Event::RetryClaim => {
                        self.reconnect_timer = None;
                        self.start_connect();
                    }
                    Event::RetryQuery(request) => {
                        self.query_retry = None;
                        tracing::info!(sql = %request.sql, "resubmitting query after connection loss");
                        self.submit(request).await;
                    }
                },
            }
        }
        // Teardown: abandon scheduled retries, release the connection.
        self.cancel_timers();
        if let Some(mut conn) = self.connection.take() {
            if let Err(error) = conn.release().await {
                tracing::error!(error = %error, "error closing connection at teardown");
            }
        }
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.status_tx.send(event);
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.query_retry.take() {
            timer.abort();
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        self.last_attempt_at
            .map_or(true, |at| at.elapsed() >= delay)
    }

    /// Begin an asynchronous connect attempt unless a connection is held or
    /// an attempt is already in flight.
    fn start_connect(&mut self) {
        if self.connection.is_some() || self.connect_in_flight {
            return;
        }
        self.connect_in_flight = true;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if self.first_connection {
            self.state.send_replace(ConnectionState::Connecting);
            self.emit(StatusEvent::Connecting);
        } else {
            self.state.send_replace(ConnectionState::Reconnecting);
            self.emit(StatusEvent::Reconnecting);
        }
        self.first_connection = false;
        tracing::info!(server = %self.config.connect_string(), "connection claim started");

        let connector = self.connector.clone();
        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&config).await;
            let _ = event_tx.send(Event::ConnectFinished(result));
        });
    }

    async fn connect_finished(&mut self, result: Result<Box<dyn Connection>>) {
        self.connect_in_flight = false;
        match result {
            Ok(conn) => {
                self.connection = Some(conn);
                self.state.send_replace(ConnectionState::Connected);
                if let Some(timer) = self.reconnect_timer.take() {
                    timer.abort();
                }
                self.emit(StatusEvent::Connected);
                tracing::info!(server = %self.config.connect_string(), "connected");
                self.drain_queue().await;
            }
            Err(error) => {
                self.emit(StatusEvent::Error(error.to_string()));
                tracing::error!(
                    server = %self.config.connect_string(),
                    error = %error,
                    "connect failed"
                );
                self.state.send_replace(ConnectionState::Disconnected);
                if self.config.reconnect_enabled
                    && self.reconnect_timer.is_none()
                    && self.cooldown_elapsed()
                {
                    self.last_attempt_at = Some(Instant::now());
                    tracing::info!(
                        delay_ms = self.config.reconnect_delay_ms,
                        "retrying connection after delay"
                    );
                    let event_tx = self.event_tx.clone();
                    let delay = Duration::from_millis(self.config.reconnect_delay_ms);
                    self.reconnect_timer = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = event_tx.send(Event::RetryClaim);
                    }));
                } else if self.config.reconnect_enabled {
                    tracing::debug!("reconnect retry already pending or inside cooldown");
                }
            }
        }
    }

    async fn submit(&mut self, request: QueryRequest) {
        if self.connection.is_some() {
            self.execute_now(request).await;
        } else {
            tracing::debug!(sql = %request.sql, queued = self.queue.len() + 1, "query execution queued");
            if self.queue.push(request).is_some() {
                tracing::warn!(
                    capacity = self.queue.capacity(),
                    "queue at capacity, oldest entry dropped"
                );
            }
            self.start_connect();
        }
    }

    async fn execute_now(&mut self, request: QueryRequest) {
        let Some(conn) = self.connection.as_deref_mut() else {
            // submit() only calls this with a connection held
            return;
        };
        match executor::execute(conn, request).await {
            ExecReport::Done => {}
            ExecReport::QueryFailed(message) => {
                self.emit(StatusEvent::Error(message));
            }
            ExecReport::ConnectionLost { request, error } => {
                self.handle_connection_loss(request, error).await;
            }
        }
    }

    /// The session was severed mid-query: drop the dead connection and,
    /// when reconnection is enabled and the cooldown has elapsed, schedule
    /// exactly one resubmission of the same request. Otherwise the failure
    /// is surfaced to the caller.
    async fn handle_connection_loss(&mut self, request: QueryRequest, error: Error) {
        self.emit(StatusEvent::Error(error.to_string()));
        tracing::error!(
            server = %self.config.connect_string(),
            error = %error,
            "server connection lost"
        );
        // Severed session: dropped, not released.
        self.connection = None;
        self.state.send_replace(ConnectionState::Disconnected);

        if self.config.reconnect_enabled && self.query_retry.is_none() && self.cooldown_elapsed() {
            self.last_attempt_at = Some(Instant::now());
            tracing::info!(
                delay_ms = self.config.reconnect_delay_ms,
                sql = %request.sql,
                "retrying lost query after delay"
            );
            let event_tx = self.event_tx.clone();
            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            self.query_retry = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = event_tx.send(Event::RetryQuery(request));
            }));
        } else {
            tracing::info!(
                reconnect = self.config.reconnect_enabled,
                "no retry scheduled for lost query"
            );
            request.deliver_error(error.to_string());
        }
    }

    /// Forward queued entries to the executor in arrival order. A
    /// connection loss mid-drain leaves the remaining entries in place for
    /// the next successful connect.
    async fn drain_queue(&mut self) {
        while self.connection.is_some() && !self.queue.is_empty() {
            let Some(request) = self.queue.pop() else { break };
            self.execute_now(request).await;
        }
    }

    async fn free_connection(&mut self) {
        self.cancel_timers();
        if let Some(mut conn) = self.connection.take() {
            if let Err(error) = conn.release().await {
                tracing::error!(error = %error, "error closing connection");
            }
            self.state.send_replace(ConnectionState::Closed);
            self.emit(StatusEvent::Closed);
            tracing::info!(server = %self.config.connect_string(), "connection closed");
        }
    }
}
