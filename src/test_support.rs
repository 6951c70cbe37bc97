//! Test doubles for the driver seam: a scriptable connection and a
//! connector with switchable availability, shared by the manager and
//! executor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::connection::{Connection, Connector, Cursor, ExecuteOptions, Outcome, Row};
use crate::error::{Error, Result};

/// Build `n` rows of the form `{"n": i}`.
pub fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            let mut row = Row::new();
            row.insert("n".into(), json!(i));
            row
        })
        .collect()
}

/// One scripted response to an `execute` call.
pub enum MockPlan {
    Rows(Vec<Row>),
    Summary {
        rows_affected: u64,
        last_insert_id: Option<u64>,
    },
    Cursor(Vec<Row>),
    CursorFailingClose(Vec<Row>),
    Lost(u16),
    Fail(String),
}

type PlanMap = Arc<Mutex<HashMap<String, VecDeque<MockPlan>>>>;

pub struct MockConnection {
    script: VecDeque<MockPlan>,
    plans: PlanMap,
    executed: Arc<Mutex<Vec<String>>>,
    released: Arc<AtomicBool>,
}

impl MockConnection {
    /// A standalone connection answering calls from an ordered script.
    /// Calls past the end of the script get an empty row set.
    pub fn scripted(plans: Vec<MockPlan>) -> Self {
        Self {
            script: plans.into(),
            plans: Arc::default(),
            executed: Arc::default(),
            released: Arc::default(),
        }
    }

    fn next_plan(&mut self, sql: &str) -> MockPlan {
        if let Some(plan) = self.script.pop_front() {
            return plan;
        }
        self.plans
            .lock()
            .unwrap()
            .get_mut(sql)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(MockPlan::Rows(Vec::new()))
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(
        &mut self,
        sql: &str,
        _params: &[Value],
        options: ExecuteOptions,
    ) -> Result<Outcome> {
        self.executed.lock().unwrap().push(sql.to_string());
        match self.next_plan(sql) {
            MockPlan::Rows(mut rows) => {
                if !options.streaming {
                    rows.truncate(options.max_rows as usize);
                }
                Ok(Outcome::Rows(rows))
            }
            MockPlan::Summary {
                rows_affected,
                last_insert_id,
            } => Ok(Outcome::Summary {
                rows_affected,
                last_insert_id,
            }),
            MockPlan::Cursor(rows) => Ok(Outcome::Cursor(Box::new(MockCursor {
                rows: rows.into(),
                fail_close: false,
            }))),
            MockPlan::CursorFailingClose(rows) => Ok(Outcome::Cursor(Box::new(MockCursor {
                rows: rows.into(),
                fail_close: true,
            }))),
            MockPlan::Lost(code) => Err(Error::ConnectionLost {
                code,
                message: "lost connection to server during query".into(),
            }),
            MockPlan::Fail(message) => Err(Error::Query(message)),
        }
    }

    async fn release(&mut self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MockCursor {
    rows: VecDeque<Row>,
    fail_close: bool,
}

#[async_trait]
impl Cursor for MockCursor {
    async fn fetch(&mut self, max_rows: u32) -> Result<Vec<Row>> {
        let take = (max_rows as usize).min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }

    async fn close(&mut self) -> Result<()> {
        if self.fail_close {
            Err(Error::Cursor("cursor handle already invalid".into()))
        } else {
            Ok(())
        }
    }
}

/// A connector whose availability can be toggled mid-test and whose
/// connections answer from per-statement plan queues. Statements with no
/// queued plan get an empty row set.
pub struct MockConnector {
    connects: AtomicU32,
    connectable: AtomicBool,
    connect_delay: Mutex<Duration>,
    plans: PlanMap,
    executed: Arc<Mutex<Vec<String>>>,
    released: Arc<AtomicBool>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicU32::new(0),
            connectable: AtomicBool::new(true),
            connect_delay: Mutex::new(Duration::ZERO),
            plans: Arc::default(),
            executed: Arc::default(),
            released: Arc::default(),
        })
    }

    pub fn connectable(self: Arc<Self>, value: bool) -> Arc<Self> {
        self.connectable.store(value, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.connect_delay.lock().unwrap() = delay;
        self
    }

    pub fn set_connectable(&self, value: bool) {
        self.connectable.store(value, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Queue a plan for the next execution of `sql`.
    pub fn plan(&self, sql: &str, plan: MockPlan) {
        self.plans
            .lock()
            .unwrap()
            .entry(sql.to_string())
            .or_default()
            .push_back(plan);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _config: &ServerConfig) -> Result<Box<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.connectable.load(Ordering::SeqCst) {
            return Err(Error::Connect("connection refused".into()));
        }
        Ok(Box::new(MockConnection {
            script: VecDeque::new(),
            plans: self.plans.clone(),
            executed: self.executed.clone(),
            released: self.released.clone(),
        }))
    }
}
