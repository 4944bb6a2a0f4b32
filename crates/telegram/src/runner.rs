//! Long-polling loop. Updates are fanned out to one lane per user so that a
//! user's events run strictly in arrival order while different users proceed
//! in parallel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use romupunkt_core::domain::UserId;

use crate::dispatcher::Dispatcher;
use crate::events::Inbound;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport could not be set up: {0}")]
    Setup(String),
    #[error("polling request failed: {0}")]
    Receive(String),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("polling failed {attempts} times in a row, last error: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 10, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// The inbound half of the transport.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Waits for the next batch of updates. An empty batch is a normal poll timeout.
    async fn next_batch(&self) -> Result<Vec<Inbound>, TransportError>;
}

struct Lane {
    id: u64,
    tx: mpsc::UnboundedSender<Inbound>,
}

pub struct PollingRunner {
    source: Arc<dyn UpdateSource>,
    dispatcher: Arc<Dispatcher>,
    policy: ReconnectPolicy,
    lane_idle: Duration,
    lanes: Arc<DashMap<UserId, Lane>>,
    next_lane: AtomicU64,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl PollingRunner {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        dispatcher: Arc<Dispatcher>,
        policy: ReconnectPolicy,
        lane_idle: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            dispatcher,
            policy,
            lane_idle,
            lanes: Arc::new(DashMap::new()),
            next_lane: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Polls until the shutdown token fires, then lets every lane finish the
    /// updates it already holds. Gives up after `max_retries` consecutive
    /// failed polls.
    pub async fn run(&self) -> Result<(), RunnerError> {
        info!(event_name = "ingress.telegram.polling_started", "polling for updates");
        let mut failures: u32 = 0;

        let outcome = loop {
            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                polled = self.source.next_batch() => polled,
            };

            match polled {
                Ok(batch) => {
                    failures = 0;
                    for inbound in batch {
                        self.enqueue(inbound);
                    }
                }
                Err(error) => {
                    warn!(
                        event_name = "ingress.telegram.poll_failed",
                        attempt = failures,
                        max_retries = self.policy.max_retries,
                        error = %error,
                        "polling failed"
                    );
                    if failures >= self.policy.max_retries {
                        break Err(RunnerError::RetriesExhausted { attempts: failures + 1, last: error });
                    }

                    let delay = self.policy.backoff(failures);
                    failures += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        };

        self.drain().await;
        outcome
    }

    fn enqueue(&self, inbound: Inbound) {
        let user_id = inbound.user_id;
        match self.lanes.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(inbound)) = entry.get().tx.send(inbound) {
                    let lane = self.spawn_lane(user_id);
                    let _ = lane.tx.send(inbound);
                    entry.insert(lane);
                }
            }
            Entry::Vacant(entry) => {
                let lane = self.spawn_lane(user_id);
                let _ = lane.tx.send(inbound);
                entry.insert(lane);
            }
        }
    }

    fn spawn_lane(&self, user_id: UserId) -> Lane {
        let id = self.next_lane.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(event_name = "ingress.telegram.lane_opened", user_id = user_id.0, lane_id = id, "lane opened");
        self.tracker.spawn(run_lane(
            self.dispatcher.clone(),
            self.lanes.clone(),
            user_id,
            id,
            rx,
            self.lane_idle,
        ));
        Lane { id, tx }
    }

    async fn drain(&self) {
        info!(
            event_name = "system.shutdown.draining",
            lanes = self.lanes.len(),
            "waiting for in-flight updates"
        );
        self.lanes.clear();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Handles one user's updates in order. The lane closes itself after
/// `idle` without traffic, unless an update was queued in the meantime.
async fn run_lane(
    dispatcher: Arc<Dispatcher>,
    lanes: Arc<DashMap<UserId, Lane>>,
    user_id: UserId,
    id: u64,
    mut rx: mpsc::UnboundedReceiver<Inbound>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(inbound)) => {
                dispatcher.handle(inbound).await;
            }
            Ok(None) => break,
            Err(_) => {
                if lanes.remove_if(&user_id, |_, lane| lane.id == id && rx.is_empty()).is_some() {
                    break;
                }
            }
        }
    }
    debug!(event_name = "ingress.telegram.lane_closed", user_id = user_id.0, lane_id = id, "lane closed");
}
