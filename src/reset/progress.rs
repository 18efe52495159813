//! Per-job progress fan-out.
//!
//! One `broadcast` channel per running job, opened before the worker starts
//! and closed right after the terminal event is published. There is no replay
//! buffer: a subscriber only sees what is published after it subscribed.
//!
//! A job with no local channel (run by another process sharing the database)
//! is followed through its ledger row instead, polled until it turns terminal.

use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, MissedTickBehavior};

use super::db::DbHandle;
use super::models::{ResetAudit, ResetStatus};
use super::strategy::CollectionCleared;

/// Hard lifetime of a progress stream.
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(300);

/// How often a stream without a live channel re-reads the ledger.
pub const DEFAULT_LEDGER_POLL_INTERVAL: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The worker picked the job up (`IN_PROGRESS`).
    Started { audit: ResetAudit },
    CollectionCleared(CollectionCleared),
    Completed { audit: ResetAudit },
    Failed { audit: ResetAudit },
    /// Current ledger state of a job running in another process.
    Snapshot { audit: ResetAudit },
}

impl ProgressEvent {
    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::CollectionCleared(_) => "collection_cleared",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Snapshot { .. } => "snapshot",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// The terminal event for a finished job, or `None` while it is active.
    pub fn for_terminal(audit: &ResetAudit) -> Option<Self> {
        match audit.status {
            ResetStatus::Completed => Some(Self::Completed {
                audit: audit.clone(),
            }),
            ResetStatus::Failed => Some(Self::Failed {
                audit: audit.clone(),
            }),
            ResetStatus::Started | ResetStatus::InProgress => None,
        }
    }

    pub fn to_sse(&self) -> Event {
        let event = Event::default().event(self.event_name());
        match serde_json::to_string(self) {
            Ok(json) => event.data(json),
            Err(e) => {
                tracing::warn!(error = %e, event = self.event_name(), "failed to serialize progress event");
                event
            }
        }
    }
}

/// Registry of live per-job channels. Cheap to clone.
#[derive(Clone, Default)]
pub struct ProgressBroadcaster {
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, job_id: &str) {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.channels.insert(job_id.to_string(), tx);
    }

    /// Send to current subscribers and return how many there were. Publishing
    /// to a job with no channel or no listeners is a no-op.
    pub fn publish(&self, job_id: &str, event: ProgressEvent) -> usize {
        match self.channels.get(job_id) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop the job's sender. Subscribers drain anything already queued and
    /// then see the channel as closed.
    pub fn close(&self, job_id: &str) {
        self.channels.remove(job_id);
    }

    pub fn subscribe(&self, job_id: &str) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.channels.get(job_id).map(|tx| tx.subscribe())
    }
}

/// Follows a job through its ledger row.
#[derive(Clone)]
pub struct LedgerWatch {
    db: DbHandle,
    job_id: String,
    every: Duration,
}

impl LedgerWatch {
    pub fn new(db: DbHandle, job_id: &str, every: Duration) -> Self {
        Self {
            db,
            job_id: job_id.to_string(),
            every,
        }
    }

    /// Poll until the row is terminal and return its terminal event, or
    /// `None` once `deadline` passes.
    async fn wait_for_terminal(&self, deadline: Instant) -> Option<ProgressEvent> {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if tokio::time::timeout_at(deadline, ticker.tick()).await.is_err() {
                tracing::debug!(job_id = %self.job_id, "progress stream timed out");
                return None;
            }
            let id = self.job_id.clone();
            match self.db.call(move |db| db.get_reset_audit(&id)).await {
                Ok(Some(audit)) => {
                    if let Some(event) = ProgressEvent::for_terminal(&audit) {
                        return Some(event);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "failed to poll reset job");
                }
            }
        }
    }
}

/// What a new subscriber to a job gets.
pub struct ProgressSubscription {
    first: Option<ProgressEvent>,
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    /// Used once the channel is gone without a terminal event.
    ledger: Option<LedgerWatch>,
}

impl ProgressSubscription {
    /// Job owned by this process: live events only.
    pub fn live(rx: broadcast::Receiver<ProgressEvent>) -> Self {
        Self {
            first: None,
            rx: Some(rx),
            ledger: None,
        }
    }

    /// Job already terminal: its terminal event, then close.
    pub fn finished(terminal: ProgressEvent) -> Self {
        Self {
            first: Some(terminal),
            rx: None,
            ledger: None,
        }
    }

    /// Active job with no local channel: one snapshot, then the terminal
    /// event once the ledger shows it.
    pub fn remote(audit: ResetAudit, ledger: LedgerWatch) -> Self {
        Self {
            first: Some(ProgressEvent::Snapshot { audit }),
            rx: None,
            ledger: Some(ledger),
        }
    }

    /// Fall back to the ledger if the channel closes before a terminal event.
    pub fn watch_ledger(mut self, ledger: LedgerWatch) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Turn the subscription into a stream that ends after a terminal event,
    /// or when `timeout` elapses.
    pub fn into_stream(self, timeout: Duration) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let state = StreamState {
            first: self.first,
            rx: self.rx,
            ledger: self.ledger,
            deadline: Instant::now() + timeout,
            done: false,
        };
        futures::stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }
            if let Some(event) = st.first.take() {
                st.done = event.is_terminal();
                return Some((event, st));
            }
            if let Some(mut rx) = st.rx.take() {
                loop {
                    match tokio::time::timeout_at(st.deadline, rx.recv()).await {
                        Err(_) => {
                            tracing::debug!("progress stream timed out");
                            return None;
                        }
                        Ok(Ok(event)) => {
                            st.done = event.is_terminal();
                            st.rx = Some(rx);
                            return Some((event, st));
                        }
                        Ok(Err(RecvError::Lagged(skipped))) => {
                            tracing::warn!(skipped, "progress subscriber lagged");
                        }
                        Ok(Err(RecvError::Closed)) => break,
                    }
                }
            }
            let ledger = st.ledger.take()?;
            let event = ledger.wait_for_terminal(st.deadline).await?;
            st.done = true;
            Some((event, st))
        })
    }
}

struct StreamState {
    first: Option<ProgressEvent>,
    rx: Option<broadcast::Receiver<ProgressEvent>>,
    ledger: Option<LedgerWatch>,
    deadline: Instant,
    done: bool,
}
