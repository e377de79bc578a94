//! Durable replay queue for failed write requests
//!
//! A write that could not reach the origin (or got a 5xx back) is persisted
//! as a [`QueuedWriteRequest`] and replayed on later drains. Drains run after
//! startup, after any successful network exchange and when the reconnect
//! trigger fires.
//!
//! Replay policy per entry:
//! - status < 400: replayed, entry deleted
//! - status 400-499: rejected by the origin, entry deleted with a warning
//! - status >= 500: retained for the next drain
//! - transport failure: retained, reconnect trigger re-armed
//! - undecodable entry: retained and logged
//!
//! Replayed writes are not de-duplicated: if a previous attempt reached the
//! origin but its response was lost, the write is applied again.

use crate::error::{ProxyError, Result};
use crate::metrics::ProxyMetrics;
use crate::models::{InterceptedRequest, QueuedWriteRequest};
use crate::reconnect::{ReconnectHandler, ReconnectTrigger};
use crate::store::DurableStore;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What happened to one queued entry during a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Replayed { status: u16 },
    Rejected { status: u16 },
    Retained { status: u16 },
    Unreachable,
    Corrupt,
}

impl ReplayOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReplayOutcome::Replayed { .. } => "replayed",
            ReplayOutcome::Rejected { .. } => "rejected",
            ReplayOutcome::Retained { .. } => "retained",
            ReplayOutcome::Unreachable => "unreachable",
            ReplayOutcome::Corrupt => "corrupt",
        }
    }
}

/// Counts of entry outcomes for one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub rejected: usize,
    pub retained: usize,
    pub unreachable: usize,
    pub corrupt: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: ReplayOutcome) {
        match outcome {
            ReplayOutcome::Replayed { .. } => self.replayed += 1,
            ReplayOutcome::Rejected { .. } => self.rejected += 1,
            ReplayOutcome::Retained { .. } => self.retained += 1,
            ReplayOutcome::Unreachable => self.unreachable += 1,
            ReplayOutcome::Corrupt => self.corrupt += 1,
        }
    }

    /// Entries visited
    pub fn total(&self) -> usize {
        self.replayed + self.rejected + self.retained + self.unreachable + self.corrupt
    }

    /// Entries still queued after the drain
    pub fn remaining(&self) -> usize {
        self.retained + self.unreachable + self.corrupt
    }
}

/// Unique, strictly increasing millisecond ids
#[derive(Debug, Default)]
struct IdGenerator {
    last: Mutex<u64>,
}

impl IdGenerator {
    fn next(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let id = if now > *last { now } else { *last + 1 };
        *last = id;
        id
    }

    fn seed(&self, floor: u64) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = (*last).max(floor);
    }
}

/// Durable queue of write requests awaiting replay
pub struct ReplayQueue {
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    trigger: Arc<dyn ReconnectTrigger>,
    metrics: Arc<ProxyMetrics>,
    sync_tag: String,
    ids: IdGenerator,
    drain_lock: tokio::sync::Mutex<()>,
    drain_scheduled: AtomicBool,
}

impl ReplayQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn Transport>,
        trigger: Arc<dyn ReconnectTrigger>,
        metrics: Arc<ProxyMetrics>,
        sync_tag: impl Into<String>,
    ) -> Self {
        ReplayQueue {
            store,
            transport,
            trigger,
            metrics,
            sync_tag: sync_tag.into(),
            ids: IdGenerator::default(),
            drain_lock: tokio::sync::Mutex::new(()),
            drain_scheduled: AtomicBool::new(false),
        }
    }

    pub fn sync_tag(&self) -> &str {
        &self.sync_tag
    }

    /// Seed the id counter from persisted entries
    ///
    /// Returns the number of entries left over from a previous session.
    pub async fn restore(&self) -> Result<usize> {
        let keys = self.store.keys().await?;
        let max_id = keys.iter().filter_map(|k| k.parse::<u64>().ok()).max();
        if let Some(max_id) = max_id {
            self.ids.seed(max_id);
        }
        info!("Replay queue holds {} entries", keys.len());
        Ok(keys.len())
    }

    /// Persist a failed write and ask for a reconnect signal
    ///
    /// Returns the id of the new entry.
    pub async fn enqueue(&self, request: &InterceptedRequest) -> Result<u64> {
        let entry = QueuedWriteRequest::from_request(self.ids.next(), request);
        let value = serde_json::to_vec(&entry)?;
        self.store.set(&entry.storage_key(), Bytes::from(value)).await?;

        self.metrics.record_enqueue();
        self.trigger.register(&self.sync_tag);
        info!("Queued {} {} for replay as {}", entry.method, entry.url, entry.id);
        Ok(entry.id)
    }

    /// All queued entries in id order; undecodable entries are skipped
    pub async fn pending(&self) -> Result<Vec<QueuedWriteRequest>> {
        let mut entries = Vec::new();
        for key in self.store.keys().await? {
            if let Some(value) = self.store.get(&key).await? {
                match serde_json::from_slice::<QueuedWriteRequest>(&value) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("Undecodable queue entry {}: {}", key, e),
                }
            }
        }
        Ok(entries)
    }

    /// Replay every queued entry once
    ///
    /// Drains never overlap: a drain started while another one runs waits for
    /// it. Entries are replayed concurrently, so one slow or failing entry
    /// does not hold up the others.
    pub async fn drain(&self) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        self.drain_locked().await
    }

    async fn drain_locked(&self) -> Result<DrainReport> {
        let keys = self.store.keys().await?;
        let mut report = DrainReport::default();
        if keys.is_empty() {
            return Ok(report);
        }

        debug!("Draining {} queued writes", keys.len());
        let mut replays = JoinSet::new();
        for key in keys {
            let store = Arc::clone(&self.store);
            let transport = Arc::clone(&self.transport);
            replays.spawn(async move { replay_entry(store, transport, key).await });
        }

        while let Some(joined) = replays.join_next().await {
            match joined {
                Ok(Some(outcome)) => {
                    self.metrics.record_replay_outcome(outcome.label());
                    report.record(outcome);
                }
                Ok(None) => {}
                Err(e) => error!("Replay task failed: {}", e),
            }
        }

        if report.unreachable > 0 {
            self.trigger.register(&self.sync_tag);
        }

        info!(
            "Drain finished: {} replayed, {} rejected, {} retained, {} unreachable, {} corrupt",
            report.replayed, report.rejected, report.retained, report.unreachable, report.corrupt
        );
        Ok(report)
    }

    /// Run a drain in the background
    ///
    /// At most one scheduled drain waits behind a running one; further
    /// requests while it waits are folded into it.
    pub fn schedule_drain(self: &Arc<Self>) {
        if self.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = queue.drain_lock.lock().await;
            queue.drain_scheduled.store(false, Ordering::Release);
            if let Err(e) = queue.drain_locked().await {
                warn!("Scheduled drain failed: {}", e);
            }
        });
    }
}

#[async_trait]
impl ReconnectHandler for ReplayQueue {
    async fn on_reconnect(&self, tag: &str) {
        if tag != self.sync_tag {
            debug!("Ignoring reconnect tag {}", tag);
            return;
        }
        if let Err(e) = self.drain().await {
            warn!("Drain after reconnect failed: {}", e);
        }
    }
}

/// Replay one stored entry; `None` when it vanished before it was read
async fn replay_entry(
    store: Arc<dyn DurableStore>,
    transport: Arc<dyn Transport>,
    key: String,
) -> Option<ReplayOutcome> {
    let value = match store.get(&key).await {
        Ok(Some(value)) => value,
        Ok(None) => return None,
        Err(e) => {
            error!("Failed to read queue entry {}: {}", key, e);
            return Some(ReplayOutcome::Corrupt);
        }
    };

    let request = match serde_json::from_slice::<QueuedWriteRequest>(&value)
        .map_err(ProxyError::from)
        .and_then(|entry| entry.to_request())
    {
        Ok(request) => request,
        Err(e) => {
            error!("Corrupt queue entry {}: {}", key, e);
            return Some(ReplayOutcome::Corrupt);
        }
    };

    let status = match transport.send(&request).await {
        Ok(response) => response.status.as_u16(),
        Err(e) => {
            debug!("Replay of {} unreachable: {}", key, e);
            return Some(ReplayOutcome::Unreachable);
        }
    };

    let outcome = match status {
        0..=399 => ReplayOutcome::Replayed { status },
        400..=499 => ReplayOutcome::Rejected { status },
        _ => ReplayOutcome::Retained { status },
    };

    match outcome {
        ReplayOutcome::Replayed { .. } => {
            info!("Replayed {} {} ({})", request.method, request.url, status);
            delete_entry(&store, &key).await;
        }
        ReplayOutcome::Rejected { .. } => {
            warn!(
                "Origin rejected replay of {} {} with {}, dropping it",
                request.method, request.url, status
            );
            delete_entry(&store, &key).await;
        }
        _ => debug!("Replay of {} got {}, keeping it", key, status),
    }

    Some(outcome)
}

async fn delete_entry(store: &Arc<dyn DurableStore>, key: &str) {
    if let Err(e) = store.delete(key).await {
        error!("Failed to delete replayed entry {}: {}", key, e);
    }
}
