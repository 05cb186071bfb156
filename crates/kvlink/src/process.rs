// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer process.
//!
//! A process accepts `add`/`delete` calls without blocking, tracks every
//! entry until the entity acknowledges it, and keeps its session alive:
//!
//! ```text
//!  add/delete ─► ProducerQueue ─► ingestion task ─► Tracker (Want)
//!                                                     │
//!                                 run loop ◄─ work ───┘
//!                                    │ flush
//!                                    ▼
//!                         session channel ─► Entity ─► resp ─► waiter
//! ```
//!
//! An acknowledgment timeout sends the process through its reconnect state
//! machine; running out of reconnect budget shuts it down.

use crate::config::{ConfigError, ProcessConfig};
use crate::entity::{Entity, EntityError};
use crate::message::{Entry, Message};
use crate::ProcessId;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod queue;
mod reconnect;
mod scheduler;
mod tracker;

pub use queue::{ProducerQueue, QueueClosed};
pub use reconnect::LinkState;
pub use tracker::{Outcome, Rejected, Tracker, TrackerSnapshot, Wantlist};

/// Process errors.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Entity error: {0}")]
    Entity(#[from] EntityError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Nothing to send")]
    NoWork,

    #[error("No acknowledgment for key '{key}'")]
    AckTimeout { key: String },

    #[error("Process {0} is shut down")]
    Shutdown(ProcessId),

    #[error("Process {0} has no session")]
    NotRegistered(ProcessId),

    #[error("Process {0} is already started")]
    AlreadyStarted(ProcessId),
}

/// Session handle: where batches go and where answers come from.
#[derive(Clone)]
struct Link {
    entity: Entity,
    tx: mpsc::Sender<Message>,
}

/// Producer endpoint. Cloning yields another handle to the same process.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

struct ProcessInner {
    id: ProcessId,
    config: RwLock<ProcessConfig>,
    queue: ProducerQueue,
    tracker: Mutex<Tracker>,
    link: RwLock<Option<Link>>,
    /// Work-ready signal, carries the ingestion instant.
    work_tx: mpsc::Sender<Instant>,
    work_rx: Mutex<Option<mpsc::Receiver<Instant>>>,
    /// Only one batch is in flight at a time.
    flushing: tokio::sync::Mutex<()>,
    /// Wakes the run loop after a runtime interval change.
    intervals_changed: Notify,
    started: AtomicBool,
    shutdown: CancellationToken,
    /// Cancelled once the ingestion and run-loop tasks have exited.
    stopped: CancellationToken,
}

impl Process {
    /// Create a stopped process.
    pub fn new(id: ProcessId, config: ProcessConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let (work_tx, work_rx) = mpsc::channel(1);
        Ok(Self {
            inner: Arc::new(ProcessInner {
                id,
                config: RwLock::new(config),
                queue: ProducerQueue::new(),
                tracker: Mutex::new(Tracker::new()),
                link: RwLock::new(None),
                work_tx,
                work_rx: Mutex::new(Some(work_rx)),
                flushing: tokio::sync::Mutex::new(()),
                intervals_changed: Notify::new(),
                started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                stopped: CancellationToken::new(),
            }),
        })
    }

    /// Register with `entity` and spawn the ingestion and run-loop tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, entity: &Entity) -> Result<(), ProcessError> {
        let id = self.inner.id;
        if self.is_shutdown() {
            return Err(ProcessError::Shutdown(id));
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(ProcessError::AlreadyStarted(id));
        }

        if let Err(e) = self.registration(entity) {
            self.inner.started.store(false, Ordering::Release);
            return Err(e);
        }

        let work_rx = self
            .inner
            .work_rx
            .lock()
            .take()
            .ok_or(ProcessError::AlreadyStarted(id))?;

        let ingest = tokio::spawn(ingest_loop(self.inner.clone()));
        let run = tokio::spawn(scheduler::run(self.inner.clone(), work_rx));
        let stopped = self.inner.stopped.clone();
        tokio::spawn(async move {
            let _ = ingest.await;
            let _ = run.await;
            stopped.cancel();
        });

        info!(process = id, "Process started");
        Ok(())
    }

    /// Open a session with `entity` and make it the send target.
    pub fn registration(&self, entity: &Entity) -> Result<(), ProcessError> {
        if self.is_shutdown() {
            return Err(ProcessError::Shutdown(self.inner.id));
        }
        let tx = entity.connect(self.inner.id)?;
        *self.inner.link.write() = Some(Link {
            entity: entity.clone(),
            tx,
        });
        Ok(())
    }

    /// Queue an upsert of `key`.
    pub fn add(&self, key: impl Into<String>, payload: impl Into<String>) -> Result<(), ProcessError> {
        self.push(Entry::add(key, payload))
    }

    /// Queue a removal of `key`.
    pub fn delete(&self, key: impl Into<String>) -> Result<(), ProcessError> {
        self.push(Entry::delete(key))
    }

    fn push(&self, entry: Entry) -> Result<(), ProcessError> {
        if self.is_shutdown() {
            return Err(ProcessError::Shutdown(self.inner.id));
        }
        self.inner
            .queue
            .push(entry)
            .map_err(|QueueClosed| ProcessError::Shutdown(self.inner.id))
    }

    /// Send one batch now if anything is pending.
    ///
    /// Entries already queued are ingested first. An acknowledgment timeout
    /// runs the reconnect state machine before the error is returned.
    pub async fn flush(&self) -> Result<usize, ProcessError> {
        if self.inner.started.load(Ordering::Acquire) {
            self.inner.queue.drained().await;
        }
        let result = scheduler::flush(&self.inner).await;
        if let Err(ProcessError::AckTimeout { .. }) = &result {
            if reconnect::recover(&self.inner).await != LinkState::Connected {
                self.inner.stop();
            }
        }
        result
    }

    /// Stop the process. Idempotent.
    pub fn shutdown(&self) {
        self.inner.stop();
    }

    /// Wait until the process is shut down and its tasks have exited.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
        if self.inner.started.load(Ordering::Acquire) {
            self.inner.stopped.cancelled().await;
        }
    }

    pub fn id(&self) -> ProcessId {
        self.inner.id
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.inner.tracker.lock().snapshot()
    }

    pub fn has_pending_work(&self) -> bool {
        self.inner.tracker.lock().has_pending_work()
    }

    /// Number of entries waiting in Want.
    pub fn pending_count(&self) -> usize {
        self.inner.tracker.lock().pending_count()
    }

    pub fn config(&self) -> ProcessConfig {
        self.inner.config.read().clone()
    }

    pub fn set_resend_interval(&self, interval: Duration) {
        self.inner.config.write().resend_interval_ms = crate::config::as_millis(interval);
        self.inner.intervals_changed.notify_one();
    }

    pub fn set_send_message_max_delay(&self, delay: Duration) {
        self.inner.config.write().send_message_max_delay_ms = crate::config::as_millis(delay);
        self.inner.intervals_changed.notify_one();
    }

    /// Applies from the next acknowledgment wait.
    pub fn set_wait_resp_interval(&self, interval: Duration) {
        self.inner.config.write().wait_resp_interval_ms = crate::config::as_millis(interval);
    }
}

impl ProcessInner {
    fn stop(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.queue.close();
        self.shutdown.cancel();

        if let Some(link) = self.link.write().take() {
            let _ = link.entity.disconnect(self.id);
        }
        info!(process = self.id, "Process stopped");
    }
}

/// Pull entries one at a time into Want.
///
/// This task is the only writer of new entries into the tracker, so entries
/// of one key reach it in the order they were queued.
async fn ingest_loop(inner: Arc<ProcessInner>) {
    while let Some(entry) = inner.queue.pull().await {
        let key = entry.key().to_string();
        let inserted = inner.tracker.lock().ingest(entry);
        inner.queue.done();
        if inserted {
            let _ = inner.work_tx.try_send(Instant::now());
        } else {
            debug!(process = inner.id, key = %key, "Key already pending, entry dropped");
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner.tracker.lock(), f)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.inner.id)
            .field("pending", &self.pending_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityConfig;

    fn slow_config() -> ProcessConfig {
        // Nothing fires on its own; tests drive flushes by hand.
        ProcessConfig::default()
            .with_send_message_max_delay(Duration::from_secs(60))
            .with_resend_interval(Duration::from_secs(60))
    }

    fn entity() -> Entity {
        Entity::new(EntityConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_flush() {
        let ent = entity();
        let process = Process::new(1, slow_config()).unwrap();
        process.start(&ent).unwrap();

        process.add("n1", "is n1").unwrap();
        process.add("n2", "is n2").unwrap();
        assert_eq!(process.flush().await.unwrap(), 2);
        assert_eq!(ent.get("n1").unwrap().payload, "is n1");
        assert!(!process.has_pending_work());

        process.delete("n2").unwrap();
        assert_eq!(process.flush().await.unwrap(), 1);
        assert!(!ent.contains("n2"));
        assert_eq!(ent.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_without_work() {
        let ent = entity();
        let process = Process::new(1, slow_config()).unwrap();
        process.start(&ent).unwrap();
        assert!(matches!(process.flush().await, Err(ProcessError::NoWork)));
    }

    #[tokio::test]
    async fn test_flush_before_registration() {
        let process = Process::new(4, slow_config()).unwrap();
        process.add("k", "v").unwrap();
        assert!(matches!(
            process.flush().await,
            Err(ProcessError::NotRegistered(4))
        ));
        // Not started: the entry is still queued.
        assert_eq!(process.inner.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let ent = entity();
        let process = Process::new(1, slow_config()).unwrap();
        process.start(&ent).unwrap();
        assert!(matches!(
            process.start(&ent),
            Err(ProcessError::AlreadyStarted(1))
        ));
    }

    #[tokio::test]
    async fn test_start_rejected_by_entity() {
        let ent = Entity::new(EntityConfig::default().with_max_sessions(1)).unwrap();
        Process::new(1, slow_config()).unwrap().start(&ent).unwrap();

        let second = Process::new(2, slow_config()).unwrap();
        assert!(matches!(
            second.start(&ent),
            Err(ProcessError::Entity(EntityError::CapacityExceeded { limit: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_add_after_shutdown() {
        let ent = entity();
        let process = Process::new(3, slow_config()).unwrap();
        process.start(&ent).unwrap();

        process.shutdown();
        process.shutdown();
        assert!(process.is_shutdown());
        assert!(matches!(process.add("k", "v"), Err(ProcessError::Shutdown(3))));
        assert!(matches!(process.delete("k"), Err(ProcessError::Shutdown(3))));

        tokio::time::timeout(Duration::from_secs(1), process.closed())
            .await
            .unwrap();
        assert!(!ent.is_connected(3));
    }

    #[tokio::test]
    async fn test_closed_returns_after_tasks_exit_for_every_caller() {
        let ent = entity();
        let process = Process::new(5, slow_config()).unwrap();
        process.start(&ent).unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let process = process.clone();
                tokio::spawn(async move {
                    process.closed().await;
                    process.inner.stopped.is_cancelled()
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        process.shutdown();

        for waiter in waiters {
            let tasks_exited = tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
            assert!(tasks_exited);
        }
    }

    #[tokio::test]
    async fn test_closed_without_start() {
        let process = Process::new(6, slow_config()).unwrap();
        process.shutdown();
        tokio::time::timeout(Duration::from_secs(1), process.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_interval_setters() {
        let process = Process::new(1, ProcessConfig::default()).unwrap();
        process.set_resend_interval(Duration::from_millis(250));
        process.set_wait_resp_interval(Duration::from_millis(750));
        process.set_send_message_max_delay(Duration::from_millis(40));

        let config = process.config();
        assert_eq!(config.send_message_max_delay(), Duration::from_millis(40));
        assert_eq!(config.resend_interval(), Duration::from_millis(250));
        assert_eq!(config.wait_resp_interval(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_display_dump() {
        let process = Process::new(1, slow_config()).unwrap();
        process.inner.tracker.lock().ingest(Entry::add("k1", "v1"));
        assert!(process.to_string().contains("op: add, key: k1, data: v1"));
    }
}
