// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The entity: a key-value store reachable through admitted sessions.
//!
//! Each connected process owns one session. A session is a bounded inbound
//! channel drained by its own dispatch loop, plus a response channel read
//! through [`Entity::resp`]. Sessions are evicted after a period without
//! traffic and all of them end when the entity shuts down.

use crate::config::{ConfigError, EntityConfig};
use crate::message::{Message, Record};
use crate::ProcessId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod dispatch;
mod session;
mod store;

use dispatch::DispatchLoop;
use session::{SessionGuard, SessionSlot, SessionTable};
pub use store::{CommandError, KvStore};

/// Session admission errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error("Session limit reached ({limit})")]
    CapacityExceeded { limit: usize },

    #[error("Process {0} already holds a session")]
    DuplicateSession(ProcessId),

    #[error("Process {0} is not connected")]
    NotConnected(ProcessId),

    #[error("Entity is shut down")]
    Shutdown,
}

/// Shared key-value store with session admission control.
///
/// Cloning yields another handle to the same entity.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

struct EntityInner {
    config: EntityConfig,
    store: Arc<KvStore>,
    sessions: Arc<Mutex<SessionTable>>,
    shutdown: CancellationToken,
}

impl Entity {
    /// Create a new entity.
    pub fn new(config: EntityConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let sessions = Arc::new(Mutex::new(SessionTable::new(config.max_sessions)));
        Ok(Self {
            inner: Arc::new(EntityInner {
                config,
                store: Arc::new(KvStore::new()),
                sessions,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Open a session for `id` and return its send handle.
    ///
    /// Must be called from within a Tokio runtime: the session's dispatch
    /// loop is spawned onto it.
    pub fn connect(&self, id: ProcessId) -> Result<mpsc::Sender<Message>, EntityError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(EntityError::Shutdown);
        }

        let capacity = self.inner.config.channel_capacity;
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (responses_tx, responses_rx) = mpsc::channel(capacity);
        let cancel = self.inner.shutdown.child_token();

        let generation = {
            let mut table = self.inner.sessions.lock();
            table.check_admission(id)?;
            table.insert(id, SessionSlot::new(responses_rx, cancel.clone()))
        };

        let dispatch = DispatchLoop {
            inbound: inbound_rx,
            responses: responses_tx,
            store: self.inner.store.clone(),
            idle_timeout: self.inner.config.session_idle_timeout(),
            cancel,
            guard: SessionGuard::new(self.inner.sessions.clone(), id, generation),
        };
        tokio::spawn(dispatch.run());

        info!(process = id, "Session opened");
        Ok(inbound_tx)
    }

    /// Close the session of `id` and release its slot.
    pub fn disconnect(&self, id: ProcessId) -> Result<(), EntityError> {
        let slot = self
            .inner
            .sessions
            .lock()
            .remove(id)
            .ok_or(EntityError::NotConnected(id))?;
        slot.cancel();

        info!(process = id, "Session disconnected");
        Ok(())
    }

    /// Wait for the next response addressed to `id`.
    ///
    /// Returns the empty message when nothing arrives within the response
    /// window, or when `id` has no live session.
    pub async fn resp(&self, id: ProcessId) -> Message {
        let Some(responses) = self.inner.sessions.lock().responses(id) else {
            return Message::empty();
        };

        let wait = self.inner.config.response_wait();
        let next = async move {
            let mut rx = responses.lock().await;
            rx.recv().await
        };

        match tokio::time::timeout(wait, next).await {
            Ok(Some(msg)) => msg,
            Ok(None) => Message::empty(),
            Err(_) => {
                debug!(process = id, "No response within {:?}", wait);
                Message::empty()
            }
        }
    }

    /// Stop every dispatch loop and refuse new sessions. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Entity shutting down");
            self.inner.shutdown.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Check if `id` currently holds a session.
    pub fn is_connected(&self, id: ProcessId) -> bool {
        self.inner.sessions.lock().contains(id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.inner.store.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.store.contains(key)
    }

    /// Snapshot of all records, sorted by key.
    pub fn records(&self) -> Vec<Record> {
        self.inner.store.records()
    }

    pub fn config(&self) -> &EntityConfig {
        &self.inner.config
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner.store, f)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("records", &self.len())
            .field("sessions", &self.session_count())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
