// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session table: admission control and slot bookkeeping.

use super::EntityError;
use crate::message::Message;
use crate::ProcessId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Receiving side of a session's response channel, shared with `resp` callers.
pub(crate) type ResponseReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Message>>>;

/// One admitted session.
pub(crate) struct SessionSlot {
    /// Distinguishes successive sessions of the same process.
    generation: u64,
    responses: ResponseReceiver,
    cancel: CancellationToken,
}

impl SessionSlot {
    pub(crate) fn new(responses: mpsc::Receiver<Message>, cancel: CancellationToken) -> Self {
        Self {
            generation: 0,
            responses: Arc::new(tokio::sync::Mutex::new(responses)),
            cancel,
        }
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Live sessions indexed by process id.
///
/// The response receiver of a closed session is retired rather than dropped
/// so that a `Fail` posted just before the session ended can still be read.
/// It is discarded when the process opens its next session.
pub(crate) struct SessionTable {
    slots: HashMap<ProcessId, SessionSlot>,
    retired: HashMap<ProcessId, ResponseReceiver>,
    limit: usize,
    next_generation: u64,
}

impl SessionTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            slots: HashMap::new(),
            retired: HashMap::new(),
            limit,
            next_generation: 1,
        }
    }

    /// Reject `id` if it already holds a session or the table is full.
    pub(crate) fn check_admission(&self, id: ProcessId) -> Result<(), EntityError> {
        if self.slots.contains_key(&id) {
            return Err(EntityError::DuplicateSession(id));
        }
        if self.slots.len() >= self.limit {
            return Err(EntityError::CapacityExceeded { limit: self.limit });
        }
        Ok(())
    }

    /// Insert an admitted slot and return its generation.
    pub(crate) fn insert(&mut self, id: ProcessId, mut slot: SessionSlot) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        slot.generation = generation;
        self.retired.remove(&id);
        self.slots.insert(id, slot);
        generation
    }

    /// Remove the session of `id` regardless of generation.
    pub(crate) fn remove(&mut self, id: ProcessId) -> Option<SessionSlot> {
        let slot = self.slots.remove(&id)?;
        self.retired.insert(id, slot.responses.clone());
        Some(slot)
    }

    /// Remove the session of `id` only if it is still the given generation.
    pub(crate) fn release(&mut self, id: ProcessId, generation: u64) -> bool {
        match self.slots.get(&id) {
            Some(slot) if slot.generation == generation => {
                self.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Response receiver of the live session of `id`, or of its last one.
    pub(crate) fn responses(&self, id: ProcessId) -> Option<ResponseReceiver> {
        self.slots
            .get(&id)
            .map(|slot| slot.responses.clone())
            .or_else(|| self.retired.get(&id).cloned())
    }

    pub(crate) fn contains(&self, id: ProcessId) -> bool {
        self.slots.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Releases a session slot when the dispatch loop that owns it ends.
pub(crate) struct SessionGuard {
    table: Arc<Mutex<SessionTable>>,
    id: ProcessId,
    generation: u64,
}

impl SessionGuard {
    pub(crate) fn new(table: Arc<Mutex<SessionTable>>, id: ProcessId, generation: u64) -> Self {
        Self {
            table,
            id,
            generation,
        }
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let released = self.table.lock().release(self.id, self.generation);
        if released {
            info!(process = self.id, "Session closed");
        }
    }
}
