// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Producer queue.
//!
//! FIFO hand-off between `add`/`delete` callers and the ingestion task.
//! Pushing never blocks; pulling waits until an entry shows up or the queue
//! is closed. A pulled entry counts as in hand until the consumer calls
//! [`ProducerQueue::done`], so [`ProducerQueue::drained`] only returns once
//! everything pushed has been handled.

use crate::message::Entry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Returned by [`ProducerQueue::push`] once the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Producer queue is closed")]
pub struct QueueClosed;

#[derive(Debug, Default)]
pub struct ProducerQueue {
    items: Mutex<VecDeque<Entry>>,
    available: Notify,
    /// Pulled but not yet marked done.
    in_hand: AtomicUsize,
    settled: Notify,
    closed: CancellationToken,
}

impl ProducerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` and wake one waiting consumer.
    pub fn push(&self, entry: Entry) -> Result<(), QueueClosed> {
        if self.closed.is_cancelled() {
            return Err(QueueClosed);
        }
        self.items.lock().push_back(entry);
        self.available.notify_one();
        Ok(())
    }

    /// Next entry, or `None` once the queue is closed.
    pub async fn pull(&self) -> Option<Entry> {
        loop {
            if !self.ready().await {
                return None;
            }
            if let Some(entry) = self.try_pull() {
                return Some(entry);
            }
        }
    }

    /// Next entry if one is queued right now.
    ///
    /// Each entry returned must be followed by a call to [`done`](Self::done).
    pub fn try_pull(&self) -> Option<Entry> {
        if self.closed.is_cancelled() {
            return None;
        }
        let mut items = self.items.lock();
        let entry = items.pop_front()?;
        self.in_hand.fetch_add(1, Ordering::AcqRel);
        Some(entry)
    }

    /// Mark one pulled entry as handled.
    pub fn done(&self) {
        let prev = self
            .in_hand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) && self.items.lock().is_empty() {
            self.settled.notify_waiters();
        }
    }

    /// Wait until nothing is queued or in hand. Returns at once when closed.
    pub async fn drained(&self) {
        loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.is_cancelled() || self.is_settled() {
                return;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.closed.cancelled() => return,
            }
        }
    }

    fn is_settled(&self) -> bool {
        let items = self.items.lock();
        items.is_empty() && self.in_hand.load(Ordering::Acquire) == 0
    }

    /// Wait until an entry is queued. Returns `false` once closed.
    pub async fn ready(&self) -> bool {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.is_cancelled() {
                return false;
            }
            if !self.items.lock().is_empty() {
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.closed.cancelled() => return false,
            }
        }
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        self.items.lock().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
