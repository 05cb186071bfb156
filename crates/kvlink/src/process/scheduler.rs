// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch scheduler: decides when to flush and sends batches.
//!
//! Events handled by the run loop:
//!
//! - resend timer: stranded Sent entries go back to Want, then flush
//! - work signal: arms the max-delay deadline, flushes early past the cutoff
//! - max-delay deadline: forces a flush
//! - interval change: rebuilds the resend timer and moves the deadline
//! - shutdown: exits

use super::reconnect::{self, LinkState};
use super::tracker::Outcome;
use super::{Link, ProcessError, ProcessInner};
use crate::message::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub(super) async fn run(inner: Arc<ProcessInner>, mut work: mpsc::Receiver<Instant>) {
    let id = inner.id;
    let mut resend_period = inner.config.read().resend_interval();
    let mut resend = resend_timer(resend_period);

    // Instant of the first work signal since the last flush.
    let mut first_signal: Option<Instant> = None;
    let deadline = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,

            _ = resend.tick() => {
                let moved = inner.tracker.lock().transfer_sent();
                if moved > 0 {
                    debug!(process = id, moved, "Resend timer: Sent -> Want");
                }
                let pending = inner.tracker.lock().has_pending_work();
                if pending {
                    flush_and_recover(&inner).await;
                }
            }

            _ = inner.intervals_changed.notified() => {
                let (period, max_delay) = {
                    let config = inner.config.read();
                    (config.resend_interval(), config.send_message_max_delay())
                };
                if period != resend_period {
                    debug!(process = id, ?period, "Resend interval changed");
                    resend_period = period;
                    resend = resend_timer(period);
                }
                if let Some(first) = first_signal {
                    deadline.as_mut().reset(first + max_delay);
                }
            }

            signal = work.recv() => {
                let Some(at) = signal else { break };
                let (max_delay, cutoff) = {
                    let config = inner.config.read();
                    (config.send_message_max_delay(), config.send_msg_cutoff)
                };

                let first = match first_signal {
                    Some(first) => first,
                    None => {
                        first_signal = Some(at);
                        deadline.as_mut().reset(at + max_delay);
                        at
                    }
                };

                let pending = inner.tracker.lock().pending_count();
                if pending > cutoff || at.duration_since(first) >= max_delay {
                    debug!(process = id, pending, "Early flush");
                    first_signal = None;
                    flush_and_recover(&inner).await;
                }
            }

            _ = &mut deadline, if first_signal.is_some() => {
                debug!(process = id, "Max delay reached");
                first_signal = None;
                flush_and_recover(&inner).await;
            }
        }

        // Leftovers from a size-limited batch wait for the next deadline.
        let leftovers = inner.tracker.lock().has_pending_work();
        if first_signal.is_none() && leftovers {
            let now = Instant::now();
            first_signal = Some(now);
            deadline
                .as_mut()
                .reset(now + inner.config.read().send_message_max_delay());
        }
    }

    debug!(process = id, "Run loop exited");
}

fn resend_timer(period: Duration) -> tokio::time::Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// Flush once; on an acknowledgment timeout reconnect and flush again.
pub(super) async fn flush_and_recover(inner: &Arc<ProcessInner>) {
    loop {
        match flush(inner).await {
            Ok(delivered) => {
                debug!(process = inner.id, delivered, "Batch delivered");
                return;
            }
            Err(ProcessError::AckTimeout { key }) => {
                warn!(process = inner.id, "No acknowledgment for '{}', reconnecting", key);
                if reconnect::recover(inner).await != LinkState::Connected {
                    inner.stop();
                    return;
                }
            }
            Err(ProcessError::NoWork) => return,
            Err(e) => {
                debug!(process = inner.id, "Flush skipped: {}", e);
                return;
            }
        }
    }
}

/// Send the next batch and wait for each acknowledgment in turn.
///
/// Returns the number of entries answered by the entity. Fails with
/// `AckTimeout` on the first entry left unanswered; that entry and the
/// unsent rest of the batch are back in Want when it does.
pub(super) async fn flush(inner: &Arc<ProcessInner>) -> Result<usize, ProcessError> {
    let _serial = inner.flushing.lock().await;

    if inner.shutdown.is_cancelled() {
        return Err(ProcessError::Shutdown(inner.id));
    }
    let link = inner
        .link
        .read()
        .clone()
        .ok_or(ProcessError::NotRegistered(inner.id))?;

    let (max_size, wait) = {
        let config = inner.config.read();
        (config.max_msg_size, config.wait_resp_interval())
    };

    let batch = inner.tracker.lock().take_batch(max_size);
    if batch.is_empty() {
        return Err(ProcessError::NoWork);
    }
    debug!(process = inner.id, entries = batch.len(), "Sending batch");

    let mut delivered = 0;
    let mut remaining = batch.into_iter();
    while let Some(entry) = remaining.next() {
        if let Err(e) = deliver(inner, &link, &entry, wait).await {
            let mut tracker = inner.tracker.lock();
            for unsent in remaining {
                tracker.resolve(&unsent, Outcome::Retry);
            }
            return Err(e);
        }
        delivered += 1;
    }
    Ok(delivered)
}

async fn deliver(
    inner: &Arc<ProcessInner>,
    link: &Link,
    entry: &Entry,
    wait: Duration,
) -> Result<(), ProcessError> {
    let id = inner.id;
    let timed_out = || ProcessError::AckTimeout {
        key: entry.key().to_string(),
    };

    let sent = tokio::select! {
        sent = link.tx.send(entry.to_message()) => sent.is_ok(),
        _ = inner.shutdown.cancelled() => return Err(ProcessError::Shutdown(id)),
    };
    if !sent {
        inner.tracker.lock().resolve(entry, Outcome::Retry);
        return Err(timed_out());
    }
    inner
        .tracker
        .lock()
        .record_sent_at(entry.key(), std::time::Instant::now());

    let (done_tx, mut done_rx) = oneshot::channel();
    let waiter = tokio::spawn({
        let inner = inner.clone();
        let entity = link.entity.clone();
        let entry = entry.clone();
        async move {
            let resp = entity.resp(id).await;
            let outcome = if resp.is_success() {
                Outcome::Success
            } else if let Some(reason) = resp.error() {
                Outcome::Fail(reason.to_string())
            } else {
                Outcome::Retry
            };
            inner.tracker.lock().resolve(&entry, outcome.clone());
            let _ = done_tx.send(outcome);
        }
    });

    let outcome = match tokio::time::timeout(wait, &mut done_rx).await {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(_)) => None,
        Err(_) => {
            waiter.abort();
            done_rx.try_recv().ok()
        }
    };

    match outcome {
        Some(Outcome::Fail(reason)) => {
            warn!(process = id, key = entry.key(), "Entry rejected: {}", reason);
            Ok(())
        }
        Some(_) => Ok(()),
        None => {
            inner.tracker.lock().resolve(entry, Outcome::Retry);
            Err(timed_out())
        }
    }
}
