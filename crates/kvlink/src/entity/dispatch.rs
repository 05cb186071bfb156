// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-session command loop.

use super::session::SessionGuard;
use super::store::KvStore;
use crate::message::Message;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Applies the commands of one session to the store and posts responses.
pub(crate) struct DispatchLoop {
    pub(crate) inbound: mpsc::Receiver<Message>,
    pub(crate) responses: mpsc::Sender<Message>,
    pub(crate) store: Arc<KvStore>,
    pub(crate) idle_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) guard: SessionGuard,
}

impl DispatchLoop {
    /// Run until the session goes idle, is cancelled, receives a bad command
    /// or loses its last sender. The slot is released when `self` drops.
    pub(crate) async fn run(mut self) {
        let id = self.guard.id();
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                received = self.inbound.recv() => {
                    let Some(msg) = received else {
                        debug!(process = id, "Session senders dropped");
                        break;
                    };

                    if let Err(e) = self.store.apply(&msg) {
                        warn!(process = id, "Rejected command: {}", e);
                        self.reply(Message::fail(e), idle.as_mut()).await;
                        break;
                    }

                    if !self.reply(Message::success(), idle.as_mut()).await {
                        break;
                    }
                    idle.as_mut().reset(Instant::now() + self.idle_timeout);
                }
                _ = &mut idle => {
                    debug!(process = id, "Session idle for {:?}, evicting", self.idle_timeout);
                    break;
                }
                _ = self.cancel.cancelled() => {
                    debug!(process = id, "Session cancelled");
                    break;
                }
            }
        }
    }

    /// Post `msg`, waiting for room in the response channel. A reader that
    /// stops draining does not keep the session past its idle deadline.
    async fn reply(&self, msg: Message, idle: Pin<&mut Sleep>) -> bool {
        tokio::select! {
            sent = self.responses.send(msg) => sent.is_ok(),
            _ = idle => {
                debug!(
                    process = self.guard.id(),
                    "Responses not drained for {:?}, evicting",
                    self.idle_timeout
                );
                false
            }
            _ = self.cancel.cancelled() => false,
        }
    }
}
