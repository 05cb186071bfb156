// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reconnect state machine.
//!
//! ```text
//!  Connected ──ack timeout──► AwaitingReconnect ──connect ok──► Connected
//!                                    │
//!                                    └──budget spent──► ShuttingDown
//! ```

use super::{Link, ProcessInner};
use crate::entity::EntityError;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Session link state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    AwaitingReconnect,
    ShuttingDown,
}

/// Replace the session of `inner` after an acknowledgment timeout.
///
/// The old session is torn down first. Registration is attempted at once
/// and then every `reconnect_interval` until `max_waiting_connection` has
/// elapsed. Does not stop the process itself; callers act on
/// [`LinkState::ShuttingDown`].
pub(super) async fn recover(inner: &Arc<ProcessInner>) -> LinkState {
    let id = inner.id;
    let Some(entity) = inner.link.read().as_ref().map(|link| link.entity.clone()) else {
        return LinkState::ShuttingDown;
    };
    let (interval, budget) = {
        let config = inner.config.read();
        (config.reconnect_interval(), config.max_waiting_connection())
    };

    match entity.disconnect(id) {
        Ok(()) | Err(EntityError::NotConnected(_)) => {}
        Err(e) => debug!(process = id, "Teardown: {}", e),
    }

    let deadline = Instant::now() + budget;
    let mut attempts = 0u32;
    let mut state = LinkState::AwaitingReconnect;

    while state == LinkState::AwaitingReconnect {
        if inner.shutdown.is_cancelled() {
            state = LinkState::ShuttingDown;
            continue;
        }

        attempts += 1;
        match entity.connect(id) {
            Ok(tx) => {
                *inner.link.write() = Some(Link {
                    entity: entity.clone(),
                    tx,
                });
                info!(process = id, attempts, "Reconnected");
                state = LinkState::Connected;
            }
            Err(e) => {
                let now = Instant::now();
                if now >= deadline {
                    warn!(process = id, attempts, "Reconnect budget spent: {}", e);
                    state = LinkState::ShuttingDown;
                    continue;
                }
                warn!(process = id, attempts, "Reconnect failed: {}", e);

                let pause = interval.min(deadline - now);
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = inner.shutdown.cancelled() => state = LinkState::ShuttingDown,
                }
            }
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityConfig, ProcessConfig};
    use crate::entity::Entity;
    use crate::process::Process;
    use std::time::Duration;

    fn config() -> ProcessConfig {
        ProcessConfig::default()
            .with_send_message_max_delay(Duration::from_secs(60))
            .with_resend_interval(Duration::from_secs(60))
            .with_reconnect_interval(Duration::from_millis(10))
            .with_max_waiting_connection(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_recover_replaces_session() {
        let ent = Entity::new(EntityConfig::default()).unwrap();
        let process = Process::new(2, config()).unwrap();
        process.registration(&ent).unwrap();

        assert_eq!(recover(&process.inner).await, LinkState::Connected);
        assert!(ent.is_connected(2));
    }

    #[tokio::test]
    async fn test_recover_waits_for_free_slot() {
        let ent = Entity::new(EntityConfig::default().with_max_sessions(1)).unwrap();
        let process = Process::new(2, config()).unwrap();
        process.registration(&ent).unwrap();

        // Hand the only slot to another process for a while.
        ent.disconnect(2).unwrap();
        ent.connect(7).unwrap();
        let squatter = tokio::spawn({
            let ent = ent.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ent.disconnect(7).unwrap();
            }
        });

        let state = recover(&process.inner).await;
        squatter.await.unwrap();
        assert_eq!(state, LinkState::Connected);
        assert!(ent.is_connected(2));
    }

    #[tokio::test]
    async fn test_recover_gives_up_after_budget() {
        let ent = Entity::new(EntityConfig::default()).unwrap();
        let process = Process::new(2, config()).unwrap();
        process.registration(&ent).unwrap();
        ent.shutdown();

        let started = Instant::now();
        assert_eq!(recover(&process.inner).await, LinkState::ShuttingDown);
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_recover_without_link() {
        let process = Process::new(2, config()).unwrap();
        assert_eq!(recover(&process.inner).await, LinkState::ShuttingDown);
    }
}
