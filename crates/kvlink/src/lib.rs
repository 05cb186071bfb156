// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! kvlink: acknowledged delivery from producer processes to a key-value entity
//!
//! Producers ("processes") queue writes and deletes without blocking. Each
//! entry is tracked until the entity acknowledges it, resent when it is not,
//! and parked with its failure reason when the entity rejects it. The entity
//! admits a bounded number of sessions and evicts idle ones.
//!
//! # Features
//!
//! - **Session admission**: bounded session table, duplicate detection, idle eviction
//! - **Acknowledgment tracking**: Want / Sent / Undefined lists per process
//! - **Batching**: size-bounded batches, cutoff and max-delay triggers
//! - **Reconnect**: bounded retry after an acknowledgment timeout
//!
//! # Quick Start
//!
//! ```no_run
//! use kvlink::{Entity, EntityConfig, ProcessConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let entity = Entity::new(EntityConfig::default())?;
//! let process = kvlink::with_entity(1, &entity, ProcessConfig::default())?;
//!
//! process.add("n1", "is n1")?;
//! process.delete("n0")?;
//! process.flush().await?;
//!
//! print!("{}", entity);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [entity]
//! max_sessions = 10
//! session_idle_timeout_ms = 10000
//!
//! [process]
//! max_msg_size = 50
//! send_msg_cutoff = 150
//! ```

use std::future::Future;

pub mod config;
pub mod entity;
pub mod message;
pub mod process;

pub use config::{ConfigError, EntityConfig, KvlinkConfig, ProcessConfig};
pub use entity::{CommandError, Entity, EntityError, KvStore};
pub use message::{Entry, Message, Op, Record};
pub use process::{LinkState, Process, ProcessError, QueueClosed, TrackerSnapshot};

/// Identifier of a producer process.
pub type ProcessId = u32;

/// Create a process and start it against `entity`.
pub fn with_entity(
    id: ProcessId,
    entity: &Entity,
    config: ProcessConfig,
) -> Result<Process, ProcessError> {
    let process = Process::new(id, config)?;
    process.start(entity)?;
    Ok(process)
}

/// Create and start a process, then run `f` with it on a new task.
///
/// The process is shut down once the future returned by `f` completes.
pub fn with_process_fn<F, Fut>(
    id: ProcessId,
    entity: &Entity,
    config: ProcessConfig,
    f: F,
) -> Result<Process, ProcessError>
where
    F: FnOnce(Process) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let process = with_entity(id, entity, config)?;
    let work = f(process.clone());
    let handle = process.clone();
    tokio::spawn(async move {
        work.await;
        handle.shutdown();
    });
    Ok(process)
}

/// Shut down every process in `processes`.
pub fn shutdown_all(processes: &[Process]) {
    for process in processes {
        process.shutdown();
    }
}
