// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! End-to-end delivery between processes and an entity.

use kvlink::{Entity, EntityConfig, EntityError, Process, ProcessConfig, ProcessError};
use std::time::Duration;

/// Poll `cond` every 5 ms for up to 3 s.
async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Flushes on its own shortly after each write.
fn eager() -> ProcessConfig {
    ProcessConfig::default()
        .with_send_message_max_delay(Duration::from_millis(20))
        .with_resend_interval(Duration::from_millis(200))
        .with_wait_resp_interval(Duration::from_millis(500))
        .with_reconnect_interval(Duration::from_millis(10))
}

/// Only flushes when asked.
fn manual() -> ProcessConfig {
    ProcessConfig::default()
        .with_send_message_max_delay(Duration::from_secs(60))
        .with_resend_interval(Duration::from_secs(60))
        .with_wait_resp_interval(Duration::from_millis(500))
        .with_reconnect_interval(Duration::from_millis(10))
}

/// Nothing waiting and nothing in flight.
fn settled(process: &Process) -> bool {
    let snap = process.snapshot();
    snap.want.is_empty() && snap.sent.is_empty()
}

fn entity() -> Entity {
    Entity::new(EntityConfig::default()).unwrap()
}

#[tokio::test]
async fn test_add_then_delete_leaves_n1() {
    let ent = entity();
    let process = kvlink::with_entity(1, &ent, eager()).unwrap();

    process.add("n1", "is n1").unwrap();
    process.add("n2", "is n2").unwrap();
    process.add("n3", "is n3").unwrap();
    assert!(wait_until(|| ent.len() == 3 && settled(&process)).await);

    process.delete("n2").unwrap();
    process.delete("n3").unwrap();
    assert!(wait_until(|| ent.len() == 1).await);

    assert_eq!(ent.get("n1").unwrap().payload, "is n1");
    assert_eq!(ent.to_string(), "key: n1, data: is n1\n");
    assert!(wait_until(|| settled(&process)).await);
}

#[tokio::test]
async fn test_first_writer_wins_until_resolved() {
    let ent = entity();
    let process = kvlink::with_entity(1, &ent, manual()).unwrap();

    process.add("k", "first").unwrap();
    process.add("k", "second").unwrap();
    assert_eq!(process.flush().await.unwrap(), 1);
    assert_eq!(ent.get("k").unwrap().payload, "first");

    // Resolved: the key accepts a new write.
    process.add("k", "third").unwrap();
    assert_eq!(process.flush().await.unwrap(), 1);
    assert_eq!(ent.get("k").unwrap().payload, "third");
}

#[tokio::test]
async fn test_batches_respect_size_limit() {
    let ent = entity();
    let process = kvlink::with_entity(1, &ent, manual().with_max_msg_size(20)).unwrap();

    for i in 0..6 {
        process.add(format!("k{}", i), "0123456789").unwrap();
    }

    // Each batch closes on the entry that crosses 20 bytes: 10 + 10 + 10.
    let mut batches = Vec::new();
    loop {
        match process.flush().await {
            Ok(n) => batches.push(n),
            Err(ProcessError::NoWork) => break,
            Err(e) => panic!("unexpected flush error: {}", e),
        }
    }
    assert_eq!(batches, vec![3, 3]);
    assert_eq!(ent.len(), 6);
}

#[tokio::test]
async fn test_session_limit_and_release() {
    let ent = Entity::new(EntityConfig::default().with_max_sessions(2)).unwrap();

    let p1 = kvlink::with_entity(1, &ent, manual()).unwrap();
    let p2 = kvlink::with_entity(2, &ent, manual()).unwrap();
    assert!(matches!(
        kvlink::with_entity(3, &ent, manual()),
        Err(ProcessError::Entity(EntityError::CapacityExceeded { limit: 2 }))
    ));

    kvlink::shutdown_all(&[p1, p2.clone()]);
    assert!(wait_until(|| ent.session_count() == 0).await);
    assert!(p2.is_shutdown());

    let p3 = kvlink::with_entity(3, &ent, manual()).unwrap();
    p3.add("from", "three").unwrap();
    assert_eq!(p3.flush().await.unwrap(), 1);
}

#[tokio::test]
async fn test_reconnects_after_idle_eviction() {
    let ent = Entity::new(
        EntityConfig::default().with_session_idle_timeout(Duration::from_millis(50)),
    )
    .unwrap();
    let process = kvlink::with_entity(4, &ent, eager()).unwrap();

    assert!(wait_until(|| !ent.is_connected(4)).await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    process.add("after", "eviction").unwrap();
    assert!(wait_until(|| ent.contains("after")).await);
    assert!(!process.is_shutdown());
}

#[tokio::test]
async fn test_reconnect_budget_exhaustion_stops_process() {
    let ent = entity();
    let config = eager().with_max_waiting_connection(Duration::from_millis(50));
    let process = kvlink::with_entity(5, &ent, config).unwrap();

    ent.shutdown();
    process.add("never", "stored").unwrap();

    assert!(wait_until(|| process.is_shutdown()).await);
    tokio::time::timeout(Duration::from_secs(1), process.closed())
        .await
        .unwrap();

    assert!(matches!(
        process.add("late", "write"),
        Err(ProcessError::Shutdown(5))
    ));
    assert!(!ent.contains("never"));
}

#[tokio::test]
async fn test_rejected_entry_parks_in_undefined() {
    let ent = entity();
    let process = kvlink::with_entity(6, &ent, manual()).unwrap();

    process.add("", "orphan").unwrap();
    assert_eq!(process.flush().await.unwrap(), 1);

    let snap = process.snapshot();
    assert_eq!(snap.undefined.len(), 1);
    assert_eq!(snap.undefined[0].reason, "nil mes");
    assert_eq!(snap.undefined[0].entry.payload(), "orphan");
    assert!(snap.want.is_empty() && snap.sent.is_empty());

    // The rejection ended the session; the next write gets through anyway.
    process.add("k", "v").unwrap();
    for _ in 0..5 {
        if ent.contains("k") {
            break;
        }
        match process.flush().await {
            Ok(_) | Err(ProcessError::AckTimeout { .. }) | Err(ProcessError::NoWork) => {}
            Err(e) => panic!("unexpected flush error: {}", e),
        }
    }
    assert!(ent.contains("k"));
    assert!(process.snapshot().undefined_contains(""));
}

#[tokio::test]
async fn test_with_process_fn_shuts_down_when_done() {
    let ent = entity();
    let process = kvlink::with_process_fn(7, &ent, manual(), |p: Process| async move {
        p.add("short", "lived").unwrap();
    })
    .unwrap();

    assert!(wait_until(|| process.is_shutdown()).await);
    assert!(wait_until(|| !ent.is_connected(7)).await);
}

#[tokio::test]
async fn test_many_writers() {
    let ent = entity();
    let writers: Vec<Process> = (0..4)
        .map(|id| kvlink::with_entity(id, &ent, eager()).unwrap())
        .collect();

    for writer in &writers {
        for n in 0..5 {
            let key = format!("proc {}, num {}", writer.id(), n);
            writer.add(key.clone(), key).unwrap();
        }
    }

    assert!(wait_until(|| ent.len() == 20).await);
    assert_eq!(
        ent.get("proc 3, num 4").unwrap().payload,
        "proc 3, num 4"
    );

    kvlink::shutdown_all(&writers);
    for writer in &writers {
        writer.closed().await;
    }
    assert_eq!(ent.session_count(), 0);
}
