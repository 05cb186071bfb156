// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Key-value store owned by an entity.

use crate::message::{Message, Op, Record};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Reasons a command is rejected by a dispatch loop.
///
/// The text of these errors travels back to the producer in a `Fail`
/// response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("nil mes")]
    Malformed,

    #[error("undefined mes: {0}")]
    UnrecognizedOperation(Op),
}

/// Records indexed by key, guarded by one read/write lock.
#[derive(Debug, Default)]
pub struct KvStore {
    records: RwLock<HashMap<String, Record>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a command: `Add` upserts, `Delete` removes, `Ping` does nothing.
    pub fn apply(&self, msg: &Message) -> Result<(), CommandError> {
        let op = msg.op.ok_or(CommandError::Malformed)?;
        match op {
            Op::Add | Op::Delete if msg.record.key.is_empty() => Err(CommandError::Malformed),
            Op::Add => {
                self.upsert(msg.record.clone());
                Ok(())
            }
            Op::Delete => {
                self.remove(&msg.record.key);
                Ok(())
            }
            Op::Ping => Ok(()),
            Op::Success | Op::Fail => Err(CommandError::UnrecognizedOperation(op)),
        }
    }

    pub fn upsert(&self, record: Record) {
        self.records.write().insert(record.key.clone(), record);
    }

    pub fn remove(&self, key: &str) -> Option<Record> {
        self.records.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.records.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of all records, sorted by key.
    pub fn records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }
}

impl fmt::Display for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in self.records() {
            writeln!(f, "key: {}, data: {}", record.key, record.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_delete() {
        let store = KvStore::new();
        store.apply(&Message::add("n1", "is n1")).unwrap();
        assert_eq!(store.get("n1").unwrap().payload, "is n1");

        store.apply(&Message::add("n1", "is n1 again")).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("n1").unwrap().payload, "is n1 again");

        store.apply(&Message::delete("n1")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_missing_key_is_ok() {
        let store = KvStore::new();
        assert!(store.apply(&Message::delete("ghost")).is_ok());
    }

    #[test]
    fn test_ping_is_noop() {
        let store = KvStore::new();
        store.apply(&Message::ping()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejections() {
        let store = KvStore::new();
        assert_eq!(
            store.apply(&Message::empty()),
            Err(CommandError::Malformed)
        );
        assert_eq!(
            store.apply(&Message::add("", "orphan")),
            Err(CommandError::Malformed)
        );
        assert_eq!(
            store.apply(&Message::success()),
            Err(CommandError::UnrecognizedOperation(Op::Success))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_display_sorted() {
        let store = KvStore::new();
        store.upsert(Record::new("b", "2"));
        store.upsert(Record::new("a", "1"));
        assert_eq!(store.to_string(), "key: a, data: 1\nkey: b, data: 2\n");
    }
}
