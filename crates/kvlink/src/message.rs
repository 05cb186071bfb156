// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages exchanged between processes and the entity.
//!
//! A [`Message`] is a flat record: an operation tag plus a key/payload pair.
//! Commands (`Add`, `Delete`, `Ping`) flow from a process into a session;
//! responses (`Success`, `Fail`) flow back. A message without an operation
//! tag is the empty message, returned when no answer arrived in time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Upsert `key -> payload`.
    Add,
    /// Remove `key`.
    Delete,
    /// Keep-alive, no effect on the store.
    Ping,
    /// Command applied.
    Success,
    /// Command rejected, payload holds the reason.
    Fail,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Ping => "ping",
            Self::Success => "success",
            Self::Fail => "fail",
        };
        f.write_str(name)
    }
}

/// Key/payload pair, as stored by the entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub payload: String,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// One unit of work queued by a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    op: Option<Op>,
    record: Record,
}

impl Entry {
    /// Entry that upserts `key`.
    pub fn add(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(Some(Op::Add), Record::new(key, payload))
    }

    /// Entry that removes `key`.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(Some(Op::Delete), Record::new(key, ""))
    }

    pub(crate) fn new(op: Option<Op>, record: Record) -> Self {
        Self { op, record }
    }

    pub fn key(&self) -> &str {
        &self.record.key
    }

    pub fn payload(&self) -> &str {
        &self.record.payload
    }

    pub fn op(&self) -> Option<Op> {
        self.op
    }

    /// Payload size in bytes, used for batch accounting.
    pub fn size(&self) -> usize {
        self.record.payload.len()
    }

    /// An entry is empty only when its payload is empty *and* it carries no
    /// recognized operation. A `Delete` (empty payload) is never empty.
    pub fn is_empty(&self) -> bool {
        self.record.payload.is_empty() && self.op.is_none()
    }

    /// Wire form of this entry.
    pub fn to_message(&self) -> Message {
        Message {
            op: self.op,
            record: self.record.clone(),
        }
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Some(op) => write!(f, "op: {}, key: {}, data: {}", op, self.key(), self.payload()),
            None => write!(f, "op: -, key: {}, data: {}", self.key(), self.payload()),
        }
    }
}

/// Wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub op: Option<Op>,
    #[serde(default)]
    pub record: Record,
}

impl Message {
    pub fn add(key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            op: Some(Op::Add),
            record: Record::new(key, payload),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op: Some(Op::Delete),
            record: Record::new(key, ""),
        }
    }

    pub fn ping() -> Self {
        Self {
            op: Some(Op::Ping),
            record: Record::default(),
        }
    }

    pub fn success() -> Self {
        Self {
            op: Some(Op::Success),
            record: Record::default(),
        }
    }

    /// Failure response; the error text travels in the payload.
    pub fn fail(err: impl fmt::Display) -> Self {
        Self {
            op: Some(Op::Fail),
            record: Record::new("", err.to_string()),
        }
    }

    /// The empty message ("no answer").
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.op.is_none()
    }

    pub fn is_success(&self) -> bool {
        self.op == Some(Op::Success)
    }

    pub fn is_fail(&self) -> bool {
        self.op == Some(Op::Fail)
    }

    /// Failure text of a `Fail` response.
    pub fn error(&self) -> Option<&str> {
        self.is_fail().then_some(self.record.payload.as_str())
    }

    pub fn size(&self) -> usize {
        self.record.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_constructors() {
        let add = Entry::add("k1", "v1");
        assert_eq!(add.op(), Some(Op::Add));
        assert_eq!(add.key(), "k1");
        assert_eq!(add.size(), 2);

        let del = Entry::delete("k1");
        assert_eq!(del.op(), Some(Op::Delete));
        assert_eq!(del.payload(), "");
    }

    #[test]
    fn test_entry_emptiness_is_op_based() {
        // Known quirk: a Delete carries no payload but is still not empty.
        assert!(!Entry::delete("k").is_empty());
        assert!(!Entry::add("k", "").is_empty());
        assert!(Entry::new(None, Record::new("k", "")).is_empty());
        assert!(!Entry::new(None, Record::new("k", "data")).is_empty());
    }

    #[test]
    fn test_fail_carries_error_text() {
        let msg = Message::fail("nil mes");
        assert!(msg.is_fail());
        assert_eq!(msg.error(), Some("nil mes"));
        assert_eq!(msg.record.key, "");
        assert_eq!(Message::success().error(), None);
    }

    #[test]
    fn test_empty_message() {
        let msg = Message::empty();
        assert!(msg.is_empty());
        assert!(!msg.is_success());
        assert!(!msg.is_fail());
        assert!(!Message::ping().is_empty());
    }

    #[test]
    fn test_entry_to_message() {
        let msg = Entry::add("n1", "is n1").to_message();
        assert_eq!(msg, Message::add("n1", "is n1"));
        assert_eq!(msg.size(), 5);
    }

    #[test]
    fn test_entry_display() {
        let entry = Entry::add("k", "v");
        assert_eq!(entry.to_string(), "op: add, key: k, data: v");
    }
}
