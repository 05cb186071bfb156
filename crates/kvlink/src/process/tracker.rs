// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Acknowledgment tracker.
//!
//! Three lists keyed by entry key:
//!
//! ```text
//!  ingest ──► Want ──batch──► Sent ──Success──► (removed)
//!              ▲               │
//!              └──timeout/nil──┤
//!                              └──Fail──► Undefined
//! ```
//!
//! The tracker is not synchronized itself; the owning process wraps it in a
//! single lock so every multi-list transition is atomic.

use crate::message::Entry;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

/// Key → entry map that remembers insertion order.
#[derive(Debug, Default)]
pub struct Wantlist {
    set: HashMap<String, (u64, Entry)>,
    seq: u64,
}

impl Wantlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Insert `entry` unless its key already holds a non-empty entry.
    pub fn add(&mut self, entry: Entry) -> bool {
        if let Some((_, existing)) = self.set.get(entry.key()) {
            if !existing.is_empty() {
                return false;
            }
        }
        self.put(entry);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<Entry> {
        self.set.remove(key).map(|(_, e)| e)
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.set.get(key).map(|(_, e)| e)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains_key(key)
    }

    /// Entries ordered by payload size (largest first), ties by insertion.
    pub fn entries(&self) -> Vec<Entry> {
        let mut ordered: Vec<&(u64, Entry)> = self.set.values().collect();
        ordered.sort_by(|(seq_a, a), (seq_b, b)| b.size().cmp(&a.size()).then(seq_a.cmp(seq_b)));
        ordered.into_iter().map(|(_, e)| e.clone()).collect()
    }

    /// Move every entry of `other` into `self`, honoring `add` semantics.
    pub fn absorb(&mut self, other: &mut Wantlist) -> usize {
        let mut moved = 0;
        for entry in other.entries() {
            other.remove(entry.key());
            if self.add(entry) {
                moved += 1;
            }
        }
        moved
    }

    fn put(&mut self, entry: Entry) {
        self.seq += 1;
        self.set.insert(entry.key().to_string(), (self.seq, entry));
    }
}

impl fmt::Display for Wantlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.entries() {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// How the far side answered one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Applied: forget the key.
    Success,
    /// Rejected with a reason: park the entry in Undefined.
    Fail(String),
    /// No usable answer: send the entry again later.
    Retry,
}

/// An entry the entity refused, with the reason it gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub entry: Entry,
    pub reason: String,
}

/// Point-in-time copy of the tracker lists.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub want: Vec<Entry>,
    pub sent: Vec<Entry>,
    pub undefined: Vec<Rejected>,
}

impl TrackerSnapshot {
    pub fn want_contains(&self, key: &str) -> bool {
        self.want.iter().any(|e| e.key() == key)
    }

    pub fn sent_contains(&self, key: &str) -> bool {
        self.sent.iter().any(|e| e.key() == key)
    }

    pub fn undefined_contains(&self, key: &str) -> bool {
        self.undefined.iter().any(|r| r.entry.key() == key)
    }
}

/// Want / Sent / Undefined lists plus send timestamps.
#[derive(Debug, Default)]
pub struct Tracker {
    want: Wantlist,
    sent: Wantlist,
    undefined: Wantlist,
    reasons: HashMap<String, String>,
    sent_at: HashMap<String, Instant>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a freshly produced entry.
    ///
    /// The first writer of a key wins until that key resolves: a pending
    /// non-empty entry in Want or Sent makes the new one a no-op. An empty
    /// entry found under the key is purged first. Re-adding a key parked in
    /// Undefined clears it from there.
    pub fn ingest(&mut self, entry: Entry) -> bool {
        let key = entry.key().to_string();

        if let Some(existing) = self.want.get(&key) {
            if !existing.is_empty() {
                return false;
            }
            self.remove(&key);
        }
        if let Some(existing) = self.sent.get(&key) {
            if !existing.is_empty() {
                return false;
            }
            self.remove(&key);
        }

        if self.undefined.remove(&key).is_some() {
            self.reasons.remove(&key);
        }
        self.want.add(entry)
    }

    /// Forget `key` in Want and Sent.
    pub fn remove(&mut self, key: &str) {
        self.want.remove(key);
        self.sent.remove(key);
        self.sent_at.remove(key);
    }

    /// Move `key` from Want to Sent.
    pub fn mark_sent(&mut self, key: &str) -> Option<Entry> {
        let entry = self.want.remove(key)?;
        self.sent.remove(key);
        self.sent.add(entry.clone());
        Some(entry)
    }

    /// Build the next batch.
    ///
    /// Entries leave Want largest payload first and move into Sent. The
    /// batch closes after the entry that pushes the running payload total
    /// past `max_size`; that entry is part of the batch.
    pub fn take_batch(&mut self, max_size: usize) -> Vec<Entry> {
        let mut batch = Vec::new();
        let mut total = 0;

        for candidate in self.want.entries() {
            let Some(entry) = self.mark_sent(candidate.key()) else {
                continue;
            };
            total += entry.size();
            batch.push(entry);
            if total > max_size {
                break;
            }
        }
        batch
    }

    /// Stamp the first send attempt of `key`.
    pub fn record_sent_at(&mut self, key: &str, at: Instant) {
        if self.sent.contains(key) {
            self.sent_at.entry(key.to_string()).or_insert(at);
        }
    }

    pub fn sent_at(&self, key: &str) -> Option<Instant> {
        self.sent_at.get(key).copied()
    }

    /// Apply the answer for `entry`.
    ///
    /// Ignored when the key no longer tracks this exact entry, so a late
    /// answer cannot resolve a newer write of the same key.
    pub fn resolve(&mut self, entry: &Entry, outcome: Outcome) {
        let key = entry.key();
        let tracked = self.sent.get(key).or_else(|| self.want.get(key));
        if tracked != Some(entry) {
            return;
        }

        self.sent_at.remove(key);
        match outcome {
            Outcome::Success => self.remove(key),
            Outcome::Fail(reason) => {
                self.remove(key);
                self.undefined.remove(key);
                self.undefined.add(entry.clone());
                self.reasons.insert(key.to_string(), reason);
            }
            Outcome::Retry => {
                self.sent.remove(key);
                self.want.add(entry.clone());
            }
        }
    }

    /// Put every stranded Sent entry back into Want.
    pub fn transfer_sent(&mut self) -> usize {
        if self.sent.is_empty() {
            return 0;
        }
        self.sent_at.clear();
        self.want.absorb(&mut self.sent)
    }

    pub fn pending_count(&self) -> usize {
        self.want.len()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.want.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.sent.len()
    }

    pub fn undefined_count(&self) -> usize {
        self.undefined.len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            want: self.want.entries(),
            sent: self.sent.entries(),
            undefined: self
                .undefined
                .entries()
                .into_iter()
                .map(|entry| Rejected {
                    reason: self.reasons.get(entry.key()).cloned().unwrap_or_default(),
                    entry,
                })
                .collect(),
        }
    }
}

impl fmt::Display for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Want:")?;
        write!(f, "{}", self.want)?;
        writeln!(f, "Sent:")?;
        write!(f, "{}", self.sent)?;
        writeln!(f, "Undefined:")?;
        write!(f, "{}", self.undefined)?;
        writeln!(f, "SentAt:")?;
        let mut stamps: Vec<_> = self.sent_at.iter().collect();
        stamps.sort_by(|a, b| a.0.cmp(b.0));
        for (key, at) in stamps {
            writeln!(f, "key: {}, elapsed: {:?}", key, at.elapsed())?;
        }
        Ok(())
    }
}
