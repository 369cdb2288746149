// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded, priority-aware admission queue for batch submissions.
//!
//! The job orchestrator's cache map is the sole writable global once a
//! submission is admitted (see the concurrency model); this queue sits in
//! front of admission so a burst of `submitBatch` calls cannot exceed the
//! configured executor concurrency.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Priority levels for queued submissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// A submit-one-shot request waiting for admission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedSubmission {
    /// Batch key this submission will be registered under.
    pub batch_key: String,
    /// Owning job header identifier.
    pub job_id: String,
    pub priority: JobPriority,
    /// Monotonic sequence number assigned at enqueue time, used to break
    /// priority ties in FIFO order.
    pub sequence: u64,
}

/// Errors returned by [`SubmitQueue`] operations.
#[derive(Debug)]
pub enum QueueError {
    Full { max: usize },
    DuplicateId(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full { max } => write!(f, "submit queue is full (max {max})"),
            QueueError::DuplicateId(id) => write!(f, "duplicate queued batch key: {id}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// Snapshot statistics for a [`SubmitQueue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub max: usize,
    pub by_priority: BTreeMap<String, usize>,
}

/// A bounded, priority-aware queue of submissions awaiting admission to
/// the batch executor. [`dequeue`](SubmitQueue::dequeue) returns the
/// highest-priority item first; among items of equal priority the oldest
/// (FIFO) item is returned.
pub struct SubmitQueue {
    entries: Vec<QueuedSubmission>,
    max_size: usize,
    next_sequence: u64,
}

impl SubmitQueue {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_size,
            next_sequence: 0,
        }
    }

    /// Enqueue a submission. Returns an error if the queue is full or the
    /// batch key is already queued.
    pub fn enqueue(
        &mut self,
        batch_key: String,
        job_id: String,
        priority: JobPriority,
    ) -> Result<(), QueueError> {
        if self.entries.len() >= self.max_size {
            return Err(QueueError::Full { max: self.max_size });
        }
        if self.entries.iter().any(|e| e.batch_key == batch_key) {
            return Err(QueueError::DuplicateId(batch_key));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push(QueuedSubmission {
            batch_key,
            job_id,
            priority,
            sequence,
        });
        Ok(())
    }

    /// Remove and return the highest-priority, oldest-queued submission.
    pub fn dequeue(&mut self) -> Option<QueuedSubmission> {
        let idx = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.priority, std::cmp::Reverse(e.sequence)))
            .map(|(i, _)| i)?;
        Some(self.entries.remove(idx))
    }

    #[must_use]
    pub fn peek(&self) -> Option<&QueuedSubmission> {
        self.entries
            .iter()
            .max_by_key(|e| (e.priority, std::cmp::Reverse(e.sequence)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    pub fn remove(&mut self, batch_key: &str) -> Option<QueuedSubmission> {
        let pos = self.entries.iter().position(|e| e.batch_key == batch_key)?;
        Some(self.entries.remove(pos))
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut by_priority = BTreeMap::new();
        for entry in &self.entries {
            let key = match entry.priority {
                JobPriority::Low => "low",
                JobPriority::Normal => "normal",
                JobPriority::High => "high",
                JobPriority::Critical => "critical",
            };
            *by_priority.entry(key.to_string()).or_insert(0usize) += 1;
        }
        QueueStats {
            total: self.entries.len(),
            max: self.max_size,
            by_priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeues_highest_priority_first() {
        let mut q = SubmitQueue::new(10);
        q.enqueue("b1".into(), "j1".into(), JobPriority::Normal).unwrap();
        q.enqueue("b2".into(), "j2".into(), JobPriority::Critical).unwrap();
        q.enqueue("b3".into(), "j3".into(), JobPriority::Low).unwrap();
        assert_eq!(q.dequeue().unwrap().batch_key, "b2");
        assert_eq!(q.dequeue().unwrap().batch_key, "b1");
        assert_eq!(q.dequeue().unwrap().batch_key, "b3");
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn fifo_within_same_priority() {
        let mut q = SubmitQueue::new(10);
        q.enqueue("first".into(), "j1".into(), JobPriority::Normal).unwrap();
        q.enqueue("second".into(), "j2".into(), JobPriority::Normal).unwrap();
        assert_eq!(q.dequeue().unwrap().batch_key, "first");
        assert_eq!(q.dequeue().unwrap().batch_key, "second");
    }

    #[test]
    fn rejects_duplicate_and_full() {
        let mut q = SubmitQueue::new(1);
        q.enqueue("b1".into(), "j1".into(), JobPriority::Normal).unwrap();
        assert!(matches!(
            q.enqueue("b1".into(), "j1".into(), JobPriority::Normal),
            Err(QueueError::Full { .. })
        ));
        let mut q2 = SubmitQueue::new(10);
        q2.enqueue("b1".into(), "j1".into(), JobPriority::Normal).unwrap();
        assert!(matches!(
            q2.enqueue("b1".into(), "j2".into(), JobPriority::Normal),
            Err(QueueError::DuplicateId(_))
        ));
    }
}
