// SPDX-License-Identifier: MIT OR Apache-2.0
use trac_queue::{JobPriority, QueueError, QueueStats, QueuedSubmission, SubmitQueue};

#[test]
fn new_queue_is_empty() {
    let q = SubmitQueue::new(10);
    assert!(q.is_empty());
    assert_eq!(q.len(), 0);
}

#[test]
fn enqueue_increments_len() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("b1".into(), "j1".into(), JobPriority::Normal).unwrap();
    assert_eq!(q.len(), 1);
    assert!(!q.is_empty());
}

#[test]
fn dequeue_returns_none_when_empty() {
    let mut q = SubmitQueue::new(10);
    assert!(q.dequeue().is_none());
}

#[test]
fn peek_does_not_remove() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("b1".into(), "j1".into(), JobPriority::Normal).unwrap();
    assert!(q.peek().is_some());
    assert_eq!(q.len(), 1);
}

#[test]
fn peek_returns_highest_priority() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("low".into(), "j1".into(), JobPriority::Low).unwrap();
    q.enqueue("high".into(), "j2".into(), JobPriority::High).unwrap();
    assert_eq!(q.peek().unwrap().batch_key, "high");
}

#[test]
fn is_full_when_at_capacity() {
    let mut q = SubmitQueue::new(2);
    q.enqueue("a".into(), "j1".into(), JobPriority::Normal).unwrap();
    q.enqueue("b".into(), "j2".into(), JobPriority::Normal).unwrap();
    assert!(q.is_full());
}

#[test]
fn enqueue_full_returns_error() {
    let mut q = SubmitQueue::new(1);
    q.enqueue("a".into(), "j1".into(), JobPriority::Normal).unwrap();
    let err = q.enqueue("b".into(), "j2".into(), JobPriority::Normal).unwrap_err();
    match err {
        QueueError::Full { max } => assert_eq!(max, 1),
        other => panic!("expected Full, got {other:?}"),
    }
}

#[test]
fn enqueue_duplicate_batch_key_returns_error() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("dup".into(), "j1".into(), JobPriority::Normal).unwrap();
    let err = q.enqueue("dup".into(), "j2".into(), JobPriority::High).unwrap_err();
    match err {
        QueueError::DuplicateId(id) => assert_eq!(id, "dup"),
        other => panic!("expected DuplicateId, got {other:?}"),
    }
}

#[test]
fn remove_by_batch_key() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("a".into(), "j1".into(), JobPriority::Normal).unwrap();
    q.enqueue("b".into(), "j2".into(), JobPriority::High).unwrap();
    let removed = q.remove("a").unwrap();
    assert_eq!(removed.batch_key, "a");
    assert_eq!(q.len(), 1);
}

#[test]
fn remove_missing_returns_none() {
    let mut q = SubmitQueue::new(10);
    assert!(q.remove("nope").is_none());
}

#[test]
fn stats_reports_counts_by_priority() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("a".into(), "j1".into(), JobPriority::Low).unwrap();
    q.enqueue("b".into(), "j2".into(), JobPriority::Low).unwrap();
    q.enqueue("c".into(), "j3".into(), JobPriority::High).unwrap();
    let stats = q.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.max, 10);
    assert_eq!(stats.by_priority.get("low"), Some(&2));
    assert_eq!(stats.by_priority.get("high"), Some(&1));
    assert_eq!(stats.by_priority.get("critical"), None);
}

#[test]
fn full_drain_order() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("lo".into(), "j1".into(), JobPriority::Low).unwrap();
    q.enqueue("norm".into(), "j2".into(), JobPriority::Normal).unwrap();
    q.enqueue("hi".into(), "j3".into(), JobPriority::High).unwrap();
    q.enqueue("crit".into(), "j4".into(), JobPriority::Critical).unwrap();
    let order: Vec<String> = std::iter::from_fn(|| q.dequeue()).map(|e| e.batch_key).collect();
    assert_eq!(order, vec!["crit", "hi", "norm", "lo"]);
}

#[test]
fn queue_error_display_full() {
    let err = QueueError::Full { max: 5 };
    assert_eq!(err.to_string(), "submit queue is full (max 5)");
}

#[test]
fn queue_error_display_duplicate() {
    let err = QueueError::DuplicateId("x".to_string());
    assert_eq!(err.to_string(), "duplicate queued batch key: x");
}

#[test]
fn job_priority_ordering() {
    assert!(JobPriority::Low < JobPriority::Normal);
    assert!(JobPriority::Normal < JobPriority::High);
    assert!(JobPriority::High < JobPriority::Critical);
}

#[test]
fn queued_submission_serialization_roundtrip() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("rt".into(), "j1".into(), JobPriority::High).unwrap();
    let entry = q.peek().unwrap().clone();
    let json = serde_json::to_string(&entry).unwrap();
    let back: QueuedSubmission = serde_json::from_str(&json).unwrap();
    assert_eq!(back.batch_key, "rt");
    assert_eq!(back.priority, JobPriority::High);
}

#[test]
fn stats_serialization_roundtrip() {
    let mut q = SubmitQueue::new(5);
    q.enqueue("a".into(), "j1".into(), JobPriority::Normal).unwrap();
    let stats = q.stats();
    let json = serde_json::to_string(&stats).unwrap();
    let back: QueueStats = serde_json::from_str(&json).unwrap();
    assert_eq!(back.total, 1);
    assert_eq!(back.max, 5);
}

#[test]
fn enqueue_after_dequeue_respects_capacity() {
    let mut q = SubmitQueue::new(1);
    q.enqueue("a".into(), "j1".into(), JobPriority::Normal).unwrap();
    assert!(q.is_full());
    q.dequeue();
    assert!(!q.is_full());
    q.enqueue("b".into(), "j2".into(), JobPriority::Normal).unwrap();
    assert_eq!(q.len(), 1);
}

#[test]
fn job_id_is_preserved_independently_of_batch_key() {
    let mut q = SubmitQueue::new(10);
    q.enqueue("batch-1".into(), "job-1".into(), JobPriority::Normal).unwrap();
    let got = q.dequeue().unwrap();
    assert_eq!(got.batch_key, "batch-1");
    assert_eq!(got.job_id, "job-1");
}
