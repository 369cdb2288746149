// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ticketed, revision-versioned cache of in-flight job state.
//!
//! Each key owns a single [`CacheEntry`] guarded by at most one LIVE,
//! unexpired [`CacheTicket`] at a time. Mutations require a ticket whose
//! `(key, revision)` matches the entry; `deleteEntry` soft-deletes so
//! concurrent readers still observe a consistent shape until the holding
//! ticket closes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

const SHARD_COUNT: usize = 16;

/// Upper bound on any granted ticket's lease (spec invariant 3: "ticket
/// duration has a fixed maximum... enforced at grant time").
pub const MAX_TICKET_DURATION: Duration = Duration::seconds(300);

fn clamp_ticket_duration(dur: Duration) -> Duration {
    if dur > MAX_TICKET_DURATION {
        MAX_TICKET_DURATION
    } else {
        dur
    }
}

/// Outcome of `openNewTicket`/`openTicket`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketOutcome {
    /// No such key/revision exists.
    Missing,
    /// A different ticket holds the lease, or the revision has moved on.
    Superseded,
    /// Lease granted.
    Live(CacheTicket),
}

/// A capability granted for a bounded duration against `(key, revision)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheTicket {
    pub ticket_id: Uuid,
    pub key: String,
    pub revision: u64,
    pub granted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl CacheTicket {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Lifecycle status of a [`CacheEntry`]'s value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Deleted,
}

/// A single cached job-state record.
#[derive(Debug, Clone)]
struct Entry {
    revision: u64,
    status: EntryStatus,
    value: Option<Value>,
    last_activity: DateTime<Utc>,
    ticket: Option<CacheTicket>,
}

/// A snapshot of a cache entry returned to callers, independent of the
/// internal lock representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub revision: u64,
    pub status: EntryStatus,
    pub value: Option<Value>,
    pub last_activity: DateTime<Utc>,
}

/// An entry whose stored value failed to decode — surfaced by queries
/// instead of aborting the whole scan.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub key: String,
    pub error: String,
}

/// A query result row: either a healthy entry or a decode failure.
#[derive(Debug, Clone)]
pub enum QueryRow {
    Ok(CacheEntry),
    Error(ErrorEntry),
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no entry for key '{0}'")]
    NotFound(String),
    #[error("ticket does not hold the lease for key '{0}'")]
    TicketMismatch(String),
    #[error("ticket for key '{0}' has expired")]
    TicketExpired(String),
    #[error("ticket revision {ticket_rev} does not match entry revision {entry_rev} for key '{key}'")]
    RevisionMismatch {
        key: String,
        ticket_rev: u64,
        entry_rev: u64,
    },
    #[error("entry for key '{0}' has been deleted")]
    Deleted(String),
}

fn shard_index(key: &str) -> usize {
    let mut hash: u64 = 1469598103934665603;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash as usize) % SHARD_COUNT
}

/// Sharded in-process job-state cache. Hand-rolled rather than pulled from
/// a concurrent-map crate, the same call a queue consumer already makes
/// for its own admission structure: a fixed number of `Mutex<HashMap>`
/// shards selected by key hash, so unrelated keys never contend on the
/// same lock.
pub struct JobCache {
    shards: Vec<Mutex<HashMap<String, Entry>>>,
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JobCache {
    #[must_use]
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Self { shards }
    }

    fn shard(&self, key: &str) -> &Mutex<HashMap<String, Entry>> {
        &self.shards[shard_index(key)]
    }

    /// `openNewTicket(key, dur)`.
    pub fn open_new_ticket(&self, key: &str, dur: Duration, now: DateTime<Utc>) -> TicketOutcome {
        let dur = clamp_ticket_duration(dur);
        let mut guard = self.shard(key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = guard.get(key) {
            if entry.value.is_some() && entry.status != EntryStatus::Deleted {
                return TicketOutcome::Superseded;
            }
            if let Some(ticket) = &entry.ticket {
                if !ticket.is_expired(now) {
                    return TicketOutcome::Superseded;
                }
            }
        }
        let ticket = CacheTicket {
            ticket_id: Uuid::new_v4(),
            key: key.to_string(),
            revision: 0,
            granted_at: now,
            deadline: now + dur,
        };
        guard.insert(
            key.to_string(),
            Entry {
                revision: 0,
                status: EntryStatus::Queued,
                value: None,
                last_activity: now,
                ticket: Some(ticket.clone()),
            },
        );
        debug!(key, ticket_id = %ticket.ticket_id, "opened new cache ticket");
        TicketOutcome::Live(ticket)
    }

    /// `openTicket(key, revision, dur)`.
    pub fn open_ticket(&self, key: &str, revision: u64, dur: Duration, now: DateTime<Utc>) -> TicketOutcome {
        let dur = clamp_ticket_duration(dur);
        let mut guard = self.shard(key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(entry) = guard.get_mut(key) else {
            return TicketOutcome::Missing;
        };
        if entry.revision > revision {
            return TicketOutcome::Superseded;
        }
        if entry.revision < revision {
            return TicketOutcome::Missing;
        }
        if let Some(ticket) = &entry.ticket {
            if !ticket.is_expired(now) {
                return TicketOutcome::Superseded;
            }
        }
        let ticket = CacheTicket {
            ticket_id: Uuid::new_v4(),
            key: key.to_string(),
            revision,
            granted_at: now,
            deadline: now + dur,
        };
        entry.ticket = Some(ticket.clone());
        TicketOutcome::Live(ticket)
    }

    /// Releases the lease if `ticket` still holds it. No-op otherwise.
    pub fn close_ticket(&self, ticket: &CacheTicket) {
        let mut guard = self.shard(&ticket.key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = guard.get_mut(&ticket.key) {
            let holds = entry
                .ticket
                .as_ref()
                .is_some_and(|held| held.ticket_id == ticket.ticket_id);
            if holds {
                if entry.status == EntryStatus::Deleted {
                    guard.remove(&ticket.key);
                } else {
                    entry.ticket = None;
                }
            }
        }
    }

    fn require_live(
        entry: &Entry,
        ticket: &CacheTicket,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let held = entry
            .ticket
            .as_ref()
            .ok_or_else(|| CacheError::TicketMismatch(ticket.key.clone()))?;
        if held.ticket_id != ticket.ticket_id {
            return Err(CacheError::TicketMismatch(ticket.key.clone()));
        }
        if held.is_expired(now) {
            return Err(CacheError::TicketExpired(ticket.key.clone()));
        }
        if entry.revision != ticket.revision {
            return Err(CacheError::RevisionMismatch {
                key: ticket.key.clone(),
                ticket_rev: ticket.revision,
                entry_rev: entry.revision,
            });
        }
        Ok(())
    }

    /// `createEntry` — requires a LIVE ticket at revision 0 for a key with
    /// no value yet.
    pub fn create_entry(
        &self,
        ticket: &CacheTicket,
        status: EntryStatus,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, CacheError> {
        let mut guard = self.shard(&ticket.key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .get_mut(&ticket.key)
            .ok_or_else(|| CacheError::NotFound(ticket.key.clone()))?;
        Self::require_live(entry, ticket, now)?;
        entry.value = Some(value);
        entry.status = status;
        entry.revision += 1;
        entry.last_activity = now;
        Ok(CacheEntry {
            key: ticket.key.clone(),
            revision: entry.revision,
            status: entry.status,
            value: entry.value.clone(),
            last_activity: entry.last_activity,
        })
    }

    /// `updateEntry` — overwrites the value and/or status under a LIVE
    /// ticket, incrementing the revision.
    pub fn update_entry(
        &self,
        ticket: &CacheTicket,
        status: EntryStatus,
        value: Value,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, CacheError> {
        let mut guard = self.shard(&ticket.key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .get_mut(&ticket.key)
            .ok_or_else(|| CacheError::NotFound(ticket.key.clone()))?;
        Self::require_live(entry, ticket, now)?;
        if entry.status == EntryStatus::Deleted {
            return Err(CacheError::Deleted(ticket.key.clone()));
        }
        entry.value = Some(value);
        entry.status = status;
        entry.revision += 1;
        entry.last_activity = now;
        Ok(CacheEntry {
            key: ticket.key.clone(),
            revision: entry.revision,
            status: entry.status,
            value: entry.value.clone(),
            last_activity: entry.last_activity,
        })
    }

    /// `deleteEntry` — soft delete: clears the value but keeps the record
    /// (and, if still held, its ticket) so concurrent readers observe a
    /// consistent state. Full removal happens in [`Self::close_ticket`].
    pub fn delete_entry(&self, ticket: &CacheTicket, now: DateTime<Utc>) -> Result<(), CacheError> {
        let mut guard = self.shard(&ticket.key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .get_mut(&ticket.key)
            .ok_or_else(|| CacheError::NotFound(ticket.key.clone()))?;
        Self::require_live(entry, ticket, now)?;
        entry.value = None;
        entry.status = EntryStatus::Deleted;
        entry.revision += 1;
        entry.last_activity = now;
        Ok(())
    }

    /// `readEntry` — requires a LIVE ticket, same as the other mutations,
    /// since a read under lease must see a stable snapshot.
    pub fn read_entry(&self, ticket: &CacheTicket, now: DateTime<Utc>) -> Result<CacheEntry, CacheError> {
        let guard = self.shard(&ticket.key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard
            .get(&ticket.key)
            .ok_or_else(|| CacheError::NotFound(ticket.key.clone()))?;
        Self::require_live(entry, ticket, now)?;
        Ok(CacheEntry {
            key: ticket.key.clone(),
            revision: entry.revision,
            status: entry.status,
            value: entry.value.clone(),
            last_activity: entry.last_activity,
        })
    }

    /// `queryKey(key)` — lock-free in spirit: takes the shard lock only
    /// long enough to clone the entry, skipping entries under a LIVE
    /// unexpired ticket unless the ticket itself already expired.
    pub fn query_key(&self, key: &str, now: DateTime<Utc>) -> Option<QueryRow> {
        let guard = self.shard(key).lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard.get(key)?;
        if let Some(ticket) = &entry.ticket {
            if !ticket.is_expired(now) {
                return None;
            }
        }
        Some(QueryRow::Ok(CacheEntry {
            key: key.to_string(),
            revision: entry.revision,
            status: entry.status,
            value: entry.value.clone(),
            last_activity: entry.last_activity,
        }))
    }

    /// `queryStatus(statuses, includeOpenTickets)`.
    pub fn query_status(
        &self,
        statuses: &[EntryStatus],
        include_open_tickets: bool,
        now: DateTime<Utc>,
    ) -> Vec<QueryRow> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for (key, entry) in guard.iter() {
                if !statuses.contains(&entry.status) {
                    continue;
                }
                if !include_open_tickets {
                    if let Some(ticket) = &entry.ticket {
                        if !ticket.is_expired(now) {
                            continue;
                        }
                    }
                }
                out.push(QueryRow::Ok(CacheEntry {
                    key: key.clone(),
                    revision: entry.revision,
                    status: entry.status,
                    value: entry.value.clone(),
                    last_activity: entry.last_activity,
                }));
            }
        }
        out
    }
}

/// Shared handle for composing services that each need a reference to the
/// same cache instance.
pub type SharedJobCache = Arc<JobCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    use chrono::TimeZone;

    #[test]
    fn open_new_ticket_clamps_duration_to_max() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-clamp", Duration::hours(1), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        assert_eq!(t1.deadline, now() + MAX_TICKET_DURATION);
    }

    #[test]
    fn open_ticket_clamps_duration_to_max() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-clamp-2", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        cache
            .create_entry(&t1, EntryStatus::Queued, Value::Null, now())
            .unwrap();
        cache.close_ticket(&t1);

        let t2 = match cache.open_ticket("job-clamp-2", 0, Duration::hours(2), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        assert_eq!(t2.deadline, now() + MAX_TICKET_DURATION);
    }

    #[test]
    fn open_new_ticket_then_contend() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-1", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        let contended = cache.open_new_ticket("job-1", Duration::seconds(30), now());
        assert_eq!(contended, TicketOutcome::Superseded);
        cache.close_ticket(&t1);
        let retried = cache.open_new_ticket("job-1", Duration::seconds(30), now());
        assert!(matches!(retried, TicketOutcome::Live(_)));
    }

    #[test]
    fn open_ticket_revision_rules() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-2", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        cache
            .create_entry(&t1, EntryStatus::Queued, Value::Null, now())
            .unwrap();
        cache.close_ticket(&t1);

        assert_eq!(
            cache.open_ticket("job-2", 5, Duration::seconds(30), now()),
            TicketOutcome::Missing
        );
        assert_eq!(
            cache.open_ticket("missing-key", 0, Duration::seconds(30), now()),
            TicketOutcome::Missing
        );
        let t2 = cache.open_ticket("job-2", 1, Duration::seconds(30), now());
        assert!(matches!(t2, TicketOutcome::Live(_)));
    }

    #[test]
    fn mutation_without_matching_ticket_fails() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-3", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        let stale = CacheTicket {
            ticket_id: Uuid::new_v4(),
            ..t1.clone()
        };
        let err = cache
            .create_entry(&stale, EntryStatus::Queued, Value::Null, now())
            .unwrap_err();
        assert!(matches!(err, CacheError::TicketMismatch(_)));
    }

    #[test]
    fn delete_entry_is_soft_until_ticket_closes() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-4", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        cache
            .create_entry(&t1, EntryStatus::Succeeded, Value::Null, now())
            .unwrap();
        let t1_rev1 = CacheTicket {
            revision: 1,
            ..t1.clone()
        };
        cache.delete_entry(&t1_rev1, now()).unwrap();
        let row = cache.query_status(&[EntryStatus::Deleted], true, now());
        assert_eq!(row.len(), 1);
        cache.close_ticket(&t1_rev1);
        let after = cache.query_key("job-4", now());
        assert!(after.is_none());
    }

    #[test]
    fn query_status_skips_live_unexpired_tickets_by_default() {
        let cache = JobCache::new();
        let t1 = match cache.open_new_ticket("job-5", Duration::seconds(30), now()) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        cache
            .create_entry(&t1, EntryStatus::Running, Value::Null, now())
            .unwrap();
        let hidden = cache.query_status(&[EntryStatus::Running], false, now());
        assert!(hidden.is_empty());
        let visible = cache.query_status(&[EntryStatus::Running], true, now());
        assert_eq!(visible.len(), 1);
    }

    #[test]
    fn ticket_expiry_allows_reclaim() {
        let cache = JobCache::new();
        let base = now();
        let _t1 = match cache.open_new_ticket("job-6", Duration::seconds(10), base) {
            TicketOutcome::Live(t) => t,
            other => panic!("expected Live, got {other:?}"),
        };
        let later = base + Duration::seconds(11);
        let reclaimed = cache.open_new_ticket("job-6", Duration::seconds(10), later);
        assert!(matches!(reclaimed, TicketOutcome::Live(_)));
    }
}
