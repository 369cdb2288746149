// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Per-stream HTTP/2 flow control and stream-id bookkeeping shared by the
//! gateway's protocol translators. A translator must never emit data past
//! the peer's advertised window and must consume inbound `WINDOW_UPDATE`
//! frames to unblock writes; this crate owns that accounting so each
//! translator doesn't reimplement it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Notify;
use trac_error::{ErrorCode, TracError};

/// HTTP/2's spec-default initial window, used unless configuration
/// overrides it.
pub const DEFAULT_INITIAL_WINDOW: i64 = 65_535;

/// HTTP/2's spec-default maximum frame size.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// A single stream's send-side flow-control window. `consume` blocks (via
/// [`Notify`]) until enough window is available rather than ever emitting
/// data past the peer's advertised limit.
pub struct FlowWindow {
    available: AtomicI64,
    notify: Notify,
}

impl FlowWindow {
    #[must_use]
    pub fn new(initial: i64) -> Self {
        Self {
            available: AtomicI64::new(initial),
            notify: Notify::new(),
        }
    }

    /// Reserve `len` bytes of window, waiting for `WINDOW_UPDATE` frames if
    /// there isn't currently enough.
    pub async fn reserve(&self, len: u32) {
        loop {
            let current = self.available.load(Ordering::SeqCst);
            if current >= i64::from(len) {
                let reserved = self.available.fetch_sub(i64::from(len), Ordering::SeqCst);
                if reserved >= i64::from(len) {
                    return;
                }
                // another waiter won the race; undo and retry
                self.available.fetch_add(i64::from(len), Ordering::SeqCst);
            }
            self.notified_wait().await;
        }
    }

    async fn notified_wait(&self) {
        self.notify.notified().await;
    }

    /// Apply an inbound `WINDOW_UPDATE` increment, per RFC 7540 §6.9. A
    /// negative resulting window (from a `SETTINGS_INITIAL_WINDOW_SIZE`
    /// decrease) is permitted and simply delays further sends.
    pub fn apply_window_update(&self, increment: u32) {
        self.available.fetch_add(i64::from(increment), Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn available(&self) -> i64 {
        self.available.load(Ordering::SeqCst)
    }
}

/// Splits a payload into frames no larger than `max_frame_size`, the way
/// an HTTP/2 DATA-frame writer must.
#[must_use]
pub fn chunk_for_frames(payload: &[u8], max_frame_size: u32) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(max_frame_size as usize).collect()
}

/// Maps stream identifiers to translator-local state for the lifetime of
/// one connection. Per the concurrency model, per-connection state is
/// owned by exactly one worker, so this map is not shared across tasks.
pub struct StreamTable<T> {
    streams: HashMap<u32, T>,
    next_client_stream_id: u32,
}

impl<T> Default for StreamTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            streams: HashMap::new(),
            // client-initiated HTTP/2 streams are always odd-numbered
            next_client_stream_id: 1,
        }
    }

    /// Allocate the next client-initiated stream id and bind `state` to it.
    pub fn open(&mut self, state: T) -> u32 {
        let id = self.next_client_stream_id;
        self.next_client_stream_id += 2;
        self.streams.insert(id, state);
        id
    }

    #[must_use]
    pub fn get(&self, stream_id: u32) -> Option<&T> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u32) -> Option<&mut T> {
        self.streams.get_mut(&stream_id)
    }

    pub fn close(&mut self, stream_id: u32) -> Option<T> {
        self.streams.remove(&stream_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Require that a referenced stream id is still open, mapping a missing
/// entry onto the closed error taxonomy rather than panicking.
pub fn require_stream<T>(table: &StreamTable<T>, stream_id: u32) -> Result<&T, TracError> {
    table
        .get(stream_id)
        .ok_or_else(|| TracError::new(ErrorCode::Internal, "operation on unknown or closed stream").with_context("stream_id", stream_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_blocks_until_window_update() {
        let window = std::sync::Arc::new(FlowWindow::new(10));
        window.reserve(10).await;
        assert_eq!(window.available(), 0);

        let w2 = window.clone();
        let task = tokio::spawn(async move {
            w2.reserve(5).await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        window.apply_window_update(5);
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("reserve completed after window update")
            .unwrap();
    }

    #[test]
    fn chunking_respects_max_frame_size() {
        let payload = vec![0u8; 40_000];
        let chunks = chunk_for_frames(&payload, DEFAULT_MAX_FRAME_SIZE);
        assert!(chunks.iter().all(|c| c.len() as u32 <= DEFAULT_MAX_FRAME_SIZE));
        assert_eq!(
            chunks.iter().map(|c| c.len()).sum::<usize>(),
            payload.len()
        );
    }

    #[test]
    fn stream_table_allocates_odd_client_ids() {
        let mut table: StreamTable<()> = StreamTable::new();
        let a = table.open(());
        let b = table.open(());
        assert_eq!(a, 1);
        assert_eq!(b, 3);
        assert_eq!(table.len(), 2);
        assert!(table.close(a).is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn require_stream_maps_missing_to_internal_error() {
        let table: StreamTable<()> = StreamTable::new();
        let err = require_stream(&table, 99).unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
