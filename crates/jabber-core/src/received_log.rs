//! Diagnostic log of every item the inbound pump processed

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tracing::trace;

use crate::types::QueueItem;

/// Default number of retained entries
pub const DEFAULT_RECEIVED_LOG_CAPACITY: usize = 1000;

const BROADCAST_CAPACITY: usize = 256;

/// One processed inbound item with its position in the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceivedEntry {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub item: QueueItem,
}

#[derive(Debug)]
struct LogState {
    entries: VecDeque<ReceivedEntry>,
    next_seq: u64,
}

/// Bounded, append-only history of inbound items
///
/// New entries are also broadcast so subscribers can react without polling.
#[derive(Debug)]
pub struct ReceivedLog {
    capacity: usize,
    state: RwLock<LogState>,
    tx: broadcast::Sender<ReceivedEntry>,
}

impl ReceivedLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(LogState {
                entries: VecDeque::new(),
                next_seq: 0,
            }),
            tx,
        }
    }

    /// Record an item and return its sequence number
    pub async fn push(&self, item: QueueItem) -> u64 {
        let entry = {
            let mut state = self.state.write().await;
            let entry = ReceivedEntry {
                seq: state.next_seq,
                recorded_at: Utc::now(),
                item,
            };
            state.next_seq += 1;
            if state.entries.len() >= self.capacity {
                state.entries.pop_front();
            }
            state.entries.push_back(entry.clone());
            entry
        };

        let seq = entry.seq;
        if self.tx.send(entry).is_err() {
            trace!("No subscribers for received entry {}", seq);
        }
        seq
    }

    /// Entries oldest-first
    pub async fn snapshot(&self) -> Vec<ReceivedEntry> {
        self.state.read().await.entries.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Receive every entry pushed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedEntry> {
        self.tx.subscribe()
    }
}

impl Default for ReceivedLog {
    fn default() -> Self {
        Self::new(DEFAULT_RECEIVED_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_with_increasing_seq() {
        let log = ReceivedLog::new(2);
        for n in 0..3 {
            log.push(QueueItem::inbound_received("a@x.com", format!("m{}", n), "chat"))
                .await;
        }

        let entries = log.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_new_entries() {
        let log = ReceivedLog::default();
        let mut rx = log.subscribe();

        log.push(QueueItem::inbound_presence("a@x.com", "available", None))
            .await;

        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.seq, 0);
        assert!(matches!(entry.item, QueueItem::InboundPresence { .. }));
    }
}
