//! Bounded store of recently received chat messages

use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::types::{InboxRecord, InboxStats};

/// Default number of records retained
pub const DEFAULT_INBOX_CAPACITY: usize = 500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InboxError {
    #[error("inbox capacity must be greater than zero")]
    ZeroCapacity,
}

/// Insertion-ordered inbox with FIFO eviction
///
/// All access goes through a single lock, so `list` always observes either
/// the state before or after a concurrent `append`.
#[derive(Debug)]
pub struct Inbox {
    capacity: usize,
    records: RwLock<VecDeque<InboxRecord>>,
}

impl Inbox {
    pub fn new(capacity: usize) -> Result<Self, InboxError> {
        if capacity == 0 {
            return Err(InboxError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        })
    }

    /// Insert at the newest end, evicting the oldest record when full
    pub async fn append(&self, record: InboxRecord) {
        let mut records = self.records.write().await;
        if records.len() >= self.capacity {
            if let Some(evicted) = records.pop_front() {
                debug!("Inbox full, evicted {}", evicted.id);
            }
        }
        records.push_back(record);
    }

    /// Records newest-first, at most `limit` of them
    ///
    /// A limit of zero is treated as no limit.
    pub async fn list(&self, limit: Option<usize>) -> Vec<InboxRecord> {
        let records = self.records.read().await;
        let take = match limit {
            Some(n) if n > 0 => n,
            _ => records.len(),
        };
        records.iter().rev().take(take).cloned().collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<InboxRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.id == id).cloned()
    }

    /// Remove every record, returning how many there were
    pub async fn clear(&self) -> usize {
        let mut records = self.records.write().await;
        let removed = records.len();
        records.clear();
        removed
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn stats(&self) -> InboxStats {
        let total = self.len().await;
        let used_percent = if self.capacity == 0 {
            0.0
        } else {
            total as f64 / self.capacity as f64 * 100.0
        };
        InboxStats {
            total,
            capacity: self.capacity,
            used_percent,
        }
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_INBOX_CAPACITY,
            records: RwLock::new(VecDeque::new()),
        }
    }
}
