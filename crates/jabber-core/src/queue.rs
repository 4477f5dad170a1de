//! Bounded FIFO channels connecting the chat side to the tool side

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

use crate::types::QueueItem;

/// Default capacity of each bridge channel
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Raised when `put_with_timeout` could not find space in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// A fixed-capacity FIFO channel with hard back-pressure
///
/// Writers never evict: a full channel rejects (`try_put`) or waits
/// (`put_with_timeout`). Readers poll with a timeout so a pump loop can
/// observe shutdown between items.
#[derive(Debug)]
pub struct BoundedChannel {
    tx: mpsc::Sender<QueueItem>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
    capacity: usize,
}

impl BoundedChannel {
    /// Create a channel holding at most `capacity` items
    ///
    /// Panics if `capacity` is zero, like `tokio::sync::mpsc::channel`.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// Enqueue without waiting; hands the item back if the channel is full
    pub fn try_put(&self, item: QueueItem) -> Result<(), QueueItem> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(item)) => Err(item),
            Err(mpsc::error::TrySendError::Closed(item)) => Err(item),
        }
    }

    /// Enqueue, waiting up to `timeout` for space
    pub async fn put_with_timeout(&self, item: QueueItem, timeout: Duration) -> Result<(), TimedOut> {
        self.tx.send_timeout(item, timeout).await.map_err(|_| TimedOut)
    }

    /// Dequeue the oldest item, waiting up to `timeout`
    ///
    /// `None` means the channel stayed empty; it is the normal idle path.
    pub async fn try_get_with_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let result = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match result {
            Ok(Some(item)) => {
                let waited = Utc::now() - item.timestamp();
                trace!(
                    "Dequeued {} after {}ms in queue",
                    item.label(),
                    waited.num_milliseconds()
                );
                Some(item)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Items currently buffered
    pub fn size(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

/// The two directions of the bridge, sharing one capacity
#[derive(Debug)]
pub struct ChannelPair {
    /// Chat side to tool side
    pub inbound: BoundedChannel,
    /// Tool side to chat side
    pub outbound: BoundedChannel,
}

impl ChannelPair {
    pub fn new(capacity: usize) -> Self {
        Self {
            inbound: BoundedChannel::new(capacity),
            outbound: BoundedChannel::new(capacity),
        }
    }
}

impl Default for ChannelPair {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn item(n: usize) -> QueueItem {
        QueueItem::outbound_send("a@x.com", format!("Message {}", n))
    }

    fn body(item: QueueItem) -> String {
        match item {
            QueueItem::OutboundSend { body, .. } => body,
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let channel = BoundedChannel::new(5);
        for n in 0..3 {
            channel.try_put(item(n)).unwrap();
        }
        assert_eq!(channel.size(), 3);

        for n in 0..3 {
            let got = channel
                .try_get_with_timeout(Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(body(got), format!("Message {}", n));
        }
        assert_eq!(channel.size(), 0);
    }

    #[tokio::test]
    async fn test_try_put_rejects_when_full() {
        let channel = BoundedChannel::new(2);
        channel.try_put(item(0)).unwrap();
        channel.try_put(item(1)).unwrap();
        assert!(channel.is_full());

        let rejected = channel.try_put(item(2)).unwrap_err();
        assert_eq!(body(rejected), "Message 2");
        assert_eq!(channel.size(), 2);
    }

    #[tokio::test]
    async fn test_put_with_timeout_times_out_when_full() {
        let channel = BoundedChannel::new(3);
        for n in 0..3 {
            channel.try_put(item(n)).unwrap();
        }

        let started = Instant::now();
        let result = channel
            .put_with_timeout(item(3), Duration::from_millis(100))
            .await;
        let elapsed = started.elapsed();

        assert_eq!(result, Err(TimedOut));
        assert!(elapsed >= Duration::from_millis(90));
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(channel.size(), 3);
    }

    #[tokio::test]
    async fn test_put_with_timeout_succeeds_once_drained() {
        let channel = std::sync::Arc::new(BoundedChannel::new(1));
        channel.try_put(item(0)).unwrap();

        let reader = channel.clone();
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reader.try_get_with_timeout(Duration::from_millis(100)).await
        });

        let result = channel
            .put_with_timeout(item(1), Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
        assert!(drain.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_times_out_on_empty() {
        let channel = BoundedChannel::new(1);
        let got = channel
            .try_get_with_timeout(Duration::from_millis(20))
            .await;
        assert!(got.is_none());
    }

    #[test]
    fn test_pair_shares_capacity() {
        let pair = ChannelPair::new(7);
        assert_eq!(pair.inbound.capacity(), 7);
        assert_eq!(pair.outbound.capacity(), 7);
        assert_eq!(ChannelPair::default().inbound.capacity(), DEFAULT_QUEUE_SIZE);
    }
}
