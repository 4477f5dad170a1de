//! `inbox/new` notifications for freshly received chat messages

use jabber_core::{QueueItem, ReceivedEntry, truncate_chars};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::JsonRpcNotification;

pub const INBOX_NEW: &str = "inbox/new";

const BODY_PREVIEW: usize = 100;

/// Notification payload for a log entry, if it is a chat message
pub fn inbox_notification(entry: &ReceivedEntry) -> Option<JsonRpcNotification> {
    match &entry.item {
        QueueItem::InboundReceived {
            from,
            body,
            observed_at,
            ..
        } => Some(JsonRpcNotification::new(
            INBOX_NEW,
            serde_json::json!({
                "from": from,
                "body": truncate_chars(body, BODY_PREVIEW),
                "timestamp": observed_at.timestamp_millis() as f64 / 1000.0,
            }),
        )),
        _ => None,
    }
}

/// Forward received chat messages as notifications until cancelled
pub async fn forward_inbox_notifications(
    mut entries: broadcast::Receiver<ReceivedEntry>,
    output: mpsc::Sender<String>,
    token: CancellationToken,
) {
    loop {
        let entry = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            entry = entries.recv() => entry,
        };

        let entry = match entry {
            Ok(entry) => entry,
            Err(broadcast::error::RecvError::Lagged(count)) => {
                warn!("Skipped {} inbox notifications, client too slow", count);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(notification) = inbox_notification(&entry) else {
            continue;
        };
        let encoded = match serde_json::to_string(&notification) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode notification: {}", e);
                continue;
            }
        };
        if output.send(encoded).await.is_err() {
            debug!("Output closed, stopping notifications");
            break;
        }
        info!(
            "Sent {} notification for message from {}",
            INBOX_NEW,
            notification.params.get("from").and_then(serde_json::Value::as_str).unwrap_or("?")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use chrono::Utc;
    use std::time::Duration;

    fn entry(item: QueueItem) -> ReceivedEntry {
        ReceivedEntry {
            seq: 0,
            recorded_at: Utc::now(),
            item,
        }
    }

    #[test]
    fn test_only_chat_messages_notify() {
        let long = "y".repeat(150);
        let note = inbox_notification(&entry(QueueItem::inbound_received("a@x.com", &long, "chat")))
            .unwrap();
        assert_eq!(note.method, "inbox/new");
        assert_eq!(note.params["from"], "a@x.com");
        assert_eq!(note.params["body"].as_str().unwrap().len(), 100);
        assert!(note.params["timestamp"].as_f64().unwrap() > 0.0);

        let presence = entry(QueueItem::inbound_presence("a@x.com", "available", None));
        assert!(inbox_notification(&presence).is_none());
    }

    #[tokio::test]
    async fn test_forwarding_stops_on_cancel() {
        let (entries_tx, entries_rx) = broadcast::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let task = tokio::spawn(forward_inbox_notifications(entries_rx, out_tx, token.clone()));

        entries_tx
            .send(entry(QueueItem::inbound_presence("a@x.com", "away", None)))
            .unwrap();
        entries_tx
            .send(entry(QueueItem::inbound_received("a@x.com", "hi", "chat")))
            .unwrap();

        let line = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["method"], "inbox/new");
        assert_eq!(value["params"]["body"], "hi");
        assert!(value.get("id").is_none());

        token.cancel();
        task.await.unwrap();
    }
}
