//! Pump hooks plugged into the bridge loops

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::ChatConnection;
use crate::error::BridgeError;
use crate::inbox::Inbox;
use crate::types::{ConnectionState, InboxRecord, QueueItem, truncate_chars};
use crate::validation::{validate_address, validate_message_body};

/// Per-item processing for the two bridge loops
#[async_trait]
pub trait MessagePump: Send + Sync {
    /// Handle one item taken from the inbound channel
    async fn process_inbound(&self, item: QueueItem) -> Result<(), BridgeError>;

    /// Handle one item taken from the outbound channel
    async fn process_outbound(&self, item: QueueItem) -> Result<(), BridgeError>;

    /// Resolves when the outbound loop may take the next item
    async fn outbound_ready(&self) {}
}

/// Extra work run when the bridge starts and stops
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn on_start(&self) -> Result<(), BridgeError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), BridgeError> {
        Ok(())
    }
}

/// Shared bridge state handed to a pump at construction
#[derive(Debug, Clone)]
pub struct PumpContext {
    pub inbox: Arc<Inbox>,
    pub state: watch::Receiver<ConnectionState>,
}

/// Pump that persists valid chat messages and delivers outbound sends
#[derive(Debug)]
pub struct ChatPump {
    ctx: PumpContext,
    connection: Arc<dyn ChatConnection>,
}

impl ChatPump {
    pub fn new(ctx: PumpContext, connection: Arc<dyn ChatConnection>) -> Self {
        Self { ctx, connection }
    }
}

#[async_trait]
impl MessagePump for ChatPump {
    async fn process_inbound(&self, item: QueueItem) -> Result<(), BridgeError> {
        match item {
            QueueItem::InboundReceived {
                from,
                body,
                observed_at,
                ..
            } => {
                let sender = validate_address(&from)
                    .map_err(|reason| BridgeError::BestEffortDrop {
                        from: from.clone(),
                        reason,
                    })?
                    .to_string();
                validate_message_body(&body).map_err(|reason| BridgeError::BestEffortDrop {
                    from: sender.clone(),
                    reason,
                })?;

                let timestamp = observed_at.timestamp_millis() as f64 / 1000.0;
                let record = InboxRecord::new(sender, body, Some(timestamp));
                info!("Added message to inbox: {} from {}", record.id, record.from);
                self.ctx.inbox.append(record).await;
                Ok(())
            }
            QueueItem::InboundPresence {
                from,
                presence_kind,
                ..
            } => {
                debug!("Presence from {}: {}", from, presence_kind);
                Ok(())
            }
            other => {
                warn!("Unexpected {} item on the inbound channel", other.label());
                Ok(())
            }
        }
    }

    async fn process_outbound(&self, item: QueueItem) -> Result<(), BridgeError> {
        match item {
            QueueItem::OutboundSend { to, body, .. } => {
                let body = body.trim();
                debug!("Delivering to {}: {}", to, truncate_chars(body, 100));
                self.connection.send_message(&to, body).await?;
                Ok(())
            }
            other => {
                warn!("Unexpected {} item on the outbound channel", other.label());
                Ok(())
            }
        }
    }

    async fn outbound_ready(&self) {
        let mut state = self.ctx.state.clone();
        if state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .is_err()
        {
            // Sender gone: nothing will ever connect, park until cancelled.
            std::future::pending::<()>().await;
        }
    }
}
