//! Core data types shared by the bridge, inbox, and connection supervisor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An item travelling through one of the bridge channels
///
/// Every variant is stamped at construction. The timestamp is informational;
/// ordering inside a channel is purely by arrival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum QueueItem {
    /// A chat message the tool side wants delivered
    OutboundSend {
        to: String,
        body: String,
        enqueued_at: DateTime<Utc>,
    },
    /// A chat message observed on the connection
    InboundReceived {
        from: String,
        body: String,
        kind: String,
        observed_at: DateTime<Utc>,
    },
    /// A presence change observed on the connection
    InboundPresence {
        from: String,
        presence_kind: String,
        status: Option<String>,
        observed_at: DateTime<Utc>,
    },
}

impl QueueItem {
    pub fn outbound_send(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self::OutboundSend {
            to: to.into(),
            body: body.into(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn inbound_received(
        from: impl Into<String>,
        body: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self::InboundReceived {
            from: from.into(),
            body: body.into(),
            kind: kind.into(),
            observed_at: Utc::now(),
        }
    }

    pub fn inbound_presence(
        from: impl Into<String>,
        presence_kind: impl Into<String>,
        status: Option<String>,
    ) -> Self {
        Self::InboundPresence {
            from: from.into(),
            presence_kind: presence_kind.into(),
            status,
            observed_at: Utc::now(),
        }
    }

    /// Time the item was created
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::OutboundSend { enqueued_at, .. } => *enqueued_at,
            Self::InboundReceived { observed_at, .. } => *observed_at,
            Self::InboundPresence { observed_at, .. } => *observed_at,
        }
    }

    /// Short label used in log lines
    pub fn label(&self) -> &'static str {
        match self {
            Self::OutboundSend { .. } => "outbound_send",
            Self::InboundReceived { .. } => "inbound_received",
            Self::InboundPresence { .. } => "inbound_presence",
        }
    }
}

/// A chat message persisted in the inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub id: Uuid,
    pub from: String,
    pub body: String,
    /// Seconds since the Unix epoch, when the source supplied one
    pub timestamp: Option<f64>,
}

impl InboxRecord {
    /// Create a record with a freshly generated id
    pub fn new(from: impl Into<String>, body: impl Into<String>, timestamp: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            body: body.into(),
            timestamp,
        }
    }
}

/// Occupancy snapshot of the inbox
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InboxStats {
    #[serde(rename = "total_messages")]
    pub total: usize,
    #[serde(rename = "max_capacity")]
    pub capacity: usize,
    #[serde(rename = "capacity_used_percent")]
    pub used_percent: f64,
}

/// Occupancy snapshot of both bridge channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub inbound_size: usize,
    pub inbound_capacity: usize,
    pub outbound_size: usize,
    pub outbound_capacity: usize,
}

/// Lifecycle state of the chat connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Whether a connection attempt is currently in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored directory hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMatch {
    pub alias: String,
    #[serde(rename = "jid")]
    pub address: String,
    pub score: u8,
}

impl DirectoryMatch {
    pub fn new(alias: impl Into<String>, address: impl Into<String>, score: u8) -> Self {
        Self {
            alias: alias.into(),
            address: address.into(),
            score,
        }
    }
}

impl fmt::Display for DirectoryMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({}%)", self.alias, self.address, self.score)
    }
}

/// Truncate to at most `max` characters, respecting char boundaries
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
