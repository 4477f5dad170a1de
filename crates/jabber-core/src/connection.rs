//! Interface to the chat-protocol client

use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ConnectionError;
use crate::roster::RosterEntry;

/// Events a chat connection emits to its subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A session finished establishing outside of a `connect` call
    SessionStarted,
    MessageReceived {
        from: String,
        body: String,
        kind: String,
    },
    PresenceReceived {
        from: String,
        presence_kind: String,
        status: Option<String>,
    },
    RosterUpdated {
        added: Vec<RosterEntry>,
        removed: Vec<String>,
    },
    Disconnected {
        reason: String,
    },
    ConnectionFailed {
        reason: String,
    },
    AuthFailed {
        reason: String,
    },
}

impl ChatEvent {
    /// Chat traffic to forward into the bridge, as opposed to link control
    pub fn is_traffic(&self) -> bool {
        matches!(
            self,
            Self::MessageReceived { .. } | Self::PresenceReceived { .. }
        )
    }
}

/// An account connection to a chat server
///
/// `connect` returns once the session is usable. Asynchronous happenings
/// (incoming messages, drops, roster pushes) arrive through `subscribe`.
#[async_trait]
pub trait ChatConnection: Send + Sync + Debug {
    /// Address of the account this connection logs in as
    fn address(&self) -> &str;

    async fn connect(&self) -> Result<(), ConnectionError>;

    async fn disconnect(&self);

    async fn send_message(&self, to: &str, body: &str) -> Result<(), ConnectionError>;

    /// Current contact list
    async fn roster(&self) -> Vec<RosterEntry>;

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent>;
}
