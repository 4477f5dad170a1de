//! In-process chat connection
//!
//! Messages sent to the account's own bare address come straight back as
//! inbound messages. Connect failures, authentication rejection, dropped
//! links and roster contents can be scripted.

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, trace};

use crate::connection::{ChatConnection, ChatEvent};
use crate::error::ConnectionError;
use crate::roster::RosterEntry;
use crate::validation::bare_address;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct LoopbackState {
    connected: bool,
    connect_calls: u32,
    failures_remaining: u32,
    reject_auth: bool,
    roster: Vec<RosterEntry>,
    sent: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct LoopbackConnection {
    address: String,
    events: broadcast::Sender<ChatEvent>,
    state: Mutex<LoopbackState>,
}

impl LoopbackConnection {
    pub fn new(address: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address: address.into(),
            events,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    pub fn with_roster(mut self, roster: Vec<RosterEntry>) -> Self {
        self.state.get_mut().roster = roster;
        self
    }

    /// Make the next `count` connect calls fail with a transient error
    pub async fn fail_next_connects(&self, count: u32) {
        self.state.lock().await.failures_remaining = count;
    }

    /// Reject (or stop rejecting) credentials on connect
    pub async fn set_reject_auth(&self, reject: bool) {
        self.state.lock().await.reject_auth = reject;
    }

    pub async fn connect_calls(&self) -> u32 {
        self.state.lock().await.connect_calls
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Every successfully sent `(to, body)` pair, oldest first
    pub async fn sent_messages(&self) -> Vec<(String, String)> {
        self.state.lock().await.sent.clone()
    }

    /// Simulate the server dropping the link
    pub async fn drop_connection(&self, reason: &str) {
        self.state.lock().await.connected = false;
        self.emit(ChatEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Simulate a message arriving from another account
    pub fn deliver(&self, from: &str, body: &str) {
        self.emit(ChatEvent::MessageReceived {
            from: from.to_string(),
            body: body.to_string(),
            kind: "chat".to_string(),
        });
    }

    /// Emit an arbitrary event to subscribers
    pub fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            trace!("Loopback event dropped: no subscribers");
        }
    }
}

#[async_trait]
impl ChatConnection for LoopbackConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        state.connect_calls += 1;

        if state.reject_auth {
            return Err(ConnectionError::AuthRejected(format!(
                "not authorized as {}",
                self.address
            )));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ConnectionError::Transient("connection refused".into()));
        }

        state.connected = true;
        info!("Loopback session established for {}", self.address);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.connected {
            state.connected = false;
            debug!("Loopback session closed for {}", self.address);
        }
    }

    async fn send_message(&self, to: &str, body: &str) -> Result<(), ConnectionError> {
        {
            let mut state = self.state.lock().await;
            if !state.connected {
                return Err(ConnectionError::NotConnected("disconnected".into()));
            }
            state.sent.push((to.to_string(), body.to_string()));
        }

        if bare_address(to).eq_ignore_ascii_case(bare_address(&self.address)) {
            self.emit(ChatEvent::MessageReceived {
                from: self.address.clone(),
                body: body.to_string(),
                kind: "chat".to_string(),
            });
        }
        Ok(())
    }

    async fn roster(&self) -> Vec<RosterEntry> {
        self.state.lock().await.roster.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_requires_connection() {
        let conn = LoopbackConnection::new("bot@x.com");
        assert!(matches!(
            conn.send_message("a@x.com", "hi").await,
            Err(ConnectionError::NotConnected(_))
        ));

        conn.connect().await.unwrap();
        conn.send_message("a@x.com", "hi").await.unwrap();
        assert_eq!(
            conn.sent_messages().await,
            vec![("a@x.com".to_string(), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn test_echo_to_self() {
        let conn = LoopbackConnection::new("bot@x.com/res");
        let mut events = conn.subscribe();
        conn.connect().await.unwrap();

        conn.send_message("BOT@x.com", "ping").await.unwrap();
        match events.recv().await.unwrap() {
            ChatEvent::MessageReceived { from, body, kind } => {
                assert_eq!(from, "bot@x.com/res");
                assert_eq!(body, "ping");
                assert_eq!(kind, "chat");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let conn = LoopbackConnection::new("bot@x.com");
        conn.fail_next_connects(2).await;
        assert!(matches!(conn.connect().await, Err(ConnectionError::Transient(_))));
        assert!(matches!(conn.connect().await, Err(ConnectionError::Transient(_))));
        assert!(conn.connect().await.is_ok());
        assert_eq!(conn.connect_calls().await, 3);

        conn.set_reject_auth(true).await;
        assert!(matches!(conn.connect().await, Err(ConnectionError::AuthRejected(_))));
    }

    #[tokio::test]
    async fn test_drop_connection_emits_event() {
        let conn = LoopbackConnection::new("bot@x.com")
            .with_roster(vec![RosterEntry::new("a@x.com", Some("A"))]);
        let mut events = conn.subscribe();
        conn.connect().await.unwrap();
        assert_eq!(conn.roster().await.len(), 1);

        conn.drop_connection("stream reset").await;
        assert!(!conn.is_connected().await);
        assert_eq!(
            events.recv().await.unwrap(),
            ChatEvent::Disconnected {
                reason: "stream reset".into()
            }
        );
    }
}
