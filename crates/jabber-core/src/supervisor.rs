//! Connection supervision: state machine, reconnection, and event routing
//!
//! The supervisor is the only writer of [`ConnectionState`]. It routes
//! connection events into the bridge and keeps at most one reconnection
//! task alive at a time.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::Bridge;
use crate::config::Config;
use crate::connection::{ChatConnection, ChatEvent};
use crate::error::ConnectionError;
use crate::retry::{RetryConfig, delay, retry_with_backoff_while};
use crate::roster::{sync_roster, sync_roster_incremental};
use crate::types::{ConnectionState, truncate_chars};

/// Resets an in-progress state to `Disconnected` if dropped while armed
///
/// Dropping it armed also lowers the bridge's awaiting-connection flag,
/// since nothing is left trying to connect.
struct InProgressGuard {
    state: Arc<watch::Sender<ConnectionState>>,
    awaiting: Arc<AtomicBool>,
    armed: bool,
}

impl InProgressGuard {
    fn new(state: Arc<watch::Sender<ConnectionState>>, awaiting: Arc<AtomicBool>) -> Self {
        Self {
            state,
            awaiting,
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.awaiting.store(false, Ordering::SeqCst);
        self.state.send_if_modified(|current| {
            if current.is_in_progress() {
                debug!("Connection attempt abandoned in state {}", current);
                *current = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventRoute {
    /// Link state, auth, and roster events
    Control,
    /// Messages and presence forwarded into the bridge
    Traffic,
}

struct EventTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Owns the connection lifecycle and feeds its events into the bridge
pub struct ConnectionSupervisor {
    connection: Arc<dyn ChatConnection>,
    bridge: Arc<Bridge>,
    state: Arc<watch::Sender<ConnectionState>>,
    awaiting: Arc<AtomicBool>,
    connect_retry: RetryConfig,
    reconnect_retry: RetryConfig,
    auto_reconnect: AtomicBool,
    intentional_disconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    event_tasks: Mutex<Option<EventTasks>>,
    this: Weak<Self>,
}

impl ConnectionSupervisor {
    pub fn new(
        connection: Arc<dyn ChatConnection>,
        bridge: Arc<Bridge>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: bridge.connection_state_publisher(),
            awaiting: bridge.awaiting_connection_flag(),
            connection,
            bridge,
            connect_retry: config.retry.clone(),
            reconnect_retry: config.reconnect.0.clone(),
            auto_reconnect: AtomicBool::new(config.xmpp.auto_reconnect),
            intentional_disconnect: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            reconnect_task: Mutex::new(None),
            event_tasks: Mutex::new(None),
            this: this.clone(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Re-enable reconnection after it was disabled by a fatal error
    pub fn enable_auto_reconnect(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.auto_reconnect.store(true, Ordering::SeqCst);
        info!("Auto-reconnect enabled");
    }

    /// Begin routing connection events into the bridge
    ///
    /// Control events and chat traffic run on separate tasks, so a full
    /// inbound channel never delays a disconnect or auth failure.
    pub async fn start(&self) {
        let mut slot = self.event_tasks.lock().await;
        if slot.is_some() {
            warn!("Connection supervisor already started");
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };

        let token = CancellationToken::new();
        let handles = [EventRoute::Control, EventRoute::Traffic]
            .into_iter()
            .map(|route| {
                let events = self.connection.subscribe();
                tokio::spawn(this.clone().run_events(route, events, token.clone()))
            })
            .collect();
        *slot = Some(EventTasks { token, handles });
        debug!("Connection supervisor started");
    }

    /// Connect, retrying transient failures with the generic retry policy
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.abort_reconnect().await;
        self.awaiting.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        let guard = InProgressGuard::new(self.state.clone(), self.awaiting.clone());
        let connection = self.connection.clone();
        let result = retry_with_backoff_while(
            || {
                let connection = connection.clone();
                async move { connection.connect().await }
            },
            &self.connect_retry,
            "XMPP connect",
            |e: &ConnectionError| !e.is_fatal(),
        )
        .await;
        guard.defuse();

        match result {
            Ok(()) => {
                self.on_connected().await;
                Ok(())
            }
            Err(e) => {
                self.on_connect_failed(&e).await;
                Err(e)
            }
        }
    }

    /// Disconnect on request; no reconnection follows
    pub async fn disconnect(&self) {
        self.intentional_disconnect.store(true, Ordering::SeqCst);
        self.abort_reconnect().await;
        self.awaiting.store(false, Ordering::SeqCst);
        self.connection.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected from XMPP server");
    }

    /// Disconnect and stop routing events
    pub async fn shutdown(&self) {
        self.disconnect().await;

        let tasks = self.event_tasks.lock().await.take();
        if let Some(tasks) = tasks {
            tasks.token.cancel();
            for handle in tasks.handles {
                if let Err(e) = handle.await {
                    if !e.is_cancelled() {
                        error!("Connection event task panicked: {}", e);
                    }
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            info!("Connection state: {} -> {}", current, next);
            *current = next;
            true
        });
    }

    async fn on_connected(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.intentional_disconnect.store(false, Ordering::SeqCst);
        self.awaiting.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        info!("Connected as {}", self.connection.address());

        let roster = self.connection.roster().await;
        if !roster.is_empty() {
            sync_roster(self.bridge.directory(), &roster).await;
        }
    }

    async fn on_connect_failed(&self, error: &ConnectionError) {
        if let ConnectionError::AuthRejected(reason) = error {
            self.fail_permanently(reason);
            return;
        }

        self.awaiting.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Failed);
        if self.wants_reconnect() {
            warn!("Connection failed: {}, will keep trying", error);
            self.schedule_reconnect().await;
        } else {
            error!("Connection failed: {}", error);
        }
    }

    fn fail_permanently(&self, reason: &str) {
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.awaiting.store(false, Ordering::SeqCst);
        error!("Authentication rejected, auto-reconnect disabled: {}", reason);
        self.set_state(ConnectionState::Failed);
    }

    fn wants_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst)
            && !self.intentional_disconnect.load(Ordering::SeqCst)
    }

    async fn reconnect_in_flight(&self) -> bool {
        self.reconnect_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    async fn schedule_reconnect(&self) {
        let mut slot = self.reconnect_task.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Reconnect already in progress");
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        self.awaiting.store(true, Ordering::SeqCst);
        *slot = Some(tokio::spawn(this.reconnect_loop()));
    }

    async fn abort_reconnect(&self) {
        let handle = self.reconnect_task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let guard = InProgressGuard::new(self.state.clone(), self.awaiting.clone());
        let max_attempts = self.reconnect_retry.max_attempts;

        loop {
            if !self.wants_reconnect() {
                debug!("Reconnection no longer wanted");
                break;
            }

            let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
            if attempts >= max_attempts {
                self.auto_reconnect.store(false, Ordering::SeqCst);
                error!(
                    "Giving up after {} reconnect attempts, auto-reconnect disabled",
                    attempts
                );
                self.set_state(ConnectionState::Failed);
                break;
            }

            let attempt = attempts + 1;
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);
            self.set_state(ConnectionState::Reconnecting);

            let wait = delay(attempt, &self.reconnect_retry);
            info!(
                "Reconnecting in {:.1}s (attempt {}/{})",
                wait.as_secs_f64(),
                attempt,
                max_attempts
            );
            tokio::time::sleep(wait).await;

            if !self.wants_reconnect() {
                debug!("Reconnection cancelled during backoff");
                break;
            }

            match self.connection.connect().await {
                Ok(()) => {
                    guard.defuse();
                    info!("Reconnected on attempt {}/{}", attempt, max_attempts);
                    self.on_connected().await;
                    return;
                }
                Err(ConnectionError::AuthRejected(reason)) => {
                    guard.defuse();
                    self.fail_permanently(&reason);
                    return;
                }
                Err(e) => warn!("Reconnect attempt {}/{} failed: {}", attempt, max_attempts, e),
            }
        }
    }

    async fn run_events(
        self: Arc<Self>,
        route: EventRoute,
        mut events: broadcast::Receiver<ChatEvent>,
        token: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) if event.is_traffic() != (route == EventRoute::Traffic) => {}
                Ok(event) if route == EventRoute::Traffic => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = self.forward_traffic(event) => {}
                    }
                }
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("{:?} event stream lagged, {} events lost", route, count);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Connection event stream closed");
                    break;
                }
            }
        }
    }

    async fn forward_traffic(&self, event: ChatEvent) {
        let timeout = self.bridge.enqueue_timeout();
        match event {
            ChatEvent::MessageReceived { from, body, kind } => {
                debug!("Message from {}: {}", from, truncate_chars(&body, 100));
                if let Err(e) = self
                    .bridge
                    .receive_chat_message(&from, &body, &kind, timeout)
                    .await
                {
                    warn!("Dropped inbound message from {}: {}", from, e);
                }
            }
            ChatEvent::PresenceReceived {
                from,
                presence_kind,
                status,
            } => {
                if let Err(e) = self
                    .bridge
                    .receive_presence_update(&from, &presence_kind, status.as_deref(), timeout)
                    .await
                {
                    warn!("Dropped presence update from {}: {}", from, e);
                }
            }
            _ => {}
        }
    }

    async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::SessionStarted => {
                if self.state() != ConnectionState::Connected {
                    self.on_connected().await;
                }
            }
            ChatEvent::RosterUpdated { added, removed } => {
                sync_roster_incremental(self.bridge.directory(), &added, &removed).await;
            }
            ChatEvent::Disconnected { reason } => {
                let reconnect = self.wants_reconnect();
                self.awaiting.store(reconnect, Ordering::SeqCst);
                self.set_state(ConnectionState::Disconnected);
                if self.intentional_disconnect.load(Ordering::SeqCst) {
                    info!("Disconnected: {}", reason);
                    return;
                }
                warn!("Connection lost: {}", reason);
                if reconnect {
                    self.schedule_reconnect().await;
                } else {
                    info!("Auto-reconnect disabled, staying disconnected");
                }
            }
            ChatEvent::ConnectionFailed { reason } => {
                if self.reconnect_in_flight().await {
                    debug!("Connection failure during reconnect: {}", reason);
                    return;
                }
                warn!("Connection failed: {}", reason);
                self.awaiting.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Failed);
                if self.wants_reconnect() {
                    self.schedule_reconnect().await;
                }
            }
            ChatEvent::AuthFailed { reason } => self.fail_permanently(&reason),
            ChatEvent::MessageReceived { .. } | ChatEvent::PresenceReceived { .. } => {}
        }
    }
}
