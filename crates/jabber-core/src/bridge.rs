//! The bridge: channel pair, inbox, and the two pump loops
//!
//! Inbound items (chat to tool side) are recorded in the received log and
//! handed to the pump, which persists valid chat messages in the inbox.
//! Outbound items (tool to chat side) are handed to the pump for delivery.
//! Every enqueue applies the same back-pressure policy: a non-blocking put,
//! then a bounded wait, then a visible failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{BridgeConfig, Config, DirectoryConfig};
use crate::connection::ChatConnection;
use crate::directory::Directory;
use crate::error::{BridgeError, ConnectionError, Direction, ValidationError};
use crate::inbox::Inbox;
use crate::pump::{ChatPump, Lifecycle, MessagePump, PumpContext};
use crate::queue::{BoundedChannel, ChannelPair};
use crate::received_log::ReceivedLog;
use crate::resolve::pick_unique;
use crate::types::{
    ConnectionState, DirectoryMatch, InboxRecord, InboxStats, QueueItem, QueueStats,
    truncate_chars,
};
use crate::validation::{MAX_BODY_LENGTH, validate_address, validate_alias};

struct PumpTasks {
    token: CancellationToken,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

/// Owns the channel pair and inbox and runs the pump loops
pub struct Bridge {
    config: BridgeConfig,
    search: DirectoryConfig,
    channels: Arc<ChannelPair>,
    inbox: Arc<Inbox>,
    received: Arc<ReceivedLog>,
    directory: Arc<Directory>,
    pump: Arc<dyn MessagePump>,
    hooks: Vec<Arc<dyn Lifecycle>>,
    tasks: Mutex<Option<PumpTasks>>,
    running: AtomicBool,
    state: Arc<watch::Sender<ConnectionState>>,
    awaiting_connection: Arc<AtomicBool>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("search", &self.search)
            .field("channels", &self.channels)
            .field("inbox", &self.inbox)
            .field("received", &self.received)
            .field("directory", &self.directory)
            .field("running", &self.running)
            .field("awaiting_connection", &self.awaiting_connection)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Bridge delivering outbound messages through `connection`
    pub fn new(
        config: &Config,
        directory: Arc<Directory>,
        connection: Arc<dyn ChatConnection>,
    ) -> Result<Self, BridgeError> {
        Self::with_pump(config, directory, move |ctx| -> Arc<dyn MessagePump> {
            Arc::new(ChatPump::new(ctx, connection))
        })
    }

    /// Bridge with a custom pump built from the shared state
    pub fn with_pump<F>(
        config: &Config,
        directory: Arc<Directory>,
        make_pump: F,
    ) -> Result<Self, BridgeError>
    where
        F: FnOnce(PumpContext) -> Arc<dyn MessagePump>,
    {
        if config.bridge.queue_size == 0 {
            return Err(BridgeError::InvalidConfig("queue size must be > 0".into()));
        }
        let inbox = Inbox::new(config.bridge.inbox_capacity)
            .map(Arc::new)
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let pump = make_pump(PumpContext {
            inbox: inbox.clone(),
            state: state_rx,
        });

        let hooks = vec![directory.clone() as Arc<dyn Lifecycle>];

        Ok(Self {
            config: config.bridge.clone(),
            search: config.directory.clone(),
            channels: Arc::new(ChannelPair::new(config.bridge.queue_size)),
            inbox,
            received: Arc::new(ReceivedLog::new(config.bridge.received_log_capacity)),
            directory,
            pump,
            hooks,
            tasks: Mutex::new(None),
            running: AtomicBool::new(false),
            state: Arc::new(state_tx),
            awaiting_connection: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Launch the pump loops; a no-op when already running
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_some() {
            warn!("Bridge is already running");
            return;
        }

        for hook in &self.hooks {
            if let Err(e) = hook.on_start().await {
                warn!("Bridge start hook failed: {}", e);
            }
        }

        let token = CancellationToken::new();
        let poll = self.config.poll_interval;

        let inbound = tokio::spawn(run_inbound(
            self.channels.clone(),
            self.pump.clone(),
            self.received.clone(),
            token.clone(),
            poll,
        ));
        let outbound = tokio::spawn(run_outbound(
            self.channels.clone(),
            self.pump.clone(),
            token.clone(),
            poll,
        ));

        *tasks = Some(PumpTasks {
            token,
            inbound,
            outbound,
        });
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Bridge started (queue size {}, inbox capacity {})",
            self.config.queue_size,
            self.inbox.capacity()
        );
    }

    /// Stop the pump loops and wait for them; a no-op when not running
    pub async fn stop(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            warn!("Bridge is not running");
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        tasks.token.cancel();

        let grace = self.config.shutdown_grace;
        futures::future::join(
            join_pump("inbound", tasks.inbound, grace),
            join_pump("outbound", tasks.outbound, grace),
        )
        .await;

        for hook in self.hooks.iter().rev() {
            if let Err(e) = hook.on_stop().await {
                error!("Bridge stop hook failed: {}", e);
            }
        }
        info!("Bridge stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Queue a chat message for delivery
    ///
    /// Fails immediately when the connection is `Failed`, or `Disconnected`
    /// with no connect attempt pending, and with a back-pressure error when
    /// the outbound channel stays full for `timeout`.
    pub async fn send_chat_message(
        &self,
        to: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        let to = validate_address(to)?;
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        if body.chars().count() > MAX_BODY_LENGTH {
            return Err(ValidationError::BodyTooLong {
                max: MAX_BODY_LENGTH,
            }
            .into());
        }

        let state = self.get_connection_state();
        let abandoned = state == ConnectionState::Disconnected
            && !self.awaiting_connection.load(Ordering::SeqCst);
        if state == ConnectionState::Failed || abandoned {
            return Err(ConnectionError::NotConnected(state.to_string()).into());
        }

        self.enqueue(Direction::Outbound, QueueItem::outbound_send(to, body), timeout)
            .await?;
        debug!("Queued message to {}: {}", to, truncate_chars(body, 100));
        Ok(())
    }

    /// Resolve `recipient` and queue a message to it, returning the address used
    pub async fn send_to_recipient(
        &self,
        recipient: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<String, BridgeError> {
        let address = self.resolve_recipient(recipient).await?;
        self.send_chat_message(&address, body, timeout).await?;
        Ok(address)
    }

    /// Queue a chat message observed on the connection
    pub async fn receive_chat_message(
        &self,
        from: &str,
        body: &str,
        kind: &str,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        self.enqueue(
            Direction::Inbound,
            QueueItem::inbound_received(from, body, kind),
            timeout,
        )
        .await
    }

    /// Queue a presence change observed on the connection
    pub async fn receive_presence_update(
        &self,
        from: &str,
        presence_kind: &str,
        status: Option<&str>,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        self.enqueue(
            Direction::Inbound,
            QueueItem::inbound_presence(from, presence_kind, status.map(str::to_string)),
            timeout,
        )
        .await
    }

    async fn enqueue(
        &self,
        direction: Direction,
        item: QueueItem,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        let channel = self.channel(direction);
        let item = match channel.try_put(item) {
            Ok(()) => return Ok(()),
            Err(item) => item,
        };

        warn!(
            "{} queue is full ({}/{}), attempting timed put",
            direction,
            channel.size(),
            channel.capacity()
        );
        match channel.put_with_timeout(item, timeout).await {
            Ok(()) => Ok(()),
            Err(_) => {
                let size = channel.size();
                warn!(
                    "Dropped {} item: queue still full ({}/{}) after {:?}",
                    direction,
                    size,
                    channel.capacity(),
                    timeout
                );
                Err(BridgeError::BackPressure {
                    direction,
                    size,
                    capacity: channel.capacity(),
                    timeout,
                })
            }
        }
    }

    fn channel(&self, direction: Direction) -> &BoundedChannel {
        match direction {
            Direction::Inbound => &self.channels.inbound,
            Direction::Outbound => &self.channels.outbound,
        }
    }

    pub async fn list_inbox(&self, limit: Option<usize>) -> Vec<InboxRecord> {
        self.inbox.list(limit).await
    }

    pub async fn get_inbox_message(&self, id: Uuid) -> Option<InboxRecord> {
        self.inbox.get(id).await
    }

    pub async fn clear_inbox(&self) -> usize {
        let removed = self.inbox.clear().await;
        info!("Cleared {} messages from inbox", removed);
        removed
    }

    pub async fn inbox_stats(&self) -> InboxStats {
        self.inbox.stats().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        QueueStats {
            inbound_size: self.channels.inbound.size(),
            inbound_capacity: self.channels.inbound.capacity(),
            outbound_size: self.channels.outbound.size(),
            outbound_capacity: self.channels.outbound.capacity(),
        }
    }

    /// Directory hits at or above the threshold, best first
    ///
    /// Equal scores keep the directory's alphabetical order.
    pub async fn query_directory(&self, term: &str) -> Vec<DirectoryMatch> {
        self.directory.search(term, &self.search).await
    }

    /// Store an alias, persisting the directory when the mapping changed
    ///
    /// If the file cannot be written the in-memory entry is restored to its
    /// previous value before the error is returned.
    pub async fn save_directory_alias(&self, alias: &str, address: &str) -> Result<bool, BridgeError> {
        let alias = validate_alias(alias)?;
        let address = validate_address(address)?;

        let previous = self.directory.get_exact(alias).await;
        let changed = self.directory.save_alias(alias, address).await?;
        if changed {
            if let Err(e) = self.directory.save().await {
                warn!("Failed to persist alias '{}', reverting: {}", alias, e);
                match previous {
                    Some(previous) => {
                        self.directory.save_alias(alias, &previous).await?;
                    }
                    None => {
                        self.directory.remove_alias(alias).await;
                    }
                }
                return Err(e.into());
            }
        }
        Ok(changed)
    }

    /// Turn a recipient string into an address
    ///
    /// Strings containing `@` are taken literally. Otherwise an exact alias
    /// wins, then a fuzzy search that must yield exactly one contact.
    pub async fn resolve_recipient(&self, recipient: &str) -> Result<String, BridgeError> {
        let recipient = recipient.trim();
        if recipient.contains('@') {
            return Ok(validate_address(recipient)?.to_string());
        }
        if recipient.is_empty() {
            return Err(ValidationError::EmptyAddress.into());
        }
        if let Some(address) = self.directory.get_exact(recipient).await {
            debug!("Resolved alias '{}' to {}", recipient, address);
            return Ok(address);
        }

        let matches = self.query_directory(recipient).await;
        let address = pick_unique(recipient, matches)?;
        debug!("Resolved '{}' to {} by fuzzy match", recipient, address);
        Ok(address)
    }

    pub fn get_connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Handle for the component that drives connection state
    pub fn connection_state_publisher(&self) -> Arc<watch::Sender<ConnectionState>> {
        self.state.clone()
    }

    /// Flag the supervisor raises while a connect or reconnect is pending
    ///
    /// Starts raised, since a fresh bridge is waiting for its first connect.
    pub fn awaiting_connection_flag(&self) -> Arc<AtomicBool> {
        self.awaiting_connection.clone()
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn received_log(&self) -> &Arc<ReceivedLog> {
        &self.received
    }

    /// Default wait used by callers that have no deadline of their own
    pub fn enqueue_timeout(&self) -> Duration {
        self.config.enqueue_timeout
    }
}

async fn join_pump(name: &str, handle: JoinHandle<()>, grace: Duration) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(())) => debug!("{} pump exited", name),
        Ok(Err(e)) if e.is_cancelled() => debug!("{} pump cancelled", name),
        Ok(Err(e)) => error!("{} pump panicked: {}", name, e),
        Err(_) => {
            warn!("{} pump did not stop within {:?}, aborting", name, grace);
            abort.abort();
        }
    }
}

async fn run_inbound(
    channels: Arc<ChannelPair>,
    pump: Arc<dyn MessagePump>,
    received: Arc<ReceivedLog>,
    token: CancellationToken,
    poll: Duration,
) {
    debug!("Inbound pump started");
    loop {
        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            item = channels.inbound.try_get_with_timeout(poll) => item,
        };
        let Some(item) = item else { continue };

        received.push(item.clone()).await;
        match pump.process_inbound(item).await {
            Ok(()) => {}
            Err(BridgeError::BestEffortDrop { from, reason }) => {
                warn!("Skipped invalid message from {}: {}", from, reason);
            }
            Err(e) => error!("Error processing inbound item: {}", e),
        }
    }
    debug!("Inbound pump stopped");
}

async fn run_outbound(
    channels: Arc<ChannelPair>,
    pump: Arc<dyn MessagePump>,
    token: CancellationToken,
    poll: Duration,
) {
    debug!("Outbound pump started");
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = pump.outbound_ready() => {}
        }

        let item = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            item = channels.outbound.try_get_with_timeout(poll) => item,
        };
        let Some(item) = item else { continue };

        if let Err(e) = pump.process_outbound(item).await {
            error!("Failed to deliver outbound message: {}", e);
        }
    }
    debug!("Outbound pump stopped");
}
