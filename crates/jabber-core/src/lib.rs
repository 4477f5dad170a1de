//! jabber-core - Chat bridge, inbox, contact directory, and connection supervision

pub mod bridge;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod fuzzy;
pub mod inbox;
pub mod loopback;
pub mod pump;
pub mod queue;
pub mod received_log;
pub mod resolve;
pub mod retry;
pub mod roster;
pub mod supervisor;
pub mod types;
pub mod validation;

pub use bridge::Bridge;
pub use config::{Config, ConfigError, load_config, save_config};
pub use connection::{ChatConnection, ChatEvent};
pub use directory::Directory;
pub use error::{
    BridgeError, ConnectionError, Direction, DirectoryError, ResolveError, ValidationError,
};
pub use inbox::Inbox;
pub use loopback::LoopbackConnection;
pub use received_log::{ReceivedEntry, ReceivedLog};
pub use retry::RetryConfig;
pub use roster::{RosterEntry, SyncStats};
pub use supervisor::ConnectionSupervisor;
pub use types::*;
