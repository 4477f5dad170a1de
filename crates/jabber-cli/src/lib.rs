//! jabber-mcp - MCP stdio server for an XMPP account
//!
//! Wires configuration, the bridge, and connection supervision to a
//! line-delimited JSON-RPC server on stdin/stdout.

pub mod app;
pub mod cli;
pub mod commands;
pub mod notifier;
pub mod protocol;
pub mod server;

pub use cli::{Cli, Commands, DirectoryCommands};
