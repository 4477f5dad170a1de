use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jabber_core::Config;
use secrecy::SecretString;

/// jabber-mcp - MCP stdio server bridging an XMPP account
#[derive(Parser, Debug, Clone)]
#[command(name = "jabber-mcp")]
#[command(about = "Expose an XMPP account to MCP clients over stdio")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Account address, overriding the config file
    #[arg(long, env = "XMPP_JID", value_name = "JID")]
    pub jid: Option<String>,

    /// Account password, overriding the config file
    #[arg(long, env = "XMPP_PASSWORD", value_name = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to the address book file
    #[arg(long, value_name = "FILE")]
    pub address_book: Option<PathBuf>,

    /// Capacity of each bridge channel
    #[arg(long, value_name = "N")]
    pub queue_size: Option<usize>,

    /// Maximum number of inbox messages kept
    #[arg(long, value_name = "N")]
    pub inbox_capacity: Option<usize>,

    /// Do not reconnect after the connection drops
    #[arg(long)]
    pub no_auto_reconnect: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Manage the address book without starting the server
    Directory {
        #[command(subcommand)]
        subcommand: DirectoryCommands,
    },
}

/// Address book subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCommands {
    /// List every alias
    List,
    /// Add or update an alias
    Add {
        alias: String,
        jid: String,
    },
    /// Remove an alias
    Remove {
        alias: String,
    },
    /// Fuzzy-search aliases and addresses
    Query {
        term: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(jid) = &self.jid {
            config.xmpp.jid = Some(jid.clone());
        }
        if let Some(password) = &self.password {
            config.xmpp.password = SecretString::new(password.clone());
        }
        if let Some(path) = &self.address_book {
            config.directory.path = Some(path.clone());
        }
        if let Some(size) = self.queue_size {
            config.bridge.queue_size = size;
        }
        if let Some(capacity) = self.inbox_capacity {
            config.bridge.inbox_capacity = capacity;
        }
        if self.no_auto_reconnect {
            config.xmpp.auto_reconnect = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_server_flags() {
        let cli = Cli::parse_from([
            "jabber-mcp",
            "--jid",
            "bot@example.com",
            "--password",
            "hunter2",
            "--queue-size",
            "10",
            "--inbox-capacity",
            "20",
            "--no-auto-reconnect",
            "-v",
        ]);
        assert!(cli.verbose);
        assert!(cli.command.is_none());

        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.xmpp.jid.as_deref(), Some("bot@example.com"));
        assert_eq!(config.xmpp.password.expose_secret(), "hunter2");
        assert_eq!(config.bridge.queue_size, 10);
        assert_eq!(config.bridge.inbox_capacity, 20);
        assert!(!config.xmpp.auto_reconnect);
    }

    #[test]
    fn test_overrides_keep_config_values() {
        let cli = Cli::parse_from(["jabber-mcp", "--address-book", "/tmp/book.json"]);
        let mut config = Config::default();
        config.bridge.queue_size = 42;
        cli.apply_overrides(&mut config);
        assert_eq!(config.bridge.queue_size, 42);
        assert!(config.xmpp.auto_reconnect);
        assert_eq!(config.directory.path, Some(PathBuf::from("/tmp/book.json")));
    }

    #[test]
    fn test_directory_subcommands() {
        let cli = Cli::parse_from(["jabber-mcp", "directory", "add", "alice", "a@x.com"]);
        match cli.command {
            Some(Commands::Directory { subcommand }) => assert_eq!(
                subcommand,
                DirectoryCommands::Add {
                    alias: "alice".into(),
                    jid: "a@x.com".into()
                }
            ),
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::parse_from(["jabber-mcp", "directory", "query", "ali"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Directory {
                subcommand: DirectoryCommands::Query { .. }
            })
        ));
    }
}
