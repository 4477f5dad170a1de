//! Application wiring
//!
//! Builds the bridge, connection supervisor, and MCP server from the
//! configuration and runs them until stdin closes.

use std::future::Future;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use jabber_core::{
    Bridge, BridgeError, ChatConnection, Config, ConfigError, ConnectionSupervisor, Directory,
    LoopbackConnection, ValidationError, load_config, validation::validate_address,
};

use crate::cli::Cli;
use crate::notifier::forward_inbox_notifications;
use crate::server::{McpServer, ServerError, write_lines};

const OUTPUT_BUFFER: usize = 256;

/// Application errors
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No account configured: pass --jid, set XMPP_JID, or set xmpp.jid in the config file")]
    MissingJid,

    #[error("Invalid account address: {0}")]
    InvalidJid(#[from] ValidationError),
}

/// Main application structure
pub struct App {
    bridge: Arc<Bridge>,
    supervisor: Arc<ConnectionSupervisor>,
}

impl App {
    /// Create an application from CLI arguments and the config file
    pub async fn create(cli: &Cli) -> Result<Self, AppError> {
        let mut config = load_config(cli.config_file.as_deref())?;
        cli.apply_overrides(&mut config);
        config.validate()?;
        debug!("Configuration loaded");
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let jid = config.xmpp.jid.as_deref().ok_or(AppError::MissingJid)?;
        let jid = validate_address(jid)?.to_string();
        if config.xmpp.password.expose_secret().is_empty() {
            warn!("No password configured for {}", jid);
        }

        warn!(
            "No network transport is built in; {} runs on the in-process loopback connection",
            jid
        );
        let connection: Arc<dyn ChatConnection> = Arc::new(LoopbackConnection::new(jid));

        let path = config.directory.resolved_path();
        info!("Using address book {}", path.display());
        let directory = Arc::new(Directory::new(path));

        let bridge = Arc::new(Bridge::new(config, directory, connection.clone())?);
        let supervisor = ConnectionSupervisor::new(connection, bridge.clone(), config);

        Ok(Self { bridge, supervisor })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Serve JSON-RPC on `reader`/`writer` until EOF or `interrupt` resolves
    pub async fn run<R, W, I>(self, reader: R, writer: W, interrupt: I) -> Result<(), AppError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        I: Future<Output = ()>,
    {
        self.start().await;

        let (output, lines) = mpsc::channel(OUTPUT_BUFFER);
        let token = CancellationToken::new();
        let notifier = tokio::spawn(forward_inbox_notifications(
            self.bridge.received_log().subscribe(),
            output.clone(),
            token.clone(),
        ));
        let server = McpServer::new(self.bridge.clone());

        let serve = async {
            let result = tokio::select! {
                result = server.serve(reader, output) => result,
                _ = interrupt => {
                    info!("Interrupted, shutting down");
                    Ok(())
                }
            };
            token.cancel();
            if let Err(e) = notifier.await {
                warn!("Notification task failed: {}", e);
            }
            self.shutdown().await;
            result
        };

        let (served, written) = tokio::join!(serve, write_lines(writer, lines));
        served?;
        written?;
        Ok(())
    }

    async fn start(&self) {
        self.bridge.start().await;
        self.supervisor.start().await;
        if let Err(e) = self.supervisor.connect().await {
            warn!("Serving without a connection: {}", e);
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down");
        self.supervisor.shutdown().await;
        self.bridge.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.xmpp.jid = Some("bot@x.com".into());
        config.directory.path = Some(dir.path().join("address_book.json"));
        config.bridge.poll_interval = Duration::from_millis(10);
        config.bridge.shutdown_grace = Duration::from_millis(500);
        config
    }

    #[test]
    fn test_missing_or_invalid_jid() {
        let mut config = Config::default();
        assert!(matches!(App::from_config(&config), Err(AppError::MissingJid)));

        config.xmpp.jid = Some("not-an-address".into());
        assert!(matches!(App::from_config(&config), Err(AppError::InvalidJid(_))));
    }

    #[tokio::test]
    async fn test_run_until_eof_saves_directory() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let app = App::from_config(&config).unwrap();

        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"address_book/save","params":{"alias":"alice","jid":"a@x.com"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"ping"}}"#,
            "\n",
        );
        let mut output = Vec::new();
        app.run(
            BufReader::new(input.as_bytes()),
            &mut output,
            std::future::pending(),
        )
        .await
        .unwrap();

        let replies: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["result"]["status"], "Entry updated");
        assert_eq!(
            replies[1]["result"]["content"][0]["text"],
            "PONG! XMPP connection status: connected"
        );

        let saved = Directory::new(dir.path().join("address_book.json"));
        assert_eq!(saved.load().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_message_to_self_raises_notification() {
        let dir = TempDir::new().unwrap();
        let app = App::from_config(&config(&dir)).unwrap();

        let (mut client_in, server_in) = tokio::io::duplex(4096);
        let (server_out, client_out) = tokio::io::duplex(4096);
        let running = tokio::spawn(app.run(
            BufReader::new(server_in),
            server_out,
            std::future::pending::<()>(),
        ));

        let request = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"send_xmpp_message","arguments":{"recipient":"bot@x.com","message":"note to self"}}}"#;
        client_in.write_all(request.as_bytes()).await.unwrap();
        client_in.write_all(b"\n").await.unwrap();

        let mut lines = BufReader::new(client_out).lines();
        let mut saw_reply = false;
        let notification = tokio::time::timeout(Duration::from_secs(3), async {
            while let Some(line) = lines.next_line().await.unwrap() {
                let value: Value = serde_json::from_str(&line).unwrap();
                if value["id"] == 7 {
                    saw_reply = true;
                }
                if value["method"] == "inbox/new" {
                    return value;
                }
            }
            panic!("output closed before notification");
        })
        .await
        .unwrap();

        assert!(saw_reply);
        assert_eq!(notification["params"]["from"], "bot@x.com");
        assert_eq!(notification["params"]["body"], "note to self");

        drop(client_in);
        running.await.unwrap().unwrap();
    }
}
