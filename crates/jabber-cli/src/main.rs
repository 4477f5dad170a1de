use std::process;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use jabber_cli::app::App;
use jabber_cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    info!("Starting jabber-mcp v{}", env!("CARGO_PKG_VERSION"));

    if let Some(Commands::Directory { subcommand }) = cli.command.clone() {
        let mut config = jabber_core::load_config(cli.config_file.as_deref())?;
        cli.apply_overrides(&mut config);
        let path = config.directory.resolved_path();
        jabber_cli::commands::directory::execute(subcommand, &path, &config).await?;
        return Ok(());
    }

    let app = App::create(&cli).await?;
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    app.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), interrupt)
        .await?;

    Ok(())
}

/// Log to stderr; stdout carries the JSON-RPC stream
fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
