//! Sheikh - command-line client for the Sheikh conversation backend
//!
#![doc = "Main entry point for the sheikh binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheikh_chat::cli::Cli;
use sheikh_chat::commands;
use sheikh_chat::config::Config;
use sheikh_chat::ChatContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    let config_path = cli.config.as_deref().unwrap_or("config/sheikh.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    tracing::debug!("Using backend at {}", config.server.base_url);

    let mut chat = ChatContext::from_config(&config)?;
    commands::run(&mut chat, cli.command).await
}

/// Initialize tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output for
/// this crate.
fn init_tracing(verbose: bool) {
    let default_directive = if verbose {
        "sheikh_chat=debug"
    } else {
        "sheikh_chat=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
