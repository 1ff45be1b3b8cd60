use clap::Parser;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use livepoll::cli::{self, Cli, Command, ConfigCommand};
use livepoll::config;
use livepoll::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config_path();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => run_server(&config_path).await,
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(&config_path),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path(&config_path);
            Ok(())
        }
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_from(config_path)?;
    livepoll::tracing::init_tracing(&cfg.logging)?;
    if let Err(err) = config::ensure_valid(&cfg) {
        error!(path = %config_path.display(), "{}", err);
        return Err(err.into());
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting livepoll"
    );

    let state = AppState::new(&cfg.polls);
    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server::serve(state, &cfg.server, shutdown).await?;
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn wait_for_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
