mod discovery;
mod error;
mod humanize;
mod intense;
mod known_shops;
mod marketplace;
mod poll;
mod schedule;
mod scheduler;
mod supervisor;
#[cfg(test)]
mod testing;
mod token_store;
mod transport;
mod watchdog;

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::schedule::ScheduleSpec;

/// Publishes TooGoodToGo favourites to MQTT with home-automation discovery.
#[derive(Debug, Parser)]
#[command(name = "tgbridge-server", version, about)]
struct Cli {
    /// Load environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Print the resolved configuration and the next run, then exit.
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.env_file {
        Some(path) => tgbridge_core::load_app_config_from_file(path)?,
        None => tgbridge_core::load_app_config()?,
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if cli.check_config {
        return check_config(&config);
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    supervisor::run(config, shutdown).await
}

fn check_config(config: &tgbridge_core::AppConfig) -> anyhow::Result<()> {
    let schedule = ScheduleSpec::from_source(&config.schedule, config.randomize_calls)?;
    let now = Utc::now().with_timezone(&config.timezone);
    let next = schedule.next_run(now)?;
    let timeout =
        schedule.watchdog_timeout(now, Duration::from_secs(config.request_timeout_secs))?;

    println!("{config:#?}");
    println!("schedule: {}", schedule.expression());
    println!("next run: {} (in {}s)", next.at, next.delay.as_secs());
    println!("watchdog timeout: {}s", timeout.as_secs());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
