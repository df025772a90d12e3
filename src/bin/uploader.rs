use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use anyhow::Context;
use tor_metrics::{
    config::{Config, ConfigError},
    control::TorControlClient,
    health::FileArtifact,
    publish::InfluxWriter,
    scheduler::{Scheduler, shutdown_signal},
};

/// Tor stats to InfluxDB v2 uploader
#[derive(Debug, Clone, Parser)]
struct Args {
    /// Just print the results without uploading to InfluxDB
    #[arg(short, long)]
    test: bool,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_target("tor_metrics", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_env();
    init(config.as_ref().map_or(LevelFilter::INFO, Config::log_level));
    trace!("started with args: {args:?}");

    let scheduler = match setup(config, args.test) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received, shutting down..");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
}

fn setup(
    config: Result<Config, ConfigError>,
    dry_run: bool,
) -> anyhow::Result<Scheduler<TorControlClient, InfluxWriter, FileArtifact>> {
    let config = config.context("invalid configuration")?;

    info!("starting with {} targets:", config.targets.len());
    for target in &config.targets {
        info!("  {target}");
    }
    trace!("healthcheck file => {}", config.healthcheck_path.display());

    Scheduler::from_config(&config, dry_run).with_context(|| {
        format!(
            "could not initialise healthcheck file {}",
            config.healthcheck_path.display()
        )
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("could not install SIGTERM handler: {e}");
            shutdown_signal(tokio::signal::ctrl_c()).await;
            return;
        }
    };

    tokio::select! {
        _ = shutdown_signal(tokio::signal::ctrl_c()) => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    shutdown_signal(tokio::signal::ctrl_c()).await;
}

