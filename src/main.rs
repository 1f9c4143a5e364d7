//! Entry point: parses configuration, wires up logging, opens the
//! downstream sink, and drives the replication session to completion or a
//! fatal error.

mod aggregator;
mod config;
mod errors;
mod formatter;
mod pg;
mod sink;
mod supervisor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{Args, Config};
use crate::sink::{FirehoseClient, SinkClient};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let filter = std::env::var("PG2KINESIS_LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> errors::Result<()> {
    let args = Args::parse();
    let cfg = Config::from_args(args)?;

    let firehose = FirehoseClient::new(cfg.stream_name.clone()).await;
    let sink = Arc::new(SinkClient::with_backoff_limit(firehose, cfg.back_off_limit).await?);
    info!(stream = %cfg.stream_name, "downstream sink reachable");

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handler(Arc::clone(&shutdown));

    let handle = tokio::runtime::Handle::current();
    let cfg = Arc::new(cfg);
    tokio::task::spawn_blocking(move || {
        let _guard = handle.enter();
        supervisor::run(&cfg, &sink, &shutdown)
    })
    .await
    .map_err(|e| errors::Error::Other(e.into()))??;

    Ok(())
}

fn install_signal_handler(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });
}
