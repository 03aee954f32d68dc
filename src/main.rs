//! logship - ship stdin log lines through the delivery pipeline
//!
//! Usage:
//!   app | logship --url https://collector/logs
//!   app | logship --config logship.toml --offline-dir ./backlog
//!   app | logship --ws-url ws://collector:9000 --level warn -v

use clap::Parser;
use logship::cli::{parse_line, Cli};
use logship::config::{self, Config};
use logship::{init_tracing, Logger, Result, ShipError};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let rt = tokio::runtime::Runtime::new().map_err(|e| ShipError::Io {
        path: PathBuf::from("tokio-runtime"),
        source: e,
    })?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    let logger = config::logger_builder(&config)?.build()?;

    // Setup shutdown handler
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                eprintln!("Interrupted, flushing...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => ship(&logger, &line),
                Ok(None) => break,
                Err(e) => {
                    eprintln!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    }

    logger.close().await;
    let stats = logger.stats();
    eprintln!(
        "accepted {}, delivered {}, parked {}, failed batches {}, offline pending {}",
        stats.accepted, stats.delivered, stats.parked, stats.failed_batches, stats.offline_pending
    );
    Ok(())
}

fn ship(logger: &Logger, line: &str) {
    if let Some(input) = parse_line(line) {
        logger.log(input.level, input.message, input.data, None);
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
