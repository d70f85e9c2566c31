use std::time::Duration;

use anyhow::{bail, Context, Result};
use printer_relay::{logging, Opt, PrinterRelay};
use structopt::StructOpt;
use tracing::{info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    logging::init(&opt)?;

    if opt.output_path.as_os_str().is_empty() {
        bail!("Output path not specified.");
    }

    info!("Starting up...");
    info!(port = opt.port, "Listening for SMTP requests on port {}", opt.port);
    info!(path = ?opt.output_path, "Email attachments will be saved to {:?}", opt.output_path);

    let relay = PrinterRelay::startup(opt)
        .await
        .context("Failed to start relay server")?;

    wait_for_exit().await?;
    info!("Shutdown initiated.");
    relay.shutdown().await;

    if tokio::time::timeout(DRAIN_TIMEOUT, relay.workers().drain()).await.is_err() {
        warn!("Gave up waiting for attachments still being processed.");
    }
    info!("Shutdown complete.");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_exit() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl+C")?,
        _ = term.recv() => {}
    }
    info!("Process exit requested.");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_exit() -> Result<()> {
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Process exit requested.");
    Ok(())
}
