//! artwatch service binary.
//! Loads settings, initializes logging and metrics, and runs the polling engine
//! until Ctrl-C / SIGTERM.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use artwatch::config::MonitorConfig;
use artwatch::metrics::Metrics;

async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Ctrl+C detected."),
                    _ = sigterm.recv() => info!("SIGTERM detected."),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C detected.");
    }
    info!("Gracefully stopping...");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; tokens may be provided through it.
    let _ = dotenvy::dotenv();

    let cfg = MonitorConfig::load_default()?;
    let _guard = artwatch::logging::init_tracing(&cfg.log)?;
    info!(owners = cfg.owner_ids.len(), "artwatch has started");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    if let Some(addr) = cfg.metrics_addr.clone() {
        let metrics = Metrics::init()?;
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(&addr, token).await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    match artwatch::run_monitor(&cfg, cancel).await {
        Ok(cycles) => {
            info!(cycles, "artwatch stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "artwatch halted");
            Err(e)
        }
    }
}
