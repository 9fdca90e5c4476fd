//! Recreate the seen-id file from the discovery log.

use anyhow::{Context, Result};
use artwatch::config::MonitorConfig;
use artwatch::store::{DiscoveryLog, SeenStore};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = MonitorConfig::load_default()?;
    let log = DiscoveryLog::new(&cfg.storage.log_path);
    let entries = log.entries().await.context("reading discovery log")?;

    let seen = SeenStore::empty(&cfg.storage.seen_path);
    let total = entries.len();
    for (i, e) in entries.iter().enumerate() {
        tracing::debug!("[{}/{}] {}", i + 1, total, e.id);
        seen.add(e.id);
    }
    seen.flush().await.context("writing seen store")?;

    tracing::info!(ids = seen.len(), path = %seen.path().display(), "seen store rebuilt");
    Ok(())
}
