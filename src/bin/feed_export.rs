//! Render the discovery log as an RSS feed at `storage.feed_path`.

use anyhow::{Context, Result};
use artwatch::config::MonitorConfig;
use artwatch::feed::render_rss;
use artwatch::store::{write_atomic, DiscoveryLog};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = MonitorConfig::load_default()?;
    let log = DiscoveryLog::new(&cfg.storage.log_path);
    let entries = log.entries().await.context("reading discovery log")?;
    let xml = render_rss(&entries, &cfg.feed)?;

    write_atomic(&cfg.storage.feed_path, xml.as_bytes())
        .await
        .context("writing feed")?;

    tracing::info!(
        entries = entries.len(),
        path = %cfg.storage.feed_path.display(),
        "feed written"
    );
    Ok(())
}
