//! Print the profile of every configured owner and exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use artwatch::config::MonitorConfig;
use artwatch::credentials::{oauth::OAuthIssuer, CredentialPool};
use artwatch::source::app_api::AppApiSource;
use artwatch::source::lookup::lookup_owner;
use artwatch::RetryPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();

    let cfg = MonitorConfig::load_default()?;
    let pool = CredentialPool::new(
        cfg.resolve_credentials()?,
        Arc::new(OAuthIssuer::new(&cfg.api)?),
    );
    let api = AppApiSource::new(&cfg.api)?;
    let source = &api;
    let retry = RetryPolicy {
        delay: cfg.retry_delay(),
        transient_retry_limit: cfg.retry.transient_retry_limit,
    };

    println!("Will list {} owners.", cfg.owner_ids.len());
    for &owner in &cfg.owner_ids {
        let found = lookup_owner(&pool, &retry, owner, move |slot| async move {
            source.user_detail(owner, &slot).await
        })
        .await
        .with_context(|| format!("looking up owner {owner}"))?;
        println!("{} | ID: {} | @{}", found.name, found.id, found.handle);
    }
    Ok(())
}
