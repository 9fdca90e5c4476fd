// src/notify/ntfy.rs
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::Notifier;
use crate::engine::DiscoveryEvent;
use crate::model::SENSITIVE_TAG;

/// Push message prepared for ntfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfyMessage {
    pub title: String,
    pub body: String,
    pub click: String,
    pub tags: Option<String>,
}

/// Works on batch summaries only: one push per owner and task. More than one
/// new item collapses into a summary that links to the owner page.
pub fn message_for(ev: &DiscoveryEvent) -> Option<NtfyMessage> {
    let DiscoveryEvent::BatchSummary {
        new_count,
        first_item,
        ..
    } = ev
    else {
        return None;
    };
    let tags = first_item
        .sensitive()
        .then(|| SENSITIVE_TAG.to_string());
    if *new_count > 1 {
        Some(NtfyMessage {
            title: "artwatch".into(),
            body: format!("{} new works from {}", new_count, first_item.owner.name),
            click: first_item.owner.link(),
            tags,
        })
    } else {
        Some(NtfyMessage {
            title: "artwatch".into(),
            body: format!("'{}' by {}", first_item.title, first_item.owner.name),
            click: first_item.link(),
            tags,
        })
    }
}

#[derive(Clone)]
pub struct NtfyNotifier {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl NtfyNotifier {
    pub fn new(server: &str, topic: &str) -> Self {
        Self {
            url: format!("{}/{}", server.trim_end_matches('/'), topic.trim()),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    async fn send(&self, ev: &DiscoveryEvent) -> Result<()> {
        let Some(msg) = message_for(ev) else {
            return Ok(());
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let mut req = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .header("Title", msg.title.as_str())
                .header("Click", msg.click.as_str())
                .body(msg.body.clone());
            if let Some(tags) = &msg.tags {
                req = req.header("Tags", tags.as_str());
            }

            let err = match req.send().await {
                Ok(rsp) => match rsp.error_for_status() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("ntfy HTTP error: {e}"),
                },
                Err(e) => anyhow!("ntfy request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::sample_item;
    use std::sync::Arc;

    #[test]
    fn single_item_links_to_the_work() {
        let item = Arc::new(sample_item(42, "2024-01-01T00:00:00Z"));
        let ev = DiscoveryEvent::BatchSummary {
            owner: 7,
            new_count: 1,
            first_item: item,
        };
        let m = message_for(&ev).unwrap();
        assert_eq!(m.body, "'work 42' by Artist");
        assert!(m.click.ends_with("/artworks/42"));
        assert!(m.tags.is_none());
    }

    #[test]
    fn several_items_collapse_to_owner_summary() {
        let item = Arc::new(sample_item(42, "2024-01-01T00:00:00Z"));
        let ev = DiscoveryEvent::BatchSummary {
            owner: 7,
            new_count: 3,
            first_item: item,
        };
        let m = message_for(&ev).unwrap();
        assert_eq!(m.body, "3 new works from Artist");
        assert!(m.click.ends_with("/users/7"));
    }

    #[test]
    fn per_item_events_are_ignored() {
        let item = Arc::new(sample_item(1, "2024-01-01T00:00:00Z"));
        assert!(message_for(&DiscoveryEvent::ItemDiscovered { item }).is_none());
    }

    #[test]
    fn url_joins_server_and_topic() {
        let n = NtfyNotifier::new("https://ntfy.sh/", "art");
        assert_eq!(n.url(), "https://ntfy.sh/art");
    }
}
