// src/feed.rs
//! RSS 2.0 rendering of the discovery log.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::FeedConfig;
use crate::model::{plain_text, ITEM_LINK_BASE};
use crate::store::LogEntry;

#[derive(Serialize)]
#[serde(rename = "rss")]
struct Rss<'a> {
    #[serde(rename = "@version")]
    version: &'static str,
    channel: Channel<'a>,
}

#[derive(Serialize)]
struct Channel<'a> {
    title: &'a str,
    link: &'a str,
    description: &'a str,
    #[serde(rename = "item")]
    items: Vec<FeedItem>,
}

#[derive(Serialize)]
struct FeedItem {
    title: String,
    link: String,
    description: String,
    guid: String,
    #[serde(rename = "pubDate")]
    pub_date: String,
}

impl From<&LogEntry> for FeedItem {
    fn from(e: &LogEntry) -> Self {
        let caption = plain_text(&e.caption);
        Self {
            title: format!("{} by {} (@{})", e.title, e.user.name, e.user.handle),
            link: format!("{ITEM_LINK_BASE}/{}", e.id),
            description: if caption.is_empty() {
                "no description specified".into()
            } else {
                caption
            },
            guid: format!("artwatch-{}", e.id),
            pub_date: e.create_timestamp.to_rfc2822(),
        }
    }
}

/// Render entries (already newest first) as an RSS document.
pub fn render_rss(entries: &[LogEntry], cfg: &FeedConfig) -> Result<String> {
    let rss = Rss {
        version: "2.0",
        channel: Channel {
            title: &cfg.title,
            link: &cfg.link,
            description: &cfg.description,
            items: entries.iter().map(FeedItem::from).collect(),
        },
    };
    let body = quick_xml::se::to_string(&rss).context("serializing rss feed")?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LogUser;
    use chrono::DateTime;

    fn entry(id: u64, caption: &str) -> LogEntry {
        LogEntry {
            id,
            title: "Sunset & sea".into(),
            caption: caption.into(),
            user: LogUser {
                name: "Alice".into(),
                handle: "alice".into(),
            },
            tags: String::new(),
            create_timestamp: DateTime::parse_from_rfc3339("2024-03-01T12:00:00+00:00").unwrap(),
            is_sensitive: false,
        }
    }

    #[test]
    fn renders_items_with_escaped_text() {
        let xml = render_rss(&[entry(101, "<b>hi</b>")], &FeedConfig::default()).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<rss version=\"2.0\">"));
        assert!(xml.contains("<guid>artwatch-101</guid>"));
        assert!(xml.contains("Sunset &amp; sea by Alice (@alice)"));
        assert!(xml.contains("<description>hi</description>"));
        assert!(xml.contains("Mar 2024 12:00:00 +0000</pubDate>"));
    }

    #[test]
    fn empty_caption_gets_placeholder() {
        let xml = render_rss(&[entry(1, "")], &FeedConfig::default()).unwrap();
        assert!(xml.contains("no description specified"));
    }
}
