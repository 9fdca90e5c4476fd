// src/model.rs
//! Value types shared by the engine, the stores and the notifiers.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub type OwnerId = u64;
pub type ItemId = u64;

pub const ITEM_LINK_BASE: &str = "https://www.pixiv.net/en/artworks";
pub const OWNER_LINK_BASE: &str = "https://www.pixiv.net/users";

/// Tag that upstream uses to mark adult works.
pub const SENSITIVE_TAG: &str = "R-18";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub id: OwnerId,
    pub name: String,
    pub handle: String,
}

impl Owner {
    pub fn link(&self) -> String {
        format!("{OWNER_LINK_BASE}/{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub translated_name: Option<String>,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.translated_name {
            Some(t) => write!(f, "{} / {}", self.name, t),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub caption: String,
    pub create_timestamp: DateTime<FixedOffset>,
    #[serde(default)]
    pub page_count: u32,
    pub owner: Owner,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub is_sensitive: bool,
}

impl Item {
    pub fn link(&self) -> String {
        format!("{ITEM_LINK_BASE}/{}", self.id)
    }

    /// `"name / translated, name"`, as used in logs, hooks and the discovery log.
    pub fn tag_string(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn sensitive(&self) -> bool {
        self.is_sensitive || self.tags.iter().any(|t| t.name == SENSITIVE_TAG)
    }

    /// One-line description, e.g. for the discovery log line and desktop toasts.
    pub fn headline(&self) -> String {
        format!(
            "'{}' by {} (@{})",
            self.title, self.owner.name, self.owner.handle
        )
    }

    pub fn summary_line(&self) -> String {
        let pages = if self.page_count > 1 {
            format!(" ({} pages)", self.page_count)
        } else {
            String::new()
        };
        format!(
            "#{}{} {}. Tags: {}",
            self.id,
            pages,
            self.headline(),
            self.tag_string()
        )
    }
}

/// Turn an upstream caption (HTML fragment) into plain single-line text.
pub fn plain_text(s: &str) -> String {
    static RE_BR: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();

    let re_br = RE_BR.get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>").unwrap());
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());

    let out = re_br.replace_all(s, " ");
    let out = re_tags.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).to_string();
    re_ws.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
pub(crate) fn sample_item(id: ItemId, created: &str) -> Item {
    Item {
        id,
        title: format!("work {id}"),
        caption: String::new(),
        create_timestamp: DateTime::parse_from_rfc3339(created).unwrap(),
        page_count: 1,
        owner: Owner {
            id: 7,
            name: "Artist".into(),
            handle: "artist".into(),
        },
        tags: vec![],
        is_sensitive: false,
    }
}
