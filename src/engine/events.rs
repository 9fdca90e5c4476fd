// src/engine/events.rs
use std::sync::Arc;

use crate::model::{Item, OwnerId};

/// What the engine tells the notifiers.
///
/// Every new item produces one `ItemDiscovered`; every task that found at least
/// one new item additionally produces one `BatchSummary`, so a notifier can
/// choose between per-item and per-owner delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    ItemDiscovered {
        item: Arc<Item>,
    },
    BatchSummary {
        owner: OwnerId,
        new_count: usize,
        first_item: Arc<Item>,
    },
}

impl DiscoveryEvent {
    pub fn owner(&self) -> OwnerId {
        match self {
            DiscoveryEvent::ItemDiscovered { item } => item.owner.id,
            DiscoveryEvent::BatchSummary { owner, .. } => *owner,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryEvent::ItemDiscovered { .. } => "item",
            DiscoveryEvent::BatchSummary { .. } => "summary",
        }
    }
}
