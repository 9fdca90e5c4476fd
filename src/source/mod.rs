// src/source/mod.rs
pub mod app_api;
pub mod lookup;

use crate::credentials::CredentialSlot;
use crate::errors::ApiError;
use crate::model::{Item, OwnerId};

/// Fetches the current item list of one content owner.
///
/// Implementations must classify every failure into [`ApiError`]; the worker
/// decides how to react (refresh, rotate, wait or give up).
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    /// Items in upstream order, usually newest first.
    async fn fetch(&self, owner: OwnerId, credential: &CredentialSlot)
        -> Result<Vec<Item>, ApiError>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}
