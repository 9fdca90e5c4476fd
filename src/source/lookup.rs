// src/source/lookup.rs
//! One-off owner profile lookups with the workers' credential recovery.

use std::future::Future;

use crate::credentials::{CredentialPool, CredentialSlot};
use crate::engine::RetryPolicy;
use crate::errors::{ApiError, CredentialError, EngineError};
use crate::model::{Owner, OwnerId};

/// Call `fetch` with the pool's current credential until it yields the
/// owner's profile.
///
/// Expired credentials are refreshed, rate limited slots are rotated away
/// from, transient failures are retried up to `retry.transient_retry_limit`
/// times and an unreadable reply is retried once.
pub async fn lookup_owner<F, Fut>(
    pool: &CredentialPool,
    retry: &RetryPolicy,
    owner: OwnerId,
    mut fetch: F,
) -> Result<Owner, EngineError>
where
    F: FnMut(CredentialSlot) -> Fut,
    Fut: Future<Output = Result<Owner, ApiError>>,
{
    let mut slot = pool.current().await?;
    let mut transient = 0u32;
    let mut rate_limited = 0usize;
    let mut malformed = false;

    loop {
        let err = if slot.needs_refresh() {
            ApiError::AuthExpired
        } else {
            match fetch(slot.clone()).await {
                Ok(found) => return Ok(found),
                Err(e) => e,
            }
        };
        if !matches!(err, ApiError::RateLimited) {
            rate_limited = 0;
        }

        let reason = match err {
            ApiError::AuthExpired => match pool.refresh(&slot).await {
                Ok(fresh) => {
                    slot = fresh;
                    continue;
                }
                Err(CredentialError::Rejected { slot: rejected, reason }) => {
                    tracing::warn!(owner, slot = rejected, %reason, "credential slot rejected; switching");
                    slot = pool.current().await?;
                    continue;
                }
                Err(CredentialError::Unavailable { reason, .. }) => reason,
                Err(e @ CredentialError::PoolExhausted) => return Err(e.into()),
            },
            ApiError::RateLimited => {
                rate_limited += 1;
                slot = pool.rotate(slot.index).await?;
                if rate_limited % pool.valid_count().max(1) == 0 {
                    tokio::time::sleep(retry.delay).await;
                }
                continue;
            }
            ApiError::Malformed(reason) => {
                if malformed {
                    return Err(EngineError::Abandoned {
                        owner,
                        source: ApiError::Malformed(reason),
                    });
                }
                malformed = true;
                tracing::warn!(owner, %reason, "unexpected profile response; retrying once");
                continue;
            }
            ApiError::Transient(reason) => reason,
        };

        transient += 1;
        if transient > retry.transient_retry_limit {
            return Err(EngineError::Abandoned {
                owner,
                source: ApiError::Transient(reason),
            });
        }
        tracing::warn!(owner, attempt = transient, %reason, "profile lookup failed; retrying in {:?}", retry.delay);
        tokio::time::sleep(retry.delay).await;
    }
}
