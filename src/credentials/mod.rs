// src/credentials/mod.rs
//! Rotatable credential slots.
//!
//! Every slot holds an access/refresh token pair. Workers always ask the pool
//! for a snapshot of the current slot, and hand that snapshot back when they
//! need a refresh or a rotation, so stale snapshots never trigger a second
//! refresh or skip a slot twice.

pub mod oauth;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;

use crate::errors::{CredentialError, IssueError};

/// Access/refresh token pair as issued by the token endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &fingerprint(&self.access_token))
            .field("refresh_token", &fingerprint(&self.refresh_token))
            .finish()
    }
}

/// Snapshot of one slot handed to a content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSlot {
    pub index: usize,
    pub credential: Credential,
    /// Bumped on every successful refresh of the slot.
    pub generation: u64,
}

impl CredentialSlot {
    pub fn access_token(&self) -> &str {
        &self.credential.access_token
    }

    pub fn needs_refresh(&self) -> bool {
        self.credential.access_token.is_empty()
    }
}

#[async_trait::async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Exchange a refresh token for a fresh access/refresh pair.
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, IssueError>;
}

struct SlotState {
    credential: Credential,
    generation: u64,
}

pub struct CredentialPool {
    slots: Vec<Mutex<SlotState>>,
    valid: Vec<AtomicBool>,
    current: AtomicUsize,
    issuer: Arc<dyn CredentialIssuer>,
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("slots", &self.slots.len())
            .field("current", &self.current.load(Ordering::Acquire))
            .finish()
    }
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>, issuer: Arc<dyn CredentialIssuer>) -> Self {
        let valid = credentials.iter().map(|_| AtomicBool::new(true)).collect();
        let slots = credentials
            .into_iter()
            .map(|credential| {
                Mutex::new(SlotState {
                    credential,
                    generation: 0,
                })
            })
            .collect();
        Self {
            slots,
            valid,
            current: AtomicUsize::new(0),
            issuer,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.valid
            .get(index)
            .is_some_and(|v| v.load(Ordering::Acquire))
    }

    pub fn valid_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.is_valid(i)).count()
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// Snapshot of the current slot. Waits while another worker refreshes it.
    pub async fn current(&self) -> Result<CredentialSlot, CredentialError> {
        loop {
            let idx = self.current.load(Ordering::Acquire);
            if !self.is_valid(idx) {
                self.advance_from(idx)?;
                continue;
            }
            let state = self.slots[idx].lock().await;
            // The slot may have been rejected while we waited for its lock.
            if !self.is_valid(idx) {
                continue;
            }
            return Ok(CredentialSlot {
                index: idx,
                credential: state.credential.clone(),
                generation: state.generation,
            });
        }
    }

    /// Move past slot `from` to the next valid slot, wrapping around.
    /// If someone already rotated away from `from`, the pool is left as is.
    pub async fn rotate(&self, from: usize) -> Result<CredentialSlot, CredentialError> {
        let to = self.advance_from(from)?;
        if to != from {
            counter!("artwatch_credential_rotations_total").increment(1);
            tracing::debug!(from, to, "rotated credential slot");
        }
        self.current().await
    }

    /// Refresh the slot `stale` was taken from.
    ///
    /// Only one refresh per slot runs at a time. Callers holding a snapshot
    /// older than the slot's state get the already refreshed credential back.
    pub async fn refresh(&self, stale: &CredentialSlot) -> Result<CredentialSlot, CredentialError> {
        let idx = stale.index;
        let Some(slot) = self.slots.get(idx) else {
            return Err(CredentialError::Rejected {
                slot: idx,
                reason: "no such slot".into(),
            });
        };

        let mut state = slot.lock().await;
        if !self.is_valid(idx) {
            return Err(self.rejected_or_exhausted(idx, "slot already excluded".into()));
        }
        if state.generation != stale.generation {
            tracing::trace!(slot = idx, "reusing credential refreshed by another worker");
            return Ok(CredentialSlot {
                index: idx,
                credential: state.credential.clone(),
                generation: state.generation,
            });
        }

        counter!("artwatch_credential_refresh_total").increment(1);
        match self.issuer.exchange(&state.credential.refresh_token).await {
            Ok(fresh) => {
                state.credential = fresh;
                state.generation += 1;
                tracing::debug!(
                    slot = idx,
                    generation = state.generation,
                    token = %fingerprint(&state.credential.access_token),
                    "credential refreshed"
                );
                Ok(CredentialSlot {
                    index: idx,
                    credential: state.credential.clone(),
                    generation: state.generation,
                })
            }
            Err(IssueError::Unavailable(reason)) => {
                tracing::warn!(slot = idx, %reason, "token endpoint unavailable");
                Err(CredentialError::Unavailable { slot: idx, reason })
            }
            Err(IssueError::Rejected(reason)) => {
                self.valid[idx].store(false, Ordering::Release);
                tracing::error!(
                    slot = idx,
                    %reason,
                    remaining = self.valid_count(),
                    "refresh token rejected; slot excluded from rotation"
                );
                Err(self.rejected_or_exhausted(idx, reason))
            }
        }
    }

    fn rejected_or_exhausted(&self, slot: usize, reason: String) -> CredentialError {
        if self.valid_count() == 0 {
            CredentialError::PoolExhausted
        } else {
            CredentialError::Rejected { slot, reason }
        }
    }

    /// CAS the current index from `from` to the next valid slot.
    fn advance_from(&self, from: usize) -> Result<usize, CredentialError> {
        let n = self.len();
        if n == 0 {
            return Err(CredentialError::PoolExhausted);
        }
        let next = (1..=n)
            .map(|step| (from + step) % n)
            .find(|&i| self.is_valid(i))
            .ok_or(CredentialError::PoolExhausted)?;
        match self
            .current
            .compare_exchange(from, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(next),
            Err(actual) => Ok(actual),
        }
    }
}

/// Short, non-reversible identifier of a token for logs.
pub fn fingerprint(token: &str) -> String {
    use sha2::{Digest, Sha256};
    if token.is_empty() {
        return "<empty>".to_string();
    }
    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingIssuer {
        calls: AtomicU32,
        reject: bool,
    }

    #[async_trait::async_trait]
    impl CredentialIssuer for CountingIssuer {
        async fn exchange(&self, refresh_token: &str) -> Result<Credential, IssueError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.reject {
                return Err(IssueError::Rejected("invalid_grant".into()));
            }
            Ok(Credential {
                access_token: format!("{refresh_token}-access-{n}"),
                refresh_token: refresh_token.to_string(),
            })
        }
    }

    fn cred(name: &str) -> Credential {
        Credential {
            access_token: format!("{name}-access"),
            refresh_token: name.to_string(),
        }
    }

    fn pool(n: usize, reject: bool) -> (Arc<CredentialPool>, Arc<CountingIssuer>) {
        let issuer = Arc::new(CountingIssuer {
            calls: AtomicU32::new(0),
            reject,
        });
        let creds = (0..n).map(|i| cred(&format!("slot{i}"))).collect();
        (Arc::new(CredentialPool::new(creds, issuer.clone())), issuer)
    }

    #[tokio::test]
    async fn rotation_wraps_around() {
        let (p, _) = pool(3, false);
        assert_eq!(p.current().await.unwrap().index, 0);
        assert_eq!(p.rotate(0).await.unwrap().index, 1);
        assert_eq!(p.rotate(1).await.unwrap().index, 2);
        assert_eq!(p.rotate(2).await.unwrap().index, 0);
    }

    #[tokio::test]
    async fn concurrent_rotations_from_same_slot_advance_once() {
        let (p, _) = pool(3, false);
        let a = p.rotate(0).await.unwrap();
        let b = p.rotate(0).await.unwrap();
        assert_eq!(a.index, 1);
        assert_eq!(b.index, 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_issue_one_request() {
        let (p, issuer) = pool(1, false);
        let stale = p.current().await.unwrap();
        let (a, b) = tokio::join!(p.refresh(&stale), p.refresh(&stale));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert_eq!(a.generation, 1);
        assert_ne!(a.access_token(), stale.access_token());
    }

    #[tokio::test]
    async fn rejected_slots_are_skipped_then_pool_exhausts() {
        let (p, _) = pool(2, true);
        let s0 = p.current().await.unwrap();
        let err = p.refresh(&s0).await.unwrap_err();
        assert!(matches!(err, CredentialError::Rejected { slot: 0, .. }));
        let s1 = p.current().await.unwrap();
        assert_eq!(s1.index, 1);
        let err = p.refresh(&s1).await.unwrap_err();
        assert_eq!(err, CredentialError::PoolExhausted);
        assert_eq!(p.current().await.unwrap_err(), CredentialError::PoolExhausted);
    }

    #[test]
    fn fingerprint_hides_token() {
        let f = fingerprint("secret-token");
        assert_eq!(f.len(), 12);
        assert!(!f.contains("secret"));
        assert_eq!(fingerprint(""), "<empty>");
    }
}
