// tests/common/mod.rs
// Shared fakes: a scripted content source and a token issuer.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use artwatch::credentials::{Credential, CredentialIssuer, CredentialPool, CredentialSlot};
use artwatch::errors::{ApiError, IssueError};
use artwatch::model::{Item, Owner, OwnerId};
use artwatch::source::ContentSource;
use artwatch::engine::{DiscoveryEvent, EngineContext, RetryPolicy};
use artwatch::store::{DiscoveryLog, SeenStore};
use chrono::DateTime;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub fn item(id: u64, owner: OwnerId, created: &str) -> Item {
    Item {
        id,
        title: format!("work {id}"),
        caption: String::new(),
        create_timestamp: DateTime::parse_from_rfc3339(created).unwrap(),
        page_count: 1,
        owner: Owner {
            id: owner,
            name: format!("Artist {owner}"),
            handle: format!("artist{owner}"),
        },
        tags: Vec::new(),
        is_sensitive: false,
    }
}

pub fn credential(access: &str, refresh: &str) -> Credential {
    Credential {
        access_token: access.into(),
        refresh_token: refresh.into(),
    }
}

pub type Response = Result<Vec<Item>, ApiError>;

/// Answers `fetch` from per-owner scripts; once a script runs dry the
/// owner's fallback list is returned.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<OwnerId, VecDeque<Response>>>,
    fallback: Mutex<HashMap<OwnerId, Vec<Item>>>,
    /// Access tokens keyed to a canned error, e.g. an expired token.
    token_errors: Mutex<HashMap<String, ApiError>>,
    /// `(owner, access token)` per call.
    pub calls: Mutex<Vec<(OwnerId, String)>>,
    /// `("start" | "end", owner)` in the order fetches began and finished.
    pub timeline: Mutex<Vec<(&'static str, OwnerId)>>,
    latency: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, d: Duration) -> Self {
        self.latency = Some(d);
        self
    }

    pub fn script(self, owner: OwnerId, responses: Vec<Response>) -> Self {
        self.scripts.lock().insert(owner, responses.into());
        self
    }

    pub fn always(self, owner: OwnerId, items: Vec<Item>) -> Self {
        self.fallback.lock().insert(owner, items);
        self
    }

    pub fn reject_token(self, token: &str, err: ApiError) -> Self {
        self.token_errors.lock().insert(token.into(), err);
        self
    }

    pub fn tokens_used(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch(&self, owner: OwnerId, credential: &CredentialSlot) -> Response {
        let token = credential.access_token().to_string();
        self.calls.lock().push((owner, token.clone()));
        self.timeline.lock().push(("start", owner));
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }

        let token_err = self.token_errors.lock().get(&token).cloned();
        let out = if let Some(err) = token_err {
            Err(err)
        } else {
            let scripted = self
                .scripts
                .lock()
                .get_mut(&owner)
                .and_then(|q| q.pop_front());
            scripted.unwrap_or_else(|| {
                Ok(self.fallback.lock().get(&owner).cloned().unwrap_or_default())
            })
        };
        self.timeline.lock().push(("end", owner));
        out
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Token endpoint fake keyed by refresh token.
#[derive(Default)]
pub struct FakeIssuer {
    replies: Mutex<HashMap<String, Result<Credential, IssueError>>>,
    pub exchanges: Mutex<Vec<String>>,
}

impl FakeIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, refresh: &str, result: Result<Credential, IssueError>) -> Self {
        self.replies.lock().insert(refresh.into(), result);
        self
    }

    pub fn exchange_count(&self) -> usize {
        self.exchanges.lock().len()
    }
}

#[async_trait::async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, IssueError> {
        self.exchanges.lock().push(refresh_token.to_string());
        self.replies
            .lock()
            .get(refresh_token)
            .cloned()
            .unwrap_or_else(|| Err(IssueError::Rejected("unknown refresh token".into())))
    }
}

pub fn pool(creds: Vec<Credential>, issuer: Arc<FakeIssuer>) -> Arc<CredentialPool> {
    Arc::new(CredentialPool::new(creds, issuer))
}

/// Engine context over temp-dir stores, with the receiving end of the event channel.
pub struct Harness {
    pub ctx: EngineContext,
    pub events: mpsc::Receiver<DiscoveryEvent>,
    pub seen: Arc<SeenStore>,
    pub log: Arc<DiscoveryLog>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(source: Arc<ScriptedSource>, pool: Arc<CredentialPool>) -> Self {
        Self::with_seen(source, pool, &[])
    }

    pub fn with_seen(source: Arc<ScriptedSource>, pool: Arc<CredentialPool>, seen_ids: &[u64]) -> Self {
        Self::build(source, pool, seen_ids, 256)
    }

    pub fn with_event_buffer(source: Arc<ScriptedSource>, pool: Arc<CredentialPool>, buffer: usize) -> Self {
        Self::build(source, pool, &[], buffer)
    }

    fn build(
        source: Arc<ScriptedSource>,
        pool: Arc<CredentialPool>,
        seen_ids: &[u64],
        buffer: usize,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(SeenStore::empty(dir.path().join("seen.json")));
        for &id in seen_ids {
            seen.add(id);
        }
        let log = Arc::new(DiscoveryLog::new(dir.path().join("discoverylog.json")));
        let (tx, events) = mpsc::channel(buffer);
        let ctx = EngineContext::new(source, pool, seen.clone(), log.clone(), tx).with_retry(
            RetryPolicy {
                delay: Duration::from_secs(5),
                transient_retry_limit: 2,
            },
        );
        Self {
            ctx,
            events,
            seen,
            log,
            dir,
        }
    }
}

/// Everything still buffered in the channel.
pub fn drain_events(rx: &mut mpsc::Receiver<DiscoveryEvent>) -> Vec<DiscoveryEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
