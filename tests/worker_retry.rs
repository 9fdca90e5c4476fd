// tests/worker_retry.rs
mod common;

use std::sync::Arc;

use artwatch::engine::{DiscoveryEvent, Worker};
use artwatch::errors::{ApiError, CredentialError, EngineError, IssueError};
use common::{credential, drain_events, item, pool, FakeIssuer, Harness, ScriptedSource};

const T1: &str = "2024-03-01T10:00:00+00:00";

#[tokio::test(start_paused = true)]
async fn rate_limit_rotates_to_next_slot_without_refresh() {
    let source = Arc::new(
        ScriptedSource::new()
            .script(10, vec![Err(ApiError::RateLimited)])
            .always(10, vec![item(501, 10, T1)]),
    );
    let issuer = Arc::new(FakeIssuer::new());
    let pool = pool(
        vec![credential("a0", "r0"), credential("a1", "r1")],
        issuer.clone(),
    );
    let h = Harness::new(source.clone(), pool.clone());
    let mut events = h.events;
    let worker = Worker::new(0, Arc::new(h.ctx));

    let new = worker.process(10).await.unwrap();

    assert_eq!(new, 1);
    assert_eq!(source.tokens_used(), vec!["a0", "a1"]);
    assert_eq!(issuer.exchange_count(), 0, "rate limits must not trigger a refresh");
    assert_eq!(pool.current_index(), 1);

    let kinds: Vec<_> = drain_events(&mut events).iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["item", "summary"]);
}

#[tokio::test(start_paused = true)]
async fn full_round_of_rate_limits_waits_then_succeeds() {
    let source = Arc::new(
        ScriptedSource::new()
            .script(
                10,
                vec![Err(ApiError::RateLimited), Err(ApiError::RateLimited)],
            )
            .always(10, vec![item(1, 10, T1)]),
    );
    let pool = pool(
        vec![credential("a0", "r0"), credential("a1", "r1")],
        Arc::new(FakeIssuer::new()),
    );
    let h = Harness::new(source.clone(), pool.clone());
    let worker = Worker::new(0, Arc::new(h.ctx));

    let started = tokio::time::Instant::now();
    assert_eq!(worker.process(10).await.unwrap(), 1);

    // Two slots, two rate limits: one retry delay before the third attempt.
    assert!(started.elapsed() >= std::time::Duration::from_secs(5));
    assert_eq!(source.tokens_used(), vec!["a0", "a1", "a0"]);
}

#[tokio::test]
async fn malformed_response_is_retried_once_then_abandoned() {
    let source = Arc::new(ScriptedSource::new().script(
        10,
        vec![
            Err(ApiError::Malformed("html page".into())),
            Err(ApiError::Malformed("html page".into())),
        ],
    ));
    let pool = pool(vec![credential("a0", "r0")], Arc::new(FakeIssuer::new()));
    let h = Harness::new(source.clone(), pool);
    let mut events = h.events;
    let seen = h.seen.clone();
    let worker = Worker::new(0, Arc::new(h.ctx));

    let err = worker.process(10).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Abandoned {
            owner: 10,
            source: ApiError::Malformed(_)
        }
    ));
    assert_eq!(source.call_count(), 2);
    assert!(drain_events(&mut events).is_empty());
    assert!(seen.is_empty());
    assert!(!err.is_fatal());
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_failure_is_abandoned_after_limit() {
    let transient = || -> common::Response { Err(ApiError::Transient("connection reset".into())) };
    let source = Arc::new(
        ScriptedSource::new().script(10, vec![transient(), transient(), transient(), transient()]),
    );
    let pool = pool(vec![credential("a0", "r0")], Arc::new(FakeIssuer::new()));
    let h = Harness::new(source.clone(), pool);
    let worker = Worker::new(0, Arc::new(h.ctx));

    let err = worker.process(10).await.unwrap_err();

    // Limit 2: the first attempt plus two retries.
    assert!(matches!(
        err,
        EngineError::Abandoned {
            source: ApiError::Transient(_),
            ..
        }
    ));
    assert_eq!(source.call_count(), 3);
}

#[tokio::test]
async fn expired_access_token_is_refreshed_and_retried() {
    let source = Arc::new(
        ScriptedSource::new()
            .reject_token("old", ApiError::AuthExpired)
            .always(10, vec![item(7, 10, T1)]),
    );
    let issuer = Arc::new(FakeIssuer::new().reply("r0", Ok(credential("new", "r0b"))));
    let pool = pool(vec![credential("old", "r0")], issuer.clone());
    let h = Harness::new(source.clone(), pool.clone());
    let worker = Worker::new(0, Arc::new(h.ctx));

    assert_eq!(worker.process(10).await.unwrap(), 1);
    assert_eq!(source.tokens_used(), vec!["old", "new"]);
    assert_eq!(issuer.exchanges.lock().clone(), vec!["r0".to_string()]);

    let slot = pool.current().await.unwrap();
    assert_eq!(slot.credential.refresh_token, "r0b");
    assert_eq!(slot.generation, 1);
}

#[tokio::test]
async fn empty_access_token_is_refreshed_before_first_fetch() {
    let source = Arc::new(ScriptedSource::new().always(10, vec![]));
    let issuer = Arc::new(FakeIssuer::new().reply("r0", Ok(credential("fresh", "r0"))));
    let pool = pool(vec![credential("", "r0")], issuer.clone());
    let h = Harness::new(source.clone(), pool);
    let worker = Worker::new(0, Arc::new(h.ctx));

    assert_eq!(worker.process(10).await.unwrap(), 0);
    assert_eq!(source.tokens_used(), vec!["fresh"]);
    assert_eq!(issuer.exchange_count(), 1);
}

#[tokio::test]
async fn rejected_refresh_moves_to_next_slot() {
    let source = Arc::new(
        ScriptedSource::new()
            .reject_token("a0", ApiError::AuthExpired)
            .always(10, vec![item(3, 10, T1)]),
    );
    let issuer = Arc::new(FakeIssuer::new().reply("r0", Err(IssueError::Rejected("revoked".into()))));
    let pool = pool(
        vec![credential("a0", "r0"), credential("a1", "r1")],
        issuer.clone(),
    );
    let h = Harness::new(source.clone(), pool.clone());
    let worker = Worker::new(0, Arc::new(h.ctx));

    assert_eq!(worker.process(10).await.unwrap(), 1);
    assert_eq!(source.tokens_used(), vec!["a0", "a1"]);
    assert!(!pool.is_valid(0));
    assert_eq!(pool.valid_count(), 1);
}

#[tokio::test]
async fn last_rejected_slot_exhausts_the_pool() {
    let source = Arc::new(ScriptedSource::new().reject_token("a0", ApiError::AuthExpired));
    let issuer = Arc::new(FakeIssuer::new().reply("r0", Err(IssueError::Rejected("revoked".into()))));
    let pool = pool(vec![credential("a0", "r0")], issuer);
    let h = Harness::new(source.clone(), pool);
    let worker = Worker::new(0, Arc::new(h.ctx));

    let err = worker.process(10).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Credential(CredentialError::PoolExhausted)
    ));
    assert!(err.is_fatal());
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn already_seen_items_produce_no_events() {
    let source = Arc::new(ScriptedSource::new().always(
        10,
        vec![item(101, 10, T1), item(102, 10, T1)],
    ));
    let pool = pool(vec![credential("a0", "r0")], Arc::new(FakeIssuer::new()));
    let h = Harness::with_seen(source, pool, &[102]);
    let mut events = h.events;
    let worker = Worker::new(0, Arc::new(h.ctx));

    assert_eq!(worker.process(10).await.unwrap(), 1);

    let evs = drain_events(&mut events);
    assert_eq!(evs.len(), 2);
    match &evs[1] {
        DiscoveryEvent::BatchSummary {
            owner,
            new_count,
            first_item,
        } => {
            assert_eq!(*owner, 10);
            assert_eq!(*new_count, 1);
            assert_eq!(first_item.id, 101);
        }
        other => panic!("expected summary, got {other:?}"),
    }
}
