mod common;

use std::time::Duration;

use common::{FakeClientFactory, rows};
use spanner_middleware::prelude::*;

const DSN: &str = "projects/p/instances/i/databases/d";

async fn open_conn(factory: &std::sync::Arc<FakeClientFactory>) -> Connection {
    let driver = Driver::new(factory.clone());
    driver.open(&Context::background(), DSN).await.unwrap()
}

fn count_begins(factory: &FakeClientFactory) -> usize {
    factory
        .backend
        .log()
        .iter()
        .filter(|e| e.as_str() == "begin_read_write")
        .count()
}

#[tokio::test]
async fn read_only_transaction_freezes_the_staleness_bound() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.set_read_only_staleness(TimestampBound::MaxStaleness(Duration::from_secs(30)))
        .unwrap();
    conn.begin_transaction(&ctx, TransactionOptions::read_only()).await.unwrap();
    assert!(conn.in_read_only_transaction());

    assert_eq!(
        factory.backend.read_only_bounds(),
        vec![TimestampBound::MaxStaleness(Duration::from_secs(30))]
    );

    // Staleness cannot change underneath an open transaction.
    let err = conn.set_read_only_staleness(TimestampBound::Strong).unwrap_err();
    assert!(matches!(err, SpannerMiddlewareError::FailedPrecondition(_)));

    conn.query(&ctx, "SELECT * FROM t", &[]).await.unwrap();
    assert!(factory.backend.log().iter().any(|e| e == "ro_query: SELECT * FROM t"));

    // Committing a read-only transaction yields no timestamp.
    assert_eq!(conn.commit(&ctx).await.unwrap(), None);
    assert!(factory.backend.log().iter().any(|e| e == "ro_close"));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn read_only_transaction_rejects_writes() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_only()).await.unwrap();

    let err = conn.execute(&ctx, "UPDATE t SET v=1", &[]).await.unwrap_err();
    assert!(matches!(err, SpannerMiddlewareError::FailedPrecondition(_)));

    let mutation = Mutation::new(MutationOp::Delete, "t");
    let err = conn.buffer_write(vec![mutation]).unwrap_err();
    assert!(matches!(err, SpannerMiddlewareError::FailedPrecondition(_)));

    conn.rollback(&ctx).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn read_write_transaction_commits_and_reports_a_timestamp() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    assert!(conn.in_read_write_transaction());

    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();
    conn.query(&ctx, "SELECT 1", &[]).await.unwrap();

    let ts = conn.commit(&ctx).await.unwrap().expect("read-write commit timestamp");
    assert!(!conn.in_transaction());
    assert_eq!(conn.commit_timestamp().unwrap(), ts);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn abort_on_commit_replays_and_eventually_commits() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();
    conn.query(&ctx, "SELECT v FROM t WHERE id=1", &[]).await.unwrap();

    factory.backend.abort_next_commits(1);
    let ts = conn.commit(&ctx).await.unwrap();
    assert!(ts.is_some());
    assert_eq!(conn.commit_timestamp().unwrap(), ts.unwrap());

    // A fresh context was begun and the whole statement log replayed.
    assert_eq!(count_begins(&factory), 2);
    let log = factory.backend.log();
    let updates = log.iter().filter(|e| e.as_str() == "tx_update: UPDATE t SET v=1 WHERE id=1").count();
    let queries = log.iter().filter(|e| e.as_str() == "tx_query: SELECT v FROM t WHERE id=1").count();
    assert_eq!(updates, 2);
    assert_eq!(queries, 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn repeated_aborts_keep_replaying_until_commit_succeeds() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();

    factory.backend.abort_next_commits(3);
    assert!(conn.commit(&ctx).await.unwrap().is_some());
    assert_eq!(count_begins(&factory), 4);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn disabling_retries_surfaces_the_abort_immediately() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.set_retry_aborts_internally(false).unwrap();
    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();

    factory.backend.abort_next_commits(1);
    let err = conn.commit(&ctx).await.unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(count_begins(&factory), 1);

    // The terminal commit returned the connection to idle regardless.
    assert!(!conn.in_transaction());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn replay_mismatch_is_a_concurrent_modification_error() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    factory.backend.set_query_result(
        "SELECT v FROM t WHERE id=1",
        rows(&["v"], vec![vec![Value::Int64(1)]]),
    );

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.query(&ctx, "SELECT v FROM t WHERE id=1", &[]).await.unwrap();

    // Another writer changes the row before the replay runs.
    factory.backend.set_query_result(
        "SELECT v FROM t WHERE id=1",
        rows(&["v"], vec![vec![Value::Int64(2)]]),
    );
    factory.backend.abort_next_commits(1);

    let err = conn.commit(&ctx).await.unwrap_err();
    assert_eq!(err, SpannerMiddlewareError::AbortedDueToConcurrentModification);
    assert!(!conn.in_transaction());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn changed_update_counts_also_fail_the_replay() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();

    factory.backend.set_update_count("UPDATE t SET v=1 WHERE id=1", 7);
    factory.backend.abort_next_commits(1);

    let err = conn.commit(&ctx).await.unwrap_err();
    assert_eq!(err, SpannerMiddlewareError::AbortedDueToConcurrentModification);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn statement_failures_must_reproduce_during_replay() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    factory.backend.fail_update_with(
        "UPDATE t SET v=1 WHERE id=1",
        SpannerMiddlewareError::Client("constraint violation".into()),
    );

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    let err = conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap_err();
    assert_eq!(err, SpannerMiddlewareError::Client("constraint violation".into()));

    // Identical failure on replay: the retry succeeds and commit goes through.
    factory.backend.abort_next_commits(1);
    assert!(conn.commit(&ctx).await.unwrap().is_some());
    assert_eq!(count_begins(&factory), 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn abort_during_a_statement_replays_earlier_statements() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();

    factory.backend.abort_next_updates(1);
    let affected = conn.execute(&ctx, "UPDATE t SET v=2 WHERE id=2", &[]).await.unwrap();
    assert_eq!(affected, 1);
    assert_eq!(count_begins(&factory), 2);

    // First statement replayed once, second re-executed after the replay.
    let log = factory.backend.log();
    let first = log.iter().filter(|e| e.as_str() == "tx_update: UPDATE t SET v=1 WHERE id=1").count();
    assert_eq!(first, 2);

    assert!(conn.commit(&ctx).await.unwrap().is_some());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn buffered_mutations_are_replayed_too() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    let mutation = Mutation::new(MutationOp::Insert, "t").column("id", Value::Int64(9));
    conn.buffer_write(vec![mutation]).unwrap();

    factory.backend.abort_next_commits(1);
    assert!(conn.commit(&ctx).await.unwrap().is_some());

    let buffers = factory
        .backend
        .log()
        .iter()
        .filter(|e| e.as_str() == "tx_buffer_write: 1 mutations")
        .count();
    assert_eq!(buffers, 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn retry_flag_is_frozen_while_a_transaction_is_active() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    let err = conn.set_retry_aborts_internally(false).unwrap_err();
    assert!(matches!(err, SpannerMiddlewareError::FailedPrecondition(_)));
    assert!(conn.retry_aborts_internally());

    let err = conn
        .begin_transaction(&ctx, TransactionOptions::read_write())
        .await
        .unwrap_err();
    assert!(matches!(err, SpannerMiddlewareError::FailedPrecondition(_)));

    conn.rollback(&ctx).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_retry_loop() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;

    let token = tokio_util::sync::CancellationToken::new();
    let ctx = Context::with_token(token.clone());

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();

    // Every commit attempt aborts; cancel while the retry loop is backing off.
    factory.backend.abort_next_commits(u32::MAX);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let err = conn.commit(&ctx).await.unwrap_err();
    assert_eq!(err, SpannerMiddlewareError::Cancelled);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn rollback_clears_the_commit_timestamp() {
    let factory = FakeClientFactory::new();
    let mut conn = open_conn(&factory).await;
    let ctx = Context::background();

    conn.execute(&ctx, "UPDATE t SET v=1 WHERE id=1", &[]).await.unwrap();
    assert!(conn.commit_timestamp().is_ok());

    conn.begin_transaction(&ctx, TransactionOptions::read_write()).await.unwrap();
    conn.execute(&ctx, "UPDATE t SET v=2 WHERE id=1", &[]).await.unwrap();
    conn.rollback(&ctx).await.unwrap();

    assert!(conn.commit_timestamp().is_err());
    assert!(factory.backend.log().iter().any(|e| e == "tx_rollback"));

    conn.close().await.unwrap();
}
