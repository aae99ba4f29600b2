//! Seed scenarios S1-S6 from `spec.md` §8, exercised end-to-end through
//! [`Driver::execute`] against an in-process [`support::MockTransport`].

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;

use ledger_driver::config::DriverConfigBuilder;
use ledger_driver::driver::Driver;
use ledger_driver::error::DriverError;
use ledger_driver::pager::Pager;
use ledger_driver::retry::RetryPolicy;
use ledger_driver::transaction::Statement;
use ledger_driver::transport::Page;
use ledger_driver::value::{ProstValueCodec, Value, ValueCodec};

use support::{MockSession, MockTransport, RecordingBackoff};

fn fast_retry_policy(max_retries: u32) -> (RetryPolicy, Arc<parking_lot::Mutex<Vec<u32>>>) {
    let (backoff, attempts) = RecordingBackoff::new(Duration::from_millis(1));
    (RetryPolicy::new(max_retries, Arc::new(backoff)), attempts)
}

/// S1: happy path insert+select. A single statement's empty page, then a
/// commit whose digest matches the client's running hash.
#[tokio::test]
async fn s1_happy_path_insert_and_select() {
    let transport = MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .commit_ok()]);

    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(Arc::new(transport))
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard
                .execute(Statement::with_params(
                    "INSERT INTO T ?",
                    vec![Value::string("row")],
                ))
                .await?;
            while pager.next().await?.is_some() {}
            Ok(42)
        })
        .await
        .unwrap();

    assert_eq!(result, 42);
    driver.close().await;
}

/// S2: OCC conflict on the first commit, retried in a fresh transaction on
/// the same session, which then succeeds.
#[tokio::test]
async fn s2_occ_conflict_retried_once_then_succeeds() {
    let transport = MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .transaction_error("OccConflict", "concurrent modification")
        .start_transaction("t2")
        .execute_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .commit_ok()]);
    let transport = Arc::new(transport);

    let (policy, attempts) = fast_retry_policy(3);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok("ok")
        })
        .await
        .unwrap();

    assert_eq!(result, "ok");
    assert_eq!(attempts.lock().clone(), vec![1]);
    // Same session reused across the retry: only one `open_session` call.
    assert_eq!(transport.sessions_opened(), 1);
}

/// S3: the server reports the session expired while executing the first
/// statement. The session is discarded (not returned to the pool); a new
/// one is opened and the transaction body re-invoked with a fresh txn id.
#[tokio::test]
async fn s3_session_expired_on_first_execute() {
    let transport = MockTransport::new(vec![
        MockSession::new()
            .start_transaction("t1")
            .statement_error("SessionExpired", "session no longer valid"),
        MockSession::new()
            .start_transaction("t2")
            .execute_page(Page {
                values: vec![],
                next_page_token: None,
            })
            .commit_ok(),
    ]);
    let transport = Arc::new(transport);

    let (policy, attempts) = fast_retry_policy(3);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok(())
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(attempts.lock().clone(), vec![1]);
    assert_eq!(transport.sessions_opened(), 2);
}

/// S4: the server returns a retryable 500 on every attempt. With
/// `maxRetries = 3`, the caller sees the underlying error on the fourth
/// attempt and backoff was consulted exactly three times, with strictly
/// increasing attempt numbers (`spec.md` invariant 8).
#[tokio::test]
async fn s4_retry_budget_exhausted_on_500s() {
    let sessions: Vec<MockSession> = (0..4)
        .map(|i| {
            MockSession::new()
                .start_transaction(format!("t{i}"))
                .statement_error("500", "internal server error")
        })
        .collect();
    let transport = Arc::new(MockTransport::new(sessions));

    let (policy, attempts) = fast_retry_policy(3);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok(())
        })
        .await;

    match result {
        Err(DriverError::Server5xx { code, .. }) => assert_eq!(code, 500),
        other => panic!("expected Server5xx, got {other:?}"),
    }
    assert_eq!(attempts.lock().clone(), vec![1, 2, 3]);
    assert_eq!(transport.sessions_opened(), 4);
}

/// S5: the server's commit digest disagrees with the client's running
/// hash. Fatal, surfaced without retry even though the retry budget has
/// room remaining (`spec.md` invariant 14).
#[tokio::test]
async fn s5_commit_digest_mismatch_is_fatal() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .commit_mismatch()]));

    let (policy, attempts) = fast_retry_policy(3);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DriverError::CommitDigestMismatch)));
    assert!(attempts.lock().is_empty(), "must not be retried");
    assert_eq!(transport.sessions_opened(), 1);
}

/// S6: a read-ahead pager's parent transaction is aborted mid-stream. The
/// pager outlives the `Execute` call (captured via a side channel, the way
/// a test observes state an application wouldn't normally reach back
/// into); every subsequent `next()` fails with `ResultParentInactive`
/// rather than initiating another page fetch.
#[tokio::test]
async fn s6_read_ahead_cancelled_on_transaction_abort() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: Some("page-2".into()),
        })]));

    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .read_ahead(4)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let captured: Arc<AsyncMutex<Option<Pager>>> = Arc::new(AsyncMutex::new(None));
    let captured_in = captured.clone();

    let result = driver
        .execute(move |txn| {
            let captured = captured_in.clone();
            async move {
                let mut guard = txn.lock().await;
                let pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
                *captured.lock().await = Some(pager);
                Err(DriverError::AbortSignal)
            }
        })
        .await;

    assert!(matches!(result, Err(DriverError::AbortSignal)));

    let mut guard = captured.lock().await;
    let pager = guard.as_mut().expect("pager was captured before abort");
    let next = pager.next().await;
    assert!(
        matches!(next, Err(DriverError::ResultParentInactive)),
        "expected ResultParentInactive, got {next:?}"
    );
}

/// Invariant 13: `maxRetries == 0` disables retry outright — a retryable
/// error surfaces on the very first failure, backoff is never consulted.
#[tokio::test]
async fn max_retries_zero_disables_retry() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .statement_error("500", "internal server error")]));

    let (policy, attempts) = fast_retry_policy(0);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok(())
        })
        .await;

    assert!(matches!(result, Err(DriverError::Server5xx { .. })));
    assert!(attempts.lock().is_empty(), "backoff must never be consulted");
    assert_eq!(transport.sessions_opened(), 1);
}

/// Invariant 11: returning a live pager from the transaction body is
/// equivalent to returning the fully buffered row list from the same
/// pager — `Driver::execute_query` materializes it before the implicit
/// commit tears the stream down, and the result stays usable afterward.
#[tokio::test]
async fn execute_query_buffers_rows_for_use_after_commit() {
    let row = ProstValueCodec.encode(&Value::string("alice")).unwrap();
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![row],
            next_page_token: None,
        })
        .commit_ok()]));

    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let mut buffered = driver
        .execute_query(|txn| async move {
            let mut guard = txn.lock().await;
            guard.execute(Statement::new("SELECT name FROM T")).await
        })
        .await
        .unwrap();

    let rows: Vec<Value> = buffered.rows().unwrap().collect();
    assert_eq!(rows, vec![Value::string("alice")]);
    assert!(matches!(
        buffered.rows(),
        Err(DriverError::StreamAlreadyIterated)
    ));
}

/// Invariant 7: for `maxConcurrentTransactions = 1`, a second `Execute`
/// call cannot acquire a session while the first is still in flight — it
/// times out with `NoSessionAvailable` rather than exceeding the pool's
/// concurrency bound.
#[tokio::test]
async fn pool_bounds_concurrent_transactions_to_configured_limit() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .commit_ok()]));

    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport)
        .max_concurrent_transactions(1)
        .pool_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let driver = Arc::new(Driver::new(config));

    let holder = driver.clone();
    let handle = tokio::spawn(async move {
        holder
            .execute(|txn| async move {
                let mut guard = txn.lock().await;
                let mut pager = guard.execute(Statement::new("SELECT 1")).await?;
                while pager.next().await?.is_some() {}
                drop(guard);
                // Hold the only permit past the second caller's timeout.
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await
    });

    // Let the background call acquire the only permit and open its session.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second: Result<(), DriverError> = driver.execute(|_txn| async move { Ok(()) }).await;
    assert!(matches!(second, Err(DriverError::NoSessionAvailable)));

    handle.await.unwrap().unwrap();
}

/// `has_next()` in read-ahead mode must settle to `false` once the
/// producer has drained every page, rather than reporting a pending page
/// forever — `while pager.has_next() { pager.next() }` must terminate.
#[tokio::test]
async fn read_ahead_has_next_terminates_once_drained() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .execute_page(Page {
            values: vec![],
            next_page_token: Some("page-2".into()),
        })
        .fetched_page(Page {
            values: vec![],
            next_page_token: None,
        })
        .commit_ok()]));

    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport)
        .read_ahead(4)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            let mut iterations = 0;
            while pager.has_next() {
                pager.next().await?;
                iterations += 1;
                assert!(iterations <= 10, "has_next() never settled to false");
            }
            Ok(())
        })
        .await
        .unwrap();
}

/// §4.9's "any other server error (e.g. 4xx)" row: not retryable, session
/// stays alive, surfaced as `ServerRejected` rather than looping through
/// the retry budget as a generic statement fault.
#[tokio::test]
async fn four_xx_statement_error_is_surfaced_without_retry() {
    let transport = Arc::new(MockTransport::new(vec![MockSession::new()
        .start_transaction("t1")
        .statement_error("400", "malformed statement")]));

    let (policy, attempts) = fast_retry_policy(3);
    let config = DriverConfigBuilder::new()
        .ledger("test-ledger")
        .transport(transport.clone())
        .transaction_retry_policy(policy)
        .build()
        .unwrap();
    let driver = Driver::new(config);

    let result = driver
        .execute(|txn| async move {
            let mut guard = txn.lock().await;
            let mut pager = guard.execute(Statement::new("SELECT * FROM T")).await?;
            while pager.next().await?.is_some() {}
            Ok(())
        })
        .await;

    match result {
        Err(DriverError::ServerRejected { code, .. }) => assert_eq!(code, 400),
        other => panic!("expected ServerRejected, got {other:?}"),
    }
    assert!(attempts.lock().is_empty(), "4xx errors must not be retried");
    assert_eq!(transport.sessions_opened(), 1);
}
