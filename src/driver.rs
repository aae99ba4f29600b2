//! Driver (pool + execute loop) (C9). Public API: `Execute(fn)` and
//! `Execute(fn, overrideRetryPolicy)`, `ListTableNames()`, `Close()`.
//!
//! Grounded on `spanner/src/client.rs`'s top-level `Client` struct and its
//! `read_write_transaction` retry loop (attempt counter, backoff sleep,
//! session-keep-or-drop decision), adapted to this driver's explicit
//! `Wrapped` classification envelope instead of status-code sniffing a
//! `tonic::Status`.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backoff::RetryContext;
use crate::config::DriverConfig;
use crate::error::{classify, DriverError, Wrapped};
use crate::pool::Pool;
use crate::retry::RetryPolicy;
use crate::session::{BufferedRows, Session};
use crate::session_channel::SessionChannel;
use crate::transaction::{Statement, Transaction};
use crate::value::Value;

/// The core transaction execution engine: a semaphore-bounded session
/// pool plus the retry/backoff loop around `Session::execute`.
pub struct Driver {
    config: Arc<DriverConfig>,
    pool: Arc<Pool>,
    closed: AtomicBool,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        let pool = Arc::new(Pool::new(config.max_concurrent_transactions));
        Driver {
            config: Arc::new(config),
            pool,
            closed: AtomicBool::new(false),
        }
    }

    /// `Execute(fn)` using the driver's configured retry policy.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, DriverError>
    where
        F: Fn(Arc<Mutex<Transaction>>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        self.execute_with_policy(f, &self.config.retry_policy).await
    }

    /// `Execute(fn, overrideRetryPolicy)`. Calling `execute`/
    /// `execute_with_policy` recursively from within `f` (nested
    /// transactions) competes for a fresh permit on the same pool; if
    /// none is available within `pool_timeout` it fails with
    /// [`DriverError::NoSessionAvailable`], exactly like any other
    /// caller — no special-casing is needed since the semaphore has no
    /// notion of a "current holder".
    pub async fn execute_with_policy<T, F, Fut>(
        &self,
        f: F,
        policy: &RetryPolicy,
    ) -> Result<T, DriverError>
    where
        F: Fn(Arc<Mutex<Transaction>>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(DriverError::DriverClosed);
            }

            let mut lease = self.pool.acquire(self.config.pool_timeout).await?;

            let mut session = if let Some(session) = lease.session.take() {
                session
            } else {
                match self.open_session().await {
                    Ok(session) => session,
                    Err(e) => {
                        // No session was ever obtained, so there is nothing
                        // to release or close beyond the permit itself
                        // (dropped with `lease`). A transport failure or
                        // timed-out `SessionStartFailed` while opening a
                        // fresh session is retryable per §7/§4.9, same as
                        // any other retryable fault.
                        drop(lease);
                        let (retryable, _session_alive) = classify(&e, true);
                        if !retryable || attempt >= policy.max_retries() {
                            tracing::debug!(
                                "failed to open a session after {} attempt(s), not retrying: {}",
                                attempt + 1,
                                e
                            );
                            return Err(e);
                        }
                        attempt += 1;
                        let delay = policy.backoff().calculate_delay(&RetryContext {
                            attempt,
                            last_error: e.to_string(),
                            txn_id: None,
                        });
                        tracing::info!(
                            "retrying session open after transient failure (attempt {}, delay {:?}): {}",
                            attempt, delay, e
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }
            };

            match session.execute(&f).await {
                Ok(v) => {
                    self.pool.release(session);
                    return Ok(v);
                }
                Err(Wrapped {
                    cause,
                    retryable,
                    session_alive,
                    is_abort,
                    txn_id,
                }) => {
                    if session_alive {
                        self.pool.release(session);
                    } else {
                        tracing::debug!("discarding session {} after fault: {}", session.session_id(), cause);
                        session.close().await;
                    }
                    // `lease.permit` drops at the end of this iteration
                    // either way, releasing exactly one permit per
                    // acquire.

                    if is_abort {
                        tracing::debug!("transaction {} aborted by application", txn_id.as_deref().unwrap_or("?"));
                        return Err(cause);
                    }
                    if !retryable || attempt >= policy.max_retries() {
                        tracing::debug!("execute failed after {} attempt(s), not retrying: {}", attempt + 1, cause);
                        return Err(cause);
                    }
                    attempt += 1;
                    let delay = policy.backoff().calculate_delay(&RetryContext {
                        attempt,
                        last_error: cause.to_string(),
                        txn_id,
                    });
                    tracing::info!("retrying after transient failure (attempt {}, delay {:?}): {}", attempt, delay, cause);
                    drop(lease);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Convenience wrapper materializing a returned pager into
    /// [`BufferedRows`] before the implicit commit.
    pub async fn execute_query<F, Fut>(&self, f: F) -> Result<BufferedRows, DriverError>
    where
        F: Fn(Arc<Mutex<Transaction>>) -> Fut,
        Fut: Future<Output = Result<crate::pager::Pager, DriverError>>,
    {
        self.execute(move |txn| {
            let fut = f(txn);
            async move {
                let pager = fut.await?;
                BufferedRows::buffer(pager).await
            }
        })
        .await
    }

    /// Executes `SELECT name FROM information_schema.user_tables` and
    /// decodes the single string column of each row. Re-issued on every
    /// call: no caching of results beyond one statement's paging window.
    pub async fn list_table_names(&self) -> Result<Vec<String>, DriverError> {
        let mut buffered = self
            .execute_query(|txn| async move {
                let mut guard = txn.lock().await;
                guard
                    .execute(Statement::new(
                        "SELECT name FROM information_schema.user_tables",
                    ))
                    .await
            })
            .await?;
        let rows = buffered.rows()?;
        let mut names = Vec::new();
        for row in rows {
            if let Some(name) = string_column(&row) {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub async fn close(&self) {
        tracing::debug!("closing driver for ledger {}", self.config.ledger);
        self.closed.store(true, Ordering::Release);
        self.pool.close().await;
    }

    async fn open_session(&self) -> Result<Session, DriverError> {
        let channel = match SessionChannel::open(
            self.config.transport.as_ref(),
            &self.config.ledger,
            self.config.pipeline_depth,
            self.config.session_open_timeout,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                tracing::error!("failed to open session against ledger {}: {}", self.config.ledger, e);
                return Err(e);
            }
        };
        tracing::debug!("opened session {}", channel.session_id());
        Ok(Session::new(
            Arc::new(channel),
            self.config.value_codec.clone(),
            self.config.read_ahead,
        ))
    }
}

fn string_column(value: &Value) -> Option<String> {
    match &value.0.kind {
        Some(prost_types::value::Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}
