//! Session (transaction host) (C8): wraps a [`SessionChannel`] to run
//! exactly one transaction per call, classifying whatever the transaction
//! or the application lambda raised into the `Wrapped` envelope the
//! driver's retry loop consumes.
//!
//! Grounded on `spanner/src/client.rs`'s `read_write_transaction`
//! retry/finish loop and `spanner/src/transaction_manager.rs`'s
//! `TransactionManager` (session-reuse-across-retries pattern). The
//! transaction handle is passed to the application lambda as
//! `Arc<tokio::sync::Mutex<Transaction>>`, the same shape
//! `read_write_transaction` uses for its `ReadWriteTransaction` — it
//! sidesteps the borrow-checker issue of an `async Fn(&mut T) -> impl
//! Future` closure needing a single, lifetime-erased associated future
//! type.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{classify, DriverError, Wrapped};
use crate::session_channel::SessionChannel;
use crate::transaction::Transaction;
use crate::value::{Value, ValueCodec};

/// A materialized result set: all rows plus the IO/timing stats
/// accumulated fetching them, independent of the transaction that
/// produced them. Returned by [`Session::execute_query`] in place of a
/// live [`crate::pager::Pager`] so the result remains usable after the
/// implicit commit closes the underlying stream.
pub struct BufferedRows {
    values: Vec<Value>,
    io_stats: crate::pager::IoStats,
    time_stats: crate::pager::TimeStats,
    taken: bool,
}

impl BufferedRows {
    pub(crate) async fn buffer(mut pager: crate::pager::Pager) -> Result<Self, DriverError> {
        let mut values = Vec::new();
        while let Some(v) = pager.next().await? {
            values.push(v);
        }
        Ok(BufferedRows {
            values,
            io_stats: pager.io_stats(),
            time_stats: pager.time_stats(),
            taken: false,
        })
    }

    pub fn io_stats(&self) -> crate::pager::IoStats {
        self.io_stats
    }

    pub fn time_stats(&self) -> crate::pager::TimeStats {
        self.time_stats
    }

    /// Single-pass: a second call fails with
    /// [`DriverError::StreamAlreadyIterated`].
    pub fn rows(&mut self) -> Result<std::vec::IntoIter<Value>, DriverError> {
        if self.taken {
            return Err(DriverError::StreamAlreadyIterated);
        }
        self.taken = true;
        Ok(std::mem::take(&mut self.values).into_iter())
    }
}

/// `{ channel, pending, sessionId, closed, currentTxn }`. A session holds
/// at most one live transaction; starting a new one requires the
/// previous to be committed or aborted (enforced by `execute` only ever
/// running one transaction at a time on `&mut self`).
pub struct Session {
    channel: Arc<SessionChannel>,
    codec: Arc<dyn ValueCodec>,
    read_ahead: usize,
}

impl Session {
    pub(crate) fn new(
        channel: Arc<SessionChannel>,
        codec: Arc<dyn ValueCodec>,
        read_ahead: usize,
    ) -> Self {
        Session {
            channel,
            codec,
            read_ahead,
        }
    }

    pub fn session_id(&self) -> &str {
        self.channel.session_id()
    }

    /// ```text
    /// T execute(fn):
    ///   txn = startTransaction()
    ///   try:
    ///     v = fn(TransactionView(txn))
    ///     txn.commit()
    ///     return v
    ///   catch AbortSignal:
    ///     txn.abort(); rethrow
    ///   catch E:
    ///     ok = tryAbort(txn)
    ///     classify(E, ok) and rethrow wrapped
    ///   finally:
    ///     txn.internalClose()
    /// ```
    pub async fn execute<T, F, Fut>(&mut self, f: F) -> Result<T, Wrapped>
    where
        F: Fn(Arc<Mutex<Transaction>>) -> Fut,
        Fut: Future<Output = Result<T, DriverError>>,
    {
        let txn = Transaction::begin(self.channel.clone(), self.codec.clone(), self.read_ahead)
            .await
            .map_err(|e| {
                let (retryable, session_alive) = classify(&e, true);
                Wrapped::new(e, retryable, session_alive)
            })?;
        let txn_id = txn.id().to_string();
        tracing::trace!("session {} started transaction {}", self.session_id(), txn_id);
        let txn = Arc::new(Mutex::new(txn));

        let result = f(txn.clone()).await;

        match result {
            Ok(v) => {
                let mut guard = txn.lock().await;
                match guard.commit().await {
                    Ok(()) => {
                        guard.internal_close();
                        drop(guard);
                        Ok(v)
                    }
                    Err(e) => {
                        guard.internal_close();
                        drop(guard);
                        let (retryable, session_alive) = classify(&e, true);
                        tracing::debug!(
                            "commit of transaction {} failed (retryable={}, session_alive={}): {}",
                            txn_id, retryable, session_alive, e
                        );
                        Err(Wrapped::new(e, retryable, session_alive).with_txn_id(txn_id))
                    }
                }
            }
            Err(DriverError::AbortSignal) => {
                let mut guard = txn.lock().await;
                guard.abort().await;
                guard.internal_close();
                drop(guard);
                tracing::debug!("transaction {} body signalled abort", txn_id);
                Err(Wrapped::abort(DriverError::AbortSignal, true).with_txn_id(txn_id))
            }
            Err(e) => {
                let mut guard = txn.lock().await;
                let abort_ok = guard.abort().await;
                guard.internal_close();
                drop(guard);
                let (retryable, session_alive) = classify(&e, abort_ok);
                tracing::debug!(
                    "transaction {} body failed (retryable={}, session_alive={}): {}",
                    txn_id, retryable, session_alive, e
                );
                Err(Wrapped::new(e, retryable, session_alive).with_txn_id(txn_id))
            }
        }
    }

    /// Convenience entry point for the common "lambda returns a live
    /// pager" case: runs `f`, then materializes the pager's remaining
    /// rows into a [`BufferedRows`] BEFORE committing, so the commit's
    /// stream teardown cannot invalidate rows the caller still wants.
    pub async fn execute_query<F, Fut>(&mut self, f: F) -> Result<BufferedRows, Wrapped>
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

    /// Best-effort graceful teardown: sends `endSession` and awaits its
    /// reply before tearing down the local consumer task, so the server
    /// learns the session is done rather than only timing it out.
    pub(crate) async fn close(&self) {
        tracing::trace!("closing session {}", self.session_id());
        let _ = self.channel.end_session().await;
        self.channel.close();
    }
}
