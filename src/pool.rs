//! Pool state (C9, pool half): `{ free: queue<Session>, permits:
//! Semaphore(maxConcurrent), closed: bool }`. Grounded on
//! `spanner/src/session.rs`'s `Sessions`/`SessionPool` (waiter queue,
//! free-list bookkeeping) adapted from Spanner's auto-replenishing pool to
//! this driver's simpler semaphore-bounded pool: no background
//! replenishment task, since ledger sessions are opened lazily on pool
//! miss, not pre-warmed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::DriverError;
use crate::session::Session;

/// Free-list plus permit semaphore shared by every `Driver::execute`
/// call. The only cross-call mutable state; the free-list lock is held
/// only for the duration of a `Vec`/`VecDeque` push/pop, never across an
/// `.await`.
pub(crate) struct Pool {
    free: Mutex<VecDeque<Session>>,
    permits: Semaphore,
    closed: AtomicBool,
}

/// A permit plus, if one was available, a pooled session. The caller
/// either returns the session (pushing it back onto `free`) or closes it,
/// always releasing the permit exactly once either way.
pub(crate) struct Lease<'a> {
    pub permit: SemaphorePermit<'a>,
    pub session: Option<Session>,
}

impl Pool {
    pub fn new(max_concurrent: usize) -> Self {
        Pool {
            free: Mutex::new(VecDeque::new()),
            permits: Semaphore::new(max_concurrent),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let drained: Vec<Session> = self.free.lock().drain(..).collect();
        tracing::debug!("closing session pool, draining {} pooled session(s)", drained.len());
        for session in drained {
            session.close().await;
        }
    }

    /// Acquires a permit within `timeout`, pairing it with a pooled
    /// session if one is free. `None` session means the caller must open
    /// a new one. Fails with [`DriverError::NoSessionAvailable`] on
    /// timeout, [`DriverError::InterruptedWaitingForSession`] if the wait
    /// itself was cancelled.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease<'_>, DriverError> {
        let permit = match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DriverError::InterruptedWaitingForSession),
            Err(_) => {
                tracing::debug!("timed out after {:?} waiting for a free session permit", timeout);
                return Err(DriverError::NoSessionAvailable);
            }
        };
        let session = self.free.lock().pop_front();
        Ok(Lease { permit, session })
    }

    /// Returns a session to the free list. The permit is released
    /// implicitly when the caller's `Lease`/`SemaphorePermit` drops.
    pub fn release(&self, session: Session) {
        self.free.lock().push_back(session);
    }
}

pub(crate) type SharedPool = Arc<Pool>;
