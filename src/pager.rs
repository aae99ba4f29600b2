//! Result pager (C6): a lazy sequence over result pages, synchronous or
//! read-ahead. Grounded on `spanner/src/reader.rs`'s `RowIterator`
//! (streaming row decode, resume-on-error) generalized to page tokens,
//! and on `spanner/src/session.rs`'s `CancellationToken` + `tokio::spawn`
//! idiom for the read-ahead background task.

use std::sync::Arc;

use tokio::sync::mpsc as tmpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{DriverError, Wrapped};
use crate::session_channel::SessionChannel;
use crate::transport::{IoUsage, Page, TimingInfo};
use crate::value::{Value, ValueCodec};

/// Cumulative IO counters across all pages fetched by this pager.
#[derive(Clone, Copy, Debug, Default)]
pub struct IoStats {
    pub read_ios: u64,
    pub write_ios: u64,
}

impl IoStats {
    fn accumulate(&mut self, usage: Option<IoUsage>) {
        if let Some(u) = usage {
            self.read_ios += u.read_ios;
            self.write_ios += u.write_ios;
        }
    }
}

/// Cumulative server-reported timing across all pages fetched.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimeStats {
    pub processing_time_millis: u64,
}

impl TimeStats {
    fn accumulate(&mut self, timing: Option<TimingInfo>) {
        if let Some(t) = timing {
            self.processing_time_millis += t.processing_time_millis;
        }
    }
}

enum NextPage {
    Page(Page, Option<IoUsage>, Option<TimingInfo>),
    Done,
    Err(Wrapped),
}

enum Mode {
    Sync,
    ReadAhead {
        queue: tmpsc::Receiver<NextPage>,
        producer: tokio::task::JoinHandle<()>,
    },
}

/// Lazy sequence over a statement's result pages. Valid only while its
/// parent transaction is open; `next()` on a closed parent fails with
/// [`DriverError::ResultParentInactive`]. Iteration is single-pass.
pub struct Pager {
    channel: Arc<SessionChannel>,
    codec: Arc<dyn ValueCodec>,
    txn_id: String,
    parent_closed: CancellationToken,
    current_values: std::vec::IntoIter<Vec<u8>>,
    next_page_token: Option<String>,
    mode: Mode,
    io_stats: IoStats,
    time_stats: TimeStats,
    closed: bool,
    /// Set once the read-ahead producer has signalled `Done` (or the queue
    /// has been dropped); `has_next()` stops reporting a pending page once
    /// this is observed, instead of assuming read-ahead mode always has
    /// more to come.
    producer_done: bool,
}

impl Pager {
    /// Constructed from the first page returned by `executeStatement`.
    /// `<= 1` is synchronous, `>= 2` spawns a background prefetcher
    /// queueing up to `read_ahead - 1` pages ahead of the consumer.
    pub(crate) fn new(
        channel: Arc<SessionChannel>,
        codec: Arc<dyn ValueCodec>,
        txn_id: String,
        parent_closed: CancellationToken,
        first_page: Page,
        io: Option<IoUsage>,
        timing: Option<TimingInfo>,
        read_ahead: usize,
    ) -> Self {
        let mut io_stats = IoStats::default();
        let mut time_stats = TimeStats::default();
        io_stats.accumulate(io);
        time_stats.accumulate(timing);

        let next_page_token = first_page.next_page_token.clone();
        let current_values = first_page.values.into_iter();

        let mode = if read_ahead >= 2 {
            let (tx, rx) = tmpsc::channel(read_ahead);
            let producer = tokio::spawn(prefetch(
                channel.clone(),
                txn_id.clone(),
                parent_closed.clone(),
                next_page_token.clone(),
                tx,
            ));
            Mode::ReadAhead {
                queue: rx,
                producer,
            }
        } else {
            Mode::Sync
        };

        Pager {
            channel,
            codec,
            txn_id,
            parent_closed,
            current_values,
            next_page_token: if read_ahead >= 2 {
                None // ownership of token fetching moves to the producer
            } else {
                next_page_token
            },
            mode,
            io_stats,
            time_stats,
            closed: false,
            producer_done: false,
        }
    }

    pub fn io_stats(&self) -> IoStats {
        self.io_stats
    }

    pub fn time_stats(&self) -> TimeStats {
        self.time_stats
    }

    fn check_active(&self) -> Result<(), DriverError> {
        if self.closed || self.parent_closed.is_cancelled() {
            return Err(DriverError::ResultParentInactive);
        }
        Ok(())
    }

    pub fn has_next(&mut self) -> bool {
        self.current_values.len() > 0 || self.next_page_token.is_some() || self.has_pending_page()
    }

    fn has_pending_page(&self) -> bool {
        matches!(&self.mode, Mode::ReadAhead { .. }) && !self.producer_done
    }

    /// Decodes a single value from the current row's binary encoding via
    /// the value codec. `None` signals end of stream.
    pub async fn next(&mut self) -> Result<Option<Value>, DriverError> {
        self.check_active()?;

        if let Some(raw) = self.current_values.next() {
            return Ok(Some(self.codec.decode(&raw).map_err(DriverError::from)?));
        }

        self.advance_page().await?;

        match self.current_values.next() {
            Some(raw) => Ok(Some(self.codec.decode(&raw).map_err(DriverError::from)?)),
            None => Ok(None),
        }
    }

    async fn advance_page(&mut self) -> Result<(), DriverError> {
        match &mut self.mode {
            Mode::Sync => {
                let Some(token) = self.next_page_token.take() else {
                    return Ok(());
                };
                let (page, io, timing) = self
                    .channel
                    .fetch_page(&self.txn_id, token)
                    .await
                    .map_err(|w| w.cause)?;
                self.io_stats.accumulate(io);
                self.time_stats.accumulate(timing);
                self.next_page_token = page.next_page_token;
                self.current_values = page.values.into_iter();
                Ok(())
            }
            Mode::ReadAhead { queue, .. } => {
                match queue.recv().await {
                    Some(NextPage::Page(page, io, timing)) => {
                        self.io_stats.accumulate(io);
                        self.time_stats.accumulate(timing);
                        self.current_values = page.values.into_iter();
                        Ok(())
                    }
                    Some(NextPage::Err(w)) => {
                        self.producer_done = true;
                        Err(w.cause)
                    }
                    Some(NextPage::Done) | None => {
                        self.producer_done = true;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Explicit close. Also reached transitively when the parent
    /// transaction closes, via the shared cancellation token.
    pub fn close(&mut self) {
        self.closed = true;
        if let Mode::ReadAhead { producer, .. } = &self.mode {
            producer.abort();
        }
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if let Mode::ReadAhead { producer, .. } = &self.mode {
            producer.abort();
        }
    }
}

/// Background prefetcher: polls `parent_closed` and exits promptly when
/// the parent transaction closes, terminating on a nil token or error.
/// Errors are enqueued as a distinguished sentinel so `next()` surfaces
/// them in FIFO order.
async fn prefetch(
    channel: Arc<SessionChannel>,
    txn_id: String,
    parent_closed: CancellationToken,
    mut next_token: Option<String>,
    tx: tmpsc::Sender<NextPage>,
) {
    loop {
        let Some(token) = next_token.take() else {
            let _ = tx.send(NextPage::Done).await;
            return;
        };
        if parent_closed.is_cancelled() {
            return;
        }
        let fetch = channel.fetch_page(&txn_id, token);
        tokio::select! {
            _ = parent_closed.cancelled() => return,
            result = fetch => {
                match result {
                    Ok((page, io, timing)) => {
                        next_token = page.next_page_token.clone();
                        if tx.send(NextPage::Page(page, io, timing)).await.is_err() {
                            return;
                        }
                    }
                    Err(w) => {
                        let _ = tx.send(NextPage::Err(w)).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_page() -> Page {
        Page {
            values: vec![],
            next_page_token: None,
        }
    }

    #[test]
    fn sync_pager_with_no_next_page_has_no_next_once_drained() {
        // Constructed indirectly through Transaction in integration tests;
        // this just exercises the page-token bookkeeping invariant.
        let page = empty_page();
        assert!(page.next_page_token.is_none());
    }
}
