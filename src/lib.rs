#![allow(clippy::result_large_err)]
//! # ledger-driver
//!
//! A client-side driver for a managed, append-only ledger database with a
//! session-oriented, transactional query API.
//!
//! The driver lets application code submit an idempotent transaction body — a
//! closure that issues one or more PartiQL statements — and have it executed
//! exactly once against the remote ledger, with automatic retry on transient
//! failures, commit-digest verification, and safe concurrent use from many
//! tasks.
//!
//! The wire codec, ledger administration, the self-describing value format's
//! definition, credential/endpoint resolution, and log sinks are all external
//! collaborators: this crate depends on them only through the
//! [`transport::Transport`] and [`value::ValueCodec`] traits, plus whatever
//! `tracing` subscriber the application installs.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use ledger_driver::config::DriverConfigBuilder;
//! use ledger_driver::driver::Driver;
//! use ledger_driver::transaction::Statement;
//! use ledger_driver::value::Value;
//! use std::sync::Arc;
//!
//! async fn run(transport: Arc<dyn ledger_driver::transport::Transport>) -> Result<(), ledger_driver::error::DriverError> {
//!     let config = DriverConfigBuilder::new()
//!         .ledger("my-ledger")
//!         .transport(transport)
//!         .build()?;
//!     let driver = Driver::new(config);
//!
//!     let rows = driver
//!         .execute_query(|txn| async move {
//!             let mut guard = txn.lock().await;
//!             guard
//!                 .execute(Statement::with_params(
//!                     "SELECT * FROM Orders WHERE CustomerId = ?",
//!                     vec![Value::string("abc-123")],
//!                 ))
//!                 .await
//!         })
//!         .await?;
//!
//!     driver.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module map
//!
//! | Module | Component |
//! |---|---|
//! | [`hash`] | C1 — commit-digest hashing and the `dot` combine |
//! | [`value`] | C2 — value codec adapter |
//! | [`backoff`] | C3 — backoff policy |
//! | [`retry`] | C4 — retry policy |
//! | [`transport`] | C5's external interface — wire frame types and the `Transport` trait |
//! | [`session_channel`] | C5 — multiplexed bidirectional session stream |
//! | [`pager`] | C6 — result pager, synchronous or read-ahead |
//! | [`transaction`] | C7 — per-transaction state and hash chain |
//! | [`session`] | C8 — transaction host, error classification |
//! | [`pool`] | C9 (pool half) — session free-list and permit semaphore |
//! | [`driver`] | C9 — public `Execute`/`ListTableNames`/`Close` API |
//! | [`config`] | driver configuration surface |
//! | [`error`] | crate-wide error taxonomy |

pub mod backoff;
pub mod config;
pub mod driver;
pub mod error;
pub mod hash;
pub mod pager;
pub(crate) mod pool;
pub mod retry;
pub mod session;
pub mod session_channel;
pub mod transaction;
pub mod transport;
pub mod value;

pub use driver::Driver;
pub use error::DriverError;
