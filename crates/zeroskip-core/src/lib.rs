//! # zeroskip-core
//!
//! An embedded, append-only, crash-resilient ordered key/value store backed
//! by a directory of files.
//!
//! The core guarantees durability of committed transactions across crashes,
//! presents a single totally-ordered key-space built from overlapping file
//! generations (active, finalised, packed), and coordinates a single writer
//! and a single packer across OS processes through on-disk advisory locks.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use zeroskip_core::{DbEngine, OpenMode};
//!
//! fn main() -> zeroskip_core::Result<()> {
//!     let mut db = DbEngine::open("./data.zsdb", OpenMode::Create)?;
//!     let txn = db.transaction_begin()?;
//!     db.add(b"foo", b"bar", &txn)?;
//!     db.commit(&txn)?;
//!     assert_eq!(db.fetch(b"foo")?.as_deref(), Some(b"bar".as_ref()));
//!     Ok(())
//! }
//! ```
//!
//! Out of scope for this crate: a hardened CLI, configuration file parsing,
//! and a production logging backend (the crate only emits `tracing` events;
//! wiring a subscriber is left to the embedder or the `zeroskip-cli` binary).

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod storage;
pub mod transaction;

pub use config::ZeroskipConfig;
pub use engine::{DbEngine, DbInfo, DbDumpLevel, OpenMode, Visitor};
pub use error::{Error, Result};
pub use transaction::Transaction;
