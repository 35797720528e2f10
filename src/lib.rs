//! # tyrdbs
//!
//! An embedded log-structured key/value storage engine.
//!
//! ## Core idea
//! Writes are batched into transactions. Every transaction is written as a
//! handful of immutable, compressed, paged files ("slices"), one per shard
//! it touches, and never modified again. Background workers merge slices
//! of similar size, so a shard holding N records is spread over
//! O(log N) slices. Reads merge the slices of a shard on the fly, newest
//! version of each key winning.
//!
//! ## Layers
//! - [`slice`]: page codec, slice writer with its multi-level index, reader.
//! - [`iterator`]: k-way merges over slices.
//! - [`ushard`]: size-tiered slice sets.
//! - [`log`]: transactions, background merging, compaction, watchers.

pub mod error;
pub mod io;
pub mod iterator;
pub mod log;
pub mod slice;
pub mod types;
pub mod ushard;

// Public re-exports for the top-level API
pub use error::{Error, Result};
pub use iterator::{MergeIterator, OverwriteIterator, StorageIterator, collect_records};
pub use log::{CommittedTransaction, Log, LogStats, Options, Snapshot, Transaction, Watcher};
pub use slice::{Slice, SliceWriter, Stats};
pub use types::{Key, Record, Tid, Value};
