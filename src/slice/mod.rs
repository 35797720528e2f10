//! Immutable, paged, compressed slice files.
//!
//! A slice is written once by a [`SliceWriter`], then opened read-only as
//! a [`Slice`] any number of times.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ [crc][leaf 0]                                │
//! │ [marker][crc][leaf 1]                        │
//! │ [marker][crc][index page]   (on overflow)    │
//! │ ...                                          │
//! │ [marker][crc][leaf N]                        │
//! │ INVALID marker                               │
//! │ [marker][crc][index page] ... [root]         │
//! │ INVALID marker                               │
//! │ Header (58B)                                 │
//! └──────────────────────────────────────────────┘
//! ```

pub mod header;
pub mod iterator;
pub mod location;
pub mod node;
pub mod reader;
pub mod writer;

pub use header::{Header, SLICE_SIGNATURE, Stats};
pub use iterator::SliceIterator;
pub use location::Location;
pub use node::{MAX_KEY_SIZE, MAX_KEYS, PAGE_SIZE};
pub use reader::Slice;
pub use writer::SliceWriter;
