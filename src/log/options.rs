use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ushard::MAX_TIERS;

/// Default budget of one update block.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Configuration of a [`Log`](crate::log::Log).
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory slice files are created in.
    pub dir: PathBuf,
    /// Number of independent shards the key space is split into.
    pub ushards: usize,
    /// Background merge threads. 0 disables background merging; slices
    /// then only go away through explicit compaction.
    pub merge_threads: usize,
    /// Outstanding slice ceiling. Transactions wait while it is exceeded.
    ///
    /// With background merging it must cover every slice that can rest
    /// below the merge threshold (`ushards * 16 * max_slices_per_tier`),
    /// otherwise writers could wait for a merge that never comes. Without
    /// merge threads only [`Log::compact`](crate::log::Log::compact)
    /// releases waiting writers.
    pub max_slices: usize,
    /// A tier holding more slices than this gets merged.
    pub max_slices_per_tier: usize,
    /// Budget of one update block in a transaction.
    pub block_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dir: PathBuf::from("."),
            ushards: 16,
            merge_threads: 2,
            max_slices: 16384,
            max_slices_per_tier: 4,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl Options {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Options {
            dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn ushards(mut self, ushards: usize) -> Self {
        self.ushards = ushards;
        self
    }

    pub fn merge_threads(mut self, threads: usize) -> Self {
        self.merge_threads = threads;
        self
    }

    pub fn max_slices(mut self, max_slices: usize) -> Self {
        self.max_slices = max_slices;
        self
    }

    pub fn max_slices_per_tier(mut self, max: usize) -> Self {
        self.max_slices_per_tier = max;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.ushards == 0 || self.ushards > u16::MAX as usize + 1 {
            return Err(Error::InvalidArgument(format!(
                "ushard count {} out of range",
                self.ushards
            )));
        }
        if self.max_slices_per_tier == 0 {
            return Err(Error::InvalidArgument(
                "max_slices_per_tier must be at least 1".into(),
            ));
        }
        if self.max_slices == 0 {
            return Err(Error::InvalidArgument("max_slices must be at least 1".into()));
        }
        let resting = self
            .ushards
            .saturating_mul(MAX_TIERS)
            .saturating_mul(self.max_slices_per_tier);
        if self.merge_threads > 0 && self.max_slices < resting {
            return Err(Error::InvalidArgument(format!(
                "max_slices {} is below the {} slices merging can leave behind",
                self.max_slices, resting
            )));
        }
        if self.block_size == 0 {
            return Err(Error::InvalidArgument("block_size must be at least 1".into()));
        }
        Ok(())
    }
}
