use log::info;
use pimkv_core::allocator::{FIRST_ROW, RowAllocator};
use pimkv_core::memory::AddressMapping;
use pimkv_core::util::{Rng, make_vec};
use rand::prelude::SliceRandom;
use thiserror::Error;

/// Errors returned by [`ShuffledRowAllocator`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The requested channel is not managed by the allocator.
    #[error("channel {channel} out of range, allocator manages {n_channels} channels")]
    ChannelOutOfRange {
        /// Requested channel
        channel: usize,
        /// Channels managed
        n_channels: usize,
    },
    /// Every row of the channel has been handed out.
    #[error("channel {channel} exhausted after {rows} rows")]
    Exhausted {
        /// Channel that ran out
        channel: usize,
        /// Rows available on the channel
        rows: usize,
    },
}

/// Row allocator handing out each channel's rows in a random permutation.
///
/// Every channel draws from its own generator derived from the seed, so the
/// order on one channel does not depend on how often the others allocate.
pub struct ShuffledRowAllocator {
    mapping: AddressMapping,
    seed: u64,
    /// Remaining rows per channel; allocation pops from the back
    free: Vec<Vec<usize>>,
    rows_per_channel: usize,
}

impl ShuffledRowAllocator {
    /// Creates an allocator over all rows the mapping can address.
    pub fn new(mapping: AddressMapping, n_channels: usize, seed: u64) -> Self {
        Self::with_row_limit(mapping, n_channels, mapping.row_count() - FIRST_ROW, seed)
    }

    /// Creates an allocator drawing from the first `rows` rows of each channel,
    /// starting at [`FIRST_ROW`].
    pub fn with_row_limit(
        mapping: AddressMapping,
        n_channels: usize,
        rows: usize,
        seed: u64,
    ) -> Self {
        let rows_per_channel = rows.min(mapping.row_count() - FIRST_ROW);
        let free = make_vec(n_channels, |channel| {
            let mut rows: Vec<usize> = (FIRST_ROW..FIRST_ROW + rows_per_channel).collect();
            rows.shuffle(&mut Rng::for_channel(seed, channel));
            rows
        });
        info!(
            "shuffled allocator: {} channels x {} rows, seed {}",
            n_channels, rows_per_channel, seed
        );
        ShuffledRowAllocator {
            mapping,
            seed,
            free,
            rows_per_channel,
        }
    }

    /// Seed the permutation was drawn from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RowAllocator for ShuffledRowAllocator {
    type Error = Error;

    fn allocate(&mut self, channel: usize) -> Result<u64, Self::Error> {
        let n_channels = self.free.len();
        let free = self.free.get_mut(channel).ok_or(Error::ChannelOutOfRange {
            channel,
            n_channels,
        })?;
        let row = free.pop().ok_or(Error::Exhausted {
            channel,
            rows: self.rows_per_channel,
        })?;
        Ok(self.mapping.encode_address(channel, 0, 0, 0, row, 0))
    }

    fn allocated(&self, channel: usize) -> usize {
        self.free
            .get(channel)
            .map_or(0, |free| self.rows_per_channel - free.len())
    }
}
