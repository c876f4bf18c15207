use log::{debug, warn};
use pimkv_core::allocator::{FIRST_ROW, RowAllocator};
use pimkv_core::memory::AddressMapping;
use thiserror::Error;

/// Errors returned by [`LinearRowAllocator`].
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

/// Row allocator handing out rows in ascending order per channel.
///
/// # Implementation
///
/// Implements [`pimkv_core::allocator::RowAllocator`]. Returned addresses
/// carry the channel and row bits only; bank, column and offset bits are zero.
/// Rows start at [`FIRST_ROW`], so no returned address is `0`.
#[derive(Debug, Clone)]
pub struct LinearRowAllocator {
    mapping: AddressMapping,
    rows_per_channel: usize,
    next: Vec<usize>,
}

impl LinearRowAllocator {
    /// Creates an allocator over all rows the mapping can address.
    pub fn new(mapping: AddressMapping, n_channels: usize) -> Self {
        Self::with_row_limit(mapping, n_channels, mapping.row_count() - FIRST_ROW)
    }

    /// Creates an allocator that hands out at most `rows` rows per channel.
    ///
    /// The limit is clamped to the rows the mapping can address above [`FIRST_ROW`].
    pub fn with_row_limit(mapping: AddressMapping, n_channels: usize, rows: usize) -> Self {
        let rows_per_channel = rows.min(mapping.row_count() - FIRST_ROW);
        if rows_per_channel < rows {
            warn!(
                "row limit {} exceeds the {} addressable rows, clamping",
                rows, rows_per_channel
            );
        }
        debug!(
            "linear allocator: {} channels x {} rows",
            n_channels, rows_per_channel
        );
        LinearRowAllocator {
            mapping,
            rows_per_channel,
            next: vec![0; n_channels],
        }
    }

    /// Rows still available on `channel`.
    pub fn remaining(&self, channel: usize) -> usize {
        self.next
            .get(channel)
            .map_or(0, |n| self.rows_per_channel - n)
    }
}

impl RowAllocator for LinearRowAllocator {
    type Error = Error;

    fn allocate(&mut self, channel: usize) -> Result<u64, Self::Error> {
        let n_channels = self.next.len();
        let next = self
            .next
            .get_mut(channel)
            .ok_or(Error::ChannelOutOfRange {
                channel,
                n_channels,
            })?;
        if *next == self.rows_per_channel {
            return Err(Error::Exhausted {
                channel,
                rows: self.rows_per_channel,
            });
        }
        let row = FIRST_ROW + *next;
        *next += 1;
        Ok(self.mapping.encode_address(channel, 0, 0, 0, row, 0))
    }

    fn allocated(&self, channel: usize) -> usize {
        self.next.get(channel).copied().unwrap_or(0)
    }
}
