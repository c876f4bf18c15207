//! DRAM row allocation for KV-cache tensors.
//!
//! This module defines the [`RowAllocator`] trait, the single authority that hands
//! out row base addresses on a channel, and [`alloc_rows`], the entry point
//! tensors use to grow their footprint.

use log::trace;

/// Lowest row an allocator hands out.
///
/// Row 0 of channel 0 encodes to address `0`, the "no address" value of
/// [`PimTensor::get_addr`](crate::PimTensor::get_addr), so it is never used.
pub const FIRST_ROW: usize = 1;

/// Trait for allocators that hand out DRAM row base addresses per channel.
///
/// One allocator instance is shared by every tensor placed on its channels.
/// It must never return the same row address twice, neither to two tensors
/// nor twice to the same tensor. Rows are never freed: KV caches only grow.
///
/// # Associated Types
///
/// * `Error` - The error type returned by allocation operations. Must implement [`std::error::Error`].
///
/// # Examples
///
/// See the allocator implementations `pimkv-linear` and `pimkv-shuffled`.
pub trait RowAllocator {
    /// The error type returned by allocation operations.
    type Error: std::error::Error;

    /// Returns a fresh, row-aligned base address on `channel`.
    ///
    /// The returned address has its column and offset bits cleared; bank bits
    /// are left for the caller to patch.
    ///
    /// # Errors
    ///
    /// May return an error if:
    /// * `channel` is not managed by this allocator
    /// * The channel has run out of rows
    fn allocate(&mut self, channel: usize) -> Result<u64, Self::Error>;

    /// Number of rows handed out on `channel` so far.
    fn allocated(&self, channel: usize) -> usize;
}

/// Allocate `count` rows on `channel`, in order.
///
/// # Errors
///
/// Propagates the first allocator error. Rows obtained before the failure
/// are not returned to the allocator.
pub fn alloc_rows<A: RowAllocator + ?Sized>(
    allocator: &mut A,
    channel: usize,
    count: usize,
) -> Result<Vec<u64>, A::Error> {
    let rows = (0..count)
        .map(|_| allocator.allocate(channel))
        .collect::<Result<Vec<_>, _>>()?;
    trace!(
        "allocated {} rows on channel {} ({} total)",
        rows.len(),
        channel,
        allocator.allocated(channel)
    );
    Ok(rows)
}
