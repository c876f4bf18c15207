//! Randomized DRAM row allocator.
//!
//! Hands out the rows of every channel in a seeded random order. Tensors that
//! share a channel end up interleaved across the whole row space instead of
//! packed at the bottom, which is closer to what a long-running serving
//! system sees after many requests came and went.
//!
//! Implements the [`pimkv_core::allocator::RowAllocator`] trait.

#![warn(missing_docs)]

mod shuffled;

pub use shuffled::*;
