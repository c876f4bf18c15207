//! Sequential DRAM row allocator.
//!
//! Hands out the rows of every channel in ascending row order, starting at
//! row 0. Deterministic and gap-free, which makes placements easy to read in
//! traces and tests.
//!
//! Implements the [`pimkv_core::allocator::RowAllocator`] trait.

#![warn(missing_docs)]

mod linear;

pub use linear::*;
