//! # pimkv
//!
//! Facade over [`pimkv_core`] and the optional allocator and timing engine
//! plugins. Enable the plugins through the `linear`, `shuffled` and
//! `fixed-latency` features.

pub use pimkv_core::*;

#[cfg(feature = "linear")]
pub use pimkv_linear::LinearRowAllocator;

#[cfg(feature = "shuffled")]
pub use pimkv_shuffled::ShuffledRowAllocator;

#[cfg(feature = "fixed-latency")]
pub use pimkv_fixed_latency::{FixedLatency, FixedLatencyConfig};
