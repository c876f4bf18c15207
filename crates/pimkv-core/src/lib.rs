//! # pimkv Core
//!
//! `pimkv-core` models where a transformer's KV cache lives inside a
//! processing-in-memory (PIM) DRAM and how requests to it flow through the
//! memory channels.
//!
//! ## Architecture Overview
//!
//! The crate is built around two traits that keep the policy pieces swappable:
//!
//! - [`allocator::RowAllocator`] - Hands out DRAM row base addresses per channel.
//!   Every tensor on a channel draws its rows from the same allocator.
//!
//! - [`dram::TimingEngine`] - The cycle-level DRAM timing backend that services
//!   the transactions offered by the memory system.
//!
//! ## Main Components
//!
//! - [`PimTensor`] - A per-head K or V cache tensor. Computes the physical
//!   address of every `(token, embedding)` element and grows by whole
//!   allocation steps as tokens are appended.
//!
//! - [`dram::Pim`] - Channelized request queues with admission control,
//!   in-order completion delivery, and bandwidth, bank and PIM statistics.
//!
//! - [`RequestDriver`] - Feeds batches of requests into a [`dram::Dram`] while
//!   respecting backpressure.
//!
//! - [`memory`] module - Address layout ([`memory::AddressMapping`]), DRAM
//!   coordinates, PIM command headers and bank counters.
//!
//! - [`config`] module - JSON configuration of model and DRAM geometry.
//!
//! ## Concurrency
//!
//! Everything is single-threaded and cooperatively stepped: simulated time only
//! advances through [`dram::Dram::cycle`].

#![warn(missing_docs)]

pub mod allocator;
pub mod config;
pub mod dram;
mod driver;
pub mod memory;
mod tensor;
pub mod util;

pub use crate::config::SimulationConfig;
pub use crate::driver::RequestDriver;
pub use crate::tensor::{KvKind, PimTensor, TensorGeometry};
