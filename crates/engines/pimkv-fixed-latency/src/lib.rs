//! Fixed-latency DRAM timing engine.
//!
//! A deterministic stand-in for a cycle-accurate DRAM simulator. Each bank
//! serves its queue one request at a time with a row-hit or row-miss latency;
//! PIM commands occupy all banks of their channel for a fixed time.
//!
//! Implements the [`pimkv_core::dram::TimingEngine`] trait.
//!
//! # Use Cases
//!
//! - Testing request flow and statistics without an external simulator
//! - Quick what-if runs where relative numbers are enough

#![warn(missing_docs)]

mod fixed_latency;

pub use fixed_latency::{FixedLatency, FixedLatencyConfig};
