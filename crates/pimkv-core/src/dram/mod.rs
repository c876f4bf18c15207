//! Channelized request queueing and simulation stepping.
//!
//! [`Dram`] is the interface the request producers drive: admission check,
//! enqueue, single-step advance, completion retrieval and statistics. [`Pim`]
//! is the concrete memory system, forwarding requests to a swappable
//! [`TimingEngine`].
//!
//! Stepping is cooperative and single-threaded: nothing happens between two
//! calls to [`Dram::cycle`]. Callers apply backpressure by checking
//! [`Dram::is_full`] before [`Dram::push`] and [`Dram::is_empty`] before
//! [`Dram::top`]/[`Dram::pop`].

mod engine;
mod pim;
mod request;
mod stats;

pub use self::engine::{Completion, TimingEngine};
pub use self::pim::Pim;
pub use self::request::{AccessKind, MemoryAccess, RequestId};
pub use self::stats::{ChannelReport, DramReport, MemoryIoStat};

use crate::memory::BankUtilization;
use serde::Serialize;
use std::fmt;

/// Simulation phase that elapsed cycles are attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    /// Prompt processing: the KV cache is filled
    Prefill,
    /// Token generation: one token appended per step
    Decode,
    /// Anything else
    Other,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Prefill => write!(f, "prefill"),
            Stage::Decode => write!(f, "decode"),
            Stage::Other => write!(f, "other"),
        }
    }
}

/// Per-channel request queue of a DRAM subsystem.
///
/// All operations are precondition-based: violating a precondition (push when
/// full, top/pop when empty) is a bug in the caller and panics.
pub trait Dram {
    /// Whether any channel still has requests in flight.
    fn running(&self) -> bool;

    /// Advances simulated time by exactly one tick on every channel.
    fn cycle(&mut self);

    /// Whether `request` would be refused on channel `cid` right now.
    fn is_full(&self, cid: usize, request: &MemoryAccess) -> bool;

    /// Enqueues `request` on channel `cid`.
    ///
    /// # Panics
    ///
    /// Panics if [`is_full`](Self::is_full) is true for the request.
    fn push(&mut self, cid: usize, request: &MemoryAccess);

    /// Whether channel `cid` has no completed request waiting.
    fn is_empty(&self, cid: usize) -> bool;

    /// Oldest completed request of channel `cid`.
    ///
    /// # Panics
    ///
    /// Panics if the channel is empty.
    fn top(&self, cid: usize) -> RequestId;

    /// Removes the oldest completed request of channel `cid`.
    ///
    /// # Panics
    ///
    /// Panics if the channel is empty.
    fn pop(&mut self, cid: usize);

    /// Destination channel of `request`, decoded from its address.
    fn get_channel_id(&self, request: &MemoryAccess) -> usize;

    /// Number of channels.
    fn n_channels(&self) -> usize;

    /// Request address alignment in bytes.
    fn addr_align(&self) -> u64;

    /// Bus utilization averaged over channels and the whole run.
    fn get_avg_bw_util(&self) -> f64;

    /// Mean cycles per channel spent executing PIM commands since the last reset.
    fn get_avg_pim_cycle(&self) -> u64;

    /// Zeroes the PIM-busy counters, delimiting a measurement phase.
    fn reset_pim_cycle(&mut self);

    /// Attributes the cycles elapsed since the previous call to `stage`.
    fn log(&mut self, stage: Stage);

    /// Bank access counters and open-row flags.
    fn bank_stats(&self) -> &BankUtilization;

    /// Emits the current counters through the logger.
    fn print_stat(&self) {}

    /// Accesses per cycle of one bank.
    fn get_bank_utilization(&self, channel: usize, bank: usize) -> f64 {
        self.bank_stats().utilization(channel, bank)
    }
}
