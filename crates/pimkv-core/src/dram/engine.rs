use crate::dram::{MemoryAccess, RequestId};

/// Completion feedback of one request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Completion {
    /// Handle of the completed request
    pub id: RequestId,
    /// Channel it was serviced on
    pub channel: usize,
    /// Linear bank index that serviced it
    pub bank: usize,
    /// Whether the bank's row stays open after the access
    pub row_open: bool,
    /// The request touched every bank of the channel; `row_open` then applies to all of them
    pub all_banks: bool,
}

/// Cycle-accurate DRAM timing backend driven by [`Pim`](crate::dram::Pim).
///
/// Implementors own bus arbitration, refresh and row timing. The stepper only
/// offers transactions, ticks the clock, and reads back completions.
///
/// # Examples
///
/// See `pimkv-fixed-latency` for a deterministic implementation.
pub trait TimingEngine {
    /// Whether the engine can queue `request` on `channel` right now.
    fn will_accept(&self, channel: usize, request: &MemoryAccess) -> bool;

    /// Queues `request` on `channel`. Only called after [`will_accept`](Self::will_accept) returned `true`.
    fn add_transaction(&mut self, channel: usize, request: &MemoryAccess);

    /// Advances the engine by one clock.
    fn clock_tick(&mut self);

    /// Drains the completions produced since the last call.
    fn take_completed(&mut self) -> Vec<Completion>;

    /// Whether an in-memory compute command is executing on `channel` this cycle.
    fn pim_active(&self, channel: usize) -> bool;

    /// Transactions queued or in service across all channels.
    fn outstanding(&self) -> usize;
}
