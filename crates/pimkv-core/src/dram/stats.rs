use crate::dram::Stage;
use crate::memory::BankStat;
use serde::Serialize;
use std::collections::BTreeMap;

/// Throughput of one channel over one statistics interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryIoStat {
    /// First cycle of the interval
    pub start_cycle: u64,
    /// Requests completed during the interval
    pub processed_requests: u64,
    /// Fraction of the interval the data bus was busy
    pub bandwidth_utilization: f64,
}

/// Aggregates of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    /// Channel index
    pub channel: usize,
    /// Requests completed over the whole run
    pub processed_requests: u64,
    /// Bus utilization over the whole run
    pub bandwidth_utilization: f64,
    /// Cycles spent executing PIM commands since the last reset
    pub pim_cycles: u64,
    /// Closed statistics intervals
    pub intervals: Vec<MemoryIoStat>,
    /// Per-bank counters
    pub banks: Vec<BankStat>,
}

/// Snapshot of the memory system counters for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DramReport {
    /// Simulated cycles so far
    pub cycles: u64,
    /// Mean bus utilization over channels
    pub avg_bw_util: f64,
    /// Mean PIM-busy cycles over channels
    pub avg_pim_cycle: u64,
    /// Cycles attributed to each stage
    pub stage_cycles: BTreeMap<Stage, u64>,
    /// Per-channel details
    pub channels: Vec<ChannelReport>,
}
