use crate::util::make_vec;
use itertools::Itertools;
use log::{Level, log};
use serde::Serialize;

/// Per-bank counters of one channel, as reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BankStat {
    /// Linear bank index (`bankgroup * banks_per_group + bank`)
    pub bank: usize,
    /// Accesses routed to the bank
    pub accesses: u64,
    /// Whether the bank currently holds an open row
    pub active: bool,
    /// Accesses per elapsed cycle, clamped to `[0, 1]`
    pub utilization: f64,
}

/// Per-channel, per-bank access counters and open-row flags.
///
/// Only the request queue mutates the tracker; everything else reads it.
/// Indices come from the address codec, so an out-of-range channel or bank
/// is a programming error and panics.
#[derive(Debug, Clone, Serialize)]
pub struct BankUtilization {
    access_count: Vec<Vec<u64>>,
    active: Vec<Vec<bool>>,
    elapsed_cycles: u64,
}

impl BankUtilization {
    /// Creates a zeroed tracker for `n_channels` channels of `n_banks` banks each.
    pub fn new(n_channels: usize, n_banks: usize) -> Self {
        BankUtilization {
            access_count: make_vec(n_channels, |_| vec![0; n_banks]),
            active: make_vec(n_channels, |_| vec![false; n_banks]),
            elapsed_cycles: 0,
        }
    }

    /// Number of tracked channels.
    pub fn n_channels(&self) -> usize {
        self.access_count.len()
    }

    /// Number of tracked banks per channel.
    pub fn n_banks(&self) -> usize {
        self.access_count.first().map_or(0, Vec::len)
    }

    fn check(&self, channel: usize, bank: usize) {
        assert!(
            channel < self.n_channels() && bank < self.n_banks(),
            "bank ({channel}, {bank}) out of range ({} channels x {} banks)",
            self.n_channels(),
            self.n_banks()
        );
    }

    /// Counts one access to `bank` of `channel`.
    pub fn track_access(&mut self, channel: usize, bank: usize) {
        self.check(channel, bank);
        self.access_count[channel][bank] += 1;
    }

    /// Records the open-row state reported by the timing engine.
    pub fn set_active(&mut self, channel: usize, bank: usize, active: bool) {
        self.check(channel, bank);
        self.active[channel][bank] = active;
    }

    /// Whether the bank currently holds an open row.
    pub fn is_active(&self, channel: usize, bank: usize) -> bool {
        self.check(channel, bank);
        self.active[channel][bank]
    }

    /// Accesses counted for the bank so far.
    pub fn access_count(&self, channel: usize, bank: usize) -> u64 {
        self.check(channel, bank);
        self.access_count[channel][bank]
    }

    /// Advances the simulated time used for normalization.
    pub fn advance(&mut self, cycles: u64) {
        self.elapsed_cycles += cycles;
    }

    /// Simulated cycles seen by the tracker.
    pub fn elapsed_cycles(&self) -> u64 {
        self.elapsed_cycles
    }

    /// Accesses per elapsed cycle for one bank, in `[0, 1]`.
    ///
    /// Reporting only; admission never consults it.
    pub fn utilization(&self, channel: usize, bank: usize) -> f64 {
        let count = self.access_count(channel, bank);
        if self.elapsed_cycles == 0 {
            return 0.0;
        }
        (count as f64 / self.elapsed_cycles as f64).min(1.0)
    }

    /// Number of banks of `channel` with an open row.
    pub fn active_banks(&self, channel: usize) -> usize {
        self.active[channel].iter().filter(|a| **a).count()
    }

    /// Snapshot of every bank of one channel.
    pub fn channel_stats(&self, channel: usize) -> Vec<BankStat> {
        (0..self.n_banks())
            .map(|bank| BankStat {
                bank,
                accesses: self.access_count(channel, bank),
                active: self.is_active(channel, bank),
                utilization: self.utilization(channel, bank),
            })
            .collect()
    }

    /// Logs one line per channel with the per-bank access counts.
    pub fn log_stats(&self, level: Level) {
        for channel in 0..self.n_channels() {
            log!(
                level,
                "ch {:>2}: active {:>2} | {}",
                channel,
                self.active_banks(channel),
                self.access_count[channel]
                    .iter()
                    .enumerate()
                    .map(|(bank, n)| format!("b{bank}={n}"))
                    .join(" ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BankUtilization;

    #[test]
    fn counts_and_flags_are_per_bank() {
        let mut t = BankUtilization::new(2, 16);
        t.track_access(1, 5);
        t.track_access(1, 5);
        t.track_access(0, 15);
        t.set_active(1, 5, true);
        assert_eq!(t.access_count(1, 5), 2);
        assert_eq!(t.access_count(0, 15), 1);
        assert_eq!(t.access_count(0, 5), 0);
        assert!(t.is_active(1, 5));
        assert!(!t.is_active(0, 5));
        assert_eq!(t.active_banks(1), 1);
    }

    #[test]
    fn utilization_is_normalized_by_cycles() {
        let mut t = BankUtilization::new(1, 16);
        assert_eq!(t.utilization(0, 0), 0.0);
        for _ in 0..3 {
            t.track_access(0, 0);
        }
        t.advance(12);
        assert!((t.utilization(0, 0) - 0.25).abs() < 1e-12);
        t.track_access(0, 1);
        t.track_access(0, 1);
        t.advance(0);
        let stats = t.channel_stats(0);
        assert_eq!(stats.len(), 16);
        assert_eq!(stats[1].accesses, 2);
    }

    #[test]
    fn utilization_is_clamped() {
        let mut t = BankUtilization::new(1, 4);
        for _ in 0..10 {
            t.track_access(0, 2);
        }
        t.advance(4);
        assert_eq!(t.utilization(0, 2), 1.0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_bank_panics() {
        let mut t = BankUtilization::new(1, 16);
        t.track_access(0, 16);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_channel_panics() {
        let t = BankUtilization::new(2, 16);
        t.utilization(2, 0);
    }
}
