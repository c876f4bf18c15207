use log::{debug, trace};
use pimkv_core::SimulationConfig;
use pimkv_core::dram::{AccessKind, Completion, MemoryAccess, TimingEngine};
use pimkv_core::memory::AddressMapping;
use pimkv_core::util::make_vec;
use serde::Deserialize;
use std::collections::VecDeque;

/// Timing parameters, read from the `engine` section of the simulation config.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FixedLatencyConfig {
    /// Transactions a channel holds at once, queued or in service
    pub queue_depth: usize,
    /// Cycles for an access to the open row
    pub row_hit_latency: u64,
    /// Cycles for an access that has to open a row first
    pub row_miss_latency: u64,
    /// Cycles a PIM command occupies its channel
    pub pim_latency: u64,
}

impl Default for FixedLatencyConfig {
    fn default() -> Self {
        FixedLatencyConfig {
            queue_depth: 32,
            row_hit_latency: 4,
            row_miss_latency: 12,
            pim_latency: 24,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct InService {
    request: MemoryAccess,
    row: usize,
    done_at: u64,
}

#[derive(Debug, Default)]
struct Bank {
    queue: VecDeque<(MemoryAccess, usize)>,
    current: Option<InService>,
    open_row: Option<usize>,
}

#[derive(Debug, Default)]
struct Channel {
    banks: Vec<Bank>,
    pim_queue: VecDeque<MemoryAccess>,
    pim_current: Option<InService>,
    occupancy: usize,
}

impl Channel {
    fn banks_idle(&self) -> bool {
        self.banks.iter().all(|b| b.current.is_none())
    }
}

/// Deterministic timing engine with per-bank queues and a PIM lane per channel.
///
/// # Implementation
///
/// Implements [`pimkv_core::dram::TimingEngine`]. Requests on different banks
/// proceed in parallel and may finish out of order. A PIM command waits for
/// all banks of its channel to drain, then blocks them for `pim_latency`
/// cycles and closes every open row.
#[derive(Debug)]
pub struct FixedLatency {
    config: FixedLatencyConfig,
    mapping: AddressMapping,
    channels: Vec<Channel>,
    now: u64,
    completed: Vec<Completion>,
}

impl FixedLatency {
    /// Creates an engine for `n_channels` channels laid out by `mapping`.
    pub fn new(config: FixedLatencyConfig, mapping: AddressMapping, n_channels: usize) -> Self {
        assert!(config.queue_depth > 0, "queue_depth must be non-zero");
        debug!("fixed latency engine: {:?}", config);
        FixedLatency {
            config,
            mapping,
            channels: make_vec(n_channels, |_| Channel {
                banks: make_vec(mapping.bank_count(), |_| Bank::default()),
                ..Default::default()
            }),
            now: 0,
            completed: vec![],
        }
    }

    /// Creates an engine from the simulation config and its `engine` section.
    ///
    /// # Errors
    ///
    /// Returns error if the `engine` section does not describe a [`FixedLatencyConfig`].
    pub fn from_config(config: &SimulationConfig) -> pimkv_core::config::Result<Self> {
        Ok(Self::new(
            config.engine_config()?,
            config.mapping(),
            config.n_channels,
        ))
    }

    /// Timing parameters in use.
    pub fn config(&self) -> &FixedLatencyConfig {
        &self.config
    }

    fn finish(&mut self) {
        let now = self.now;
        for (cid, ch) in self.channels.iter_mut().enumerate() {
            if let Some(svc) = ch.pim_current.filter(|s| s.done_at <= now) {
                ch.pim_current = None;
                ch.occupancy -= 1;
                ch.banks.iter_mut().for_each(|b| b.open_row = None);
                self.completed.push(Completion {
                    id: svc.request.id,
                    channel: cid,
                    bank: 0,
                    row_open: false,
                    all_banks: true,
                });
            }
            for (bid, bank) in ch.banks.iter_mut().enumerate() {
                let Some(svc) = bank.current.filter(|s| s.done_at <= now) else {
                    continue;
                };
                bank.current = None;
                ch.occupancy -= 1;
                // precharge if the next request wants another row
                let row_open = bank.queue.front().is_none_or(|(_, row)| *row == svc.row);
                bank.open_row = row_open.then_some(svc.row);
                self.completed.push(Completion {
                    id: svc.request.id,
                    channel: cid,
                    bank: bid,
                    row_open,
                    all_banks: false,
                });
            }
        }
    }

    fn start(&mut self) {
        let now = self.now;
        let config = self.config;
        for ch in self.channels.iter_mut() {
            if ch.pim_current.is_some() {
                continue;
            }
            if !ch.pim_queue.is_empty() {
                if ch.banks_idle() {
                    if let Some(request) = ch.pim_queue.pop_front() {
                        trace!("PIM command {} starts at {}", request.id, now);
                        ch.pim_current = Some(InService {
                            request,
                            row: 0,
                            done_at: now + config.pim_latency.max(1),
                        });
                    }
                }
                continue;
            }
            for bank in ch.banks.iter_mut().filter(|b| b.current.is_none()) {
                if let Some((request, row)) = bank.queue.pop_front() {
                    let latency = if bank.open_row == Some(row) {
                        config.row_hit_latency
                    } else {
                        config.row_miss_latency
                    };
                    bank.open_row = Some(row);
                    bank.current = Some(InService {
                        request,
                        row,
                        done_at: now + latency.max(1),
                    });
                }
            }
        }
    }
}

impl TimingEngine for FixedLatency {
    fn will_accept(&self, channel: usize, _request: &MemoryAccess) -> bool {
        self.channels[channel].occupancy < self.config.queue_depth
    }

    fn add_transaction(&mut self, channel: usize, request: &MemoryAccess) {
        let ch = &mut self.channels[channel];
        assert!(
            ch.occupancy < self.config.queue_depth,
            "channel {channel} queue overflow"
        );
        ch.occupancy += 1;
        match request.kind {
            AccessKind::PimHeader => ch.pim_queue.push_back(*request),
            AccessKind::Read | AccessKind::Write => {
                let addr = self.mapping.decode(request.address);
                let bank = addr.bank_index(&self.mapping);
                ch.banks[bank].queue.push_back((*request, addr.row));
            }
        }
    }

    fn clock_tick(&mut self) {
        // requests added since the last tick start on this one
        self.start();
        self.now += 1;
        self.finish();
        self.start();
    }

    fn take_completed(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completed)
    }

    fn pim_active(&self, channel: usize) -> bool {
        self.channels[channel].pim_current.is_some()
    }

    fn outstanding(&self) -> usize {
        self.channels.iter().map(|c| c.occupancy).sum()
    }
}
