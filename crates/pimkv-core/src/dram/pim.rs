use crate::config::SimulationConfig;
use crate::dram::{
    AccessKind, ChannelReport, Dram, DramReport, MemoryAccess, MemoryIoStat, RequestId, Stage,
    TimingEngine,
};
use crate::memory::{AddressMapping, BankUtilization};
use crate::util::make_vec;
use log::{Level, info, trace};
use std::collections::{BTreeMap, HashSet, VecDeque};

/// PIM-capable memory system backed by a [`TimingEngine`].
///
/// Keeps, per channel, the admission-ordered list of in-flight requests and
/// a queue of completed ones. The engine may finish requests in any order;
/// a completion only becomes visible through [`Dram::top`] once every request
/// admitted before it on the same channel has completed too.
pub struct Pim<E: TimingEngine> {
    mem: E,
    mapping: AddressMapping,
    n_ch: usize,
    burst_cycles: u64,
    stat_interval: u64,
    addr_align: u64,
    cycles: u64,

    in_flight: Vec<VecDeque<RequestId>>,
    finished: Vec<HashSet<RequestId>>,
    responses: Vec<VecDeque<RequestId>>,

    // stats
    total_processed_requests: Vec<u64>,
    processed_requests: Vec<u64>,
    stats: Vec<Vec<MemoryIoStat>>,
    pim_cycles: Vec<u64>,
    stage_start: u64,
    stage_cycles: BTreeMap<Stage, u64>,
    bank_stats: BankUtilization,
}

impl<E: TimingEngine> Pim<E> {
    /// Creates the memory system for a validated configuration.
    pub fn new(config: &SimulationConfig, engine: E) -> Self {
        let mapping = config.mapping();
        let n_ch = config.n_channels;
        info!(
            "PIM memory: {} channels x {} banks, burst {} cycles, stat interval {}",
            n_ch,
            mapping.bank_count(),
            config.burst_cycles,
            config.stat_interval
        );
        Pim {
            mem: engine,
            mapping,
            n_ch,
            burst_cycles: config.burst_cycles,
            stat_interval: config.stat_interval,
            addr_align: config.addr_align,
            cycles: 0,
            in_flight: make_vec(n_ch, |_| VecDeque::new()),
            finished: make_vec(n_ch, |_| HashSet::new()),
            responses: make_vec(n_ch, |_| VecDeque::new()),
            total_processed_requests: vec![0; n_ch],
            processed_requests: vec![0; n_ch],
            stats: make_vec(n_ch, |_| Vec::new()),
            pim_cycles: vec![0; n_ch],
            stage_start: 0,
            stage_cycles: BTreeMap::new(),
            bank_stats: BankUtilization::new(n_ch, mapping.bank_count()),
        }
    }

    /// The backing timing engine.
    pub fn engine(&self) -> &E {
        &self.mem
    }

    /// Address layout used for routing.
    pub fn mapping(&self) -> &AddressMapping {
        &self.mapping
    }

    /// Simulated cycles so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Composes a physical address from DRAM coordinates.
    pub fn make_address(
        &self,
        channel: usize,
        rank: usize,
        bankgroup: usize,
        bank: usize,
        row: usize,
        col: usize,
    ) -> u64 {
        self.mapping
            .encode_address(channel, rank, bankgroup, bank, row, col)
    }

    /// Packs a PIM command header for `channel` and `row`.
    pub fn encode_pim_header(
        &self,
        channel: usize,
        row: usize,
        gather_write: bool,
        num_comps: u32,
        num_readres: u32,
    ) -> u64 {
        self.mapping
            .encode_pim_header(channel, row, gather_write, num_comps, num_readres)
    }

    /// Closes the current statistics interval of channel `cid`.
    fn update_stat(&mut self, cid: usize) {
        let processed = self.processed_requests[cid];
        let bw = (processed * self.burst_cycles) as f64 / self.stat_interval as f64;
        self.stats[cid].push(MemoryIoStat {
            start_cycle: self.cycles - self.stat_interval,
            processed_requests: processed,
            bandwidth_utilization: bw.min(1.0),
        });
        self.processed_requests[cid] = 0;
    }

    /// Moves completed requests from the head of the in-flight list to the response queue.
    fn retire(&mut self, cid: usize) {
        while let Some(&id) = self.in_flight[cid].front() {
            if !self.finished[cid].remove(&id) {
                break;
            }
            self.in_flight[cid].pop_front();
            self.responses[cid].push_back(id);
        }
    }

    fn channel_bw_util(&self, cid: usize) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        let busy = self.total_processed_requests[cid] * self.burst_cycles;
        (busy as f64 / self.cycles as f64).min(1.0)
    }

    /// Snapshot of all counters.
    pub fn report(&self) -> DramReport {
        DramReport {
            cycles: self.cycles,
            avg_bw_util: self.get_avg_bw_util(),
            avg_pim_cycle: self.get_avg_pim_cycle(),
            stage_cycles: self.stage_cycles.clone(),
            channels: (0..self.n_ch)
                .map(|cid| ChannelReport {
                    channel: cid,
                    processed_requests: self.total_processed_requests[cid],
                    bandwidth_utilization: self.channel_bw_util(cid),
                    pim_cycles: self.pim_cycles[cid],
                    intervals: self.stats[cid].clone(),
                    banks: self.bank_stats.channel_stats(cid),
                })
                .collect(),
        }
    }
}

impl<E: TimingEngine> Dram for Pim<E> {
    fn running(&self) -> bool {
        self.in_flight.iter().any(|q| !q.is_empty()) || self.mem.outstanding() > 0
    }

    fn cycle(&mut self) {
        self.mem.clock_tick();
        self.cycles += 1;
        self.bank_stats.advance(1);

        for cid in 0..self.n_ch {
            if self.mem.pim_active(cid) {
                self.pim_cycles[cid] += 1;
            }
        }
        for done in self.mem.take_completed() {
            trace!("ch {} bank {}: {} done", done.channel, done.bank, done.id);
            if done.all_banks {
                for bank in 0..self.bank_stats.n_banks() {
                    self.bank_stats.set_active(done.channel, bank, done.row_open);
                }
            } else {
                self.bank_stats
                    .set_active(done.channel, done.bank, done.row_open);
            }
            self.finished[done.channel].insert(done.id);
            self.processed_requests[done.channel] += 1;
            self.total_processed_requests[done.channel] += 1;
        }
        for cid in 0..self.n_ch {
            self.retire(cid);
        }
        if self.cycles % self.stat_interval == 0 {
            for cid in 0..self.n_ch {
                self.update_stat(cid);
            }
        }
    }

    fn is_full(&self, cid: usize, request: &MemoryAccess) -> bool {
        !self.mem.will_accept(cid, request)
    }

    fn push(&mut self, cid: usize, request: &MemoryAccess) {
        assert!(
            !self.is_full(cid, request),
            "push of {request} to full channel {cid}"
        );
        debug_assert_eq!(self.get_channel_id(request), cid);
        self.mem.add_transaction(cid, request);
        self.in_flight[cid].push_back(request.id);
        match request.kind {
            // all-bank command
            AccessKind::PimHeader => {
                for bank in 0..self.bank_stats.n_banks() {
                    self.bank_stats.track_access(cid, bank);
                }
            }
            AccessKind::Read | AccessKind::Write => {
                let bank = self.mapping.decode_bank(request.address);
                self.bank_stats.track_access(cid, bank);
            }
        }
        trace!("ch {}: pushed {}", cid, request);
    }

    fn is_empty(&self, cid: usize) -> bool {
        self.responses[cid].is_empty()
    }

    fn top(&self, cid: usize) -> RequestId {
        match self.responses[cid].front() {
            Some(id) => *id,
            None => panic!("top() on empty channel {cid}"),
        }
    }

    fn pop(&mut self, cid: usize) {
        if self.responses[cid].pop_front().is_none() {
            panic!("pop() on empty channel {cid}");
        }
    }

    fn get_channel_id(&self, request: &MemoryAccess) -> usize {
        self.mapping.decode(request.address).channel
    }

    fn n_channels(&self) -> usize {
        self.n_ch
    }

    fn addr_align(&self) -> u64 {
        self.addr_align
    }

    fn get_avg_bw_util(&self) -> f64 {
        let total: f64 = (0..self.n_ch).map(|cid| self.channel_bw_util(cid)).sum();
        total / self.n_ch as f64
    }

    fn get_avg_pim_cycle(&self) -> u64 {
        self.pim_cycles.iter().sum::<u64>() / self.n_ch as u64
    }

    fn reset_pim_cycle(&mut self) {
        self.pim_cycles.iter_mut().for_each(|c| *c = 0);
    }

    fn log(&mut self, stage: Stage) {
        let elapsed = self.cycles - self.stage_start;
        *self.stage_cycles.entry(stage).or_insert(0) += elapsed;
        self.stage_start = self.cycles;
        info!(
            "stage {}: {} cycles (cycle {}, avg PIM cycles {})",
            stage,
            elapsed,
            self.cycles,
            self.get_avg_pim_cycle()
        );
    }

    fn bank_stats(&self) -> &BankUtilization {
        &self.bank_stats
    }

    fn print_stat(&self) {
        for cid in 0..self.n_ch {
            info!(
                "ch {:>2}: {} requests, bw util {:.3}, PIM cycles {}",
                cid,
                self.total_processed_requests[cid],
                self.channel_bw_util(cid),
                self.pim_cycles[cid]
            );
        }
        info!(
            "total cycles {}, avg bw util {:.3}",
            self.cycles,
            self.get_avg_bw_util()
        );
        self.bank_stats.log_stats(Level::Info);
    }
}

#[cfg(test)]
mod tests {
    use super::Pim;
    use crate::config::SimulationConfig;
    use crate::dram::{AccessKind, Completion, Dram, MemoryAccess, RequestId, Stage, TimingEngine};
    use crate::memory::AddressMapping;
    use std::collections::VecDeque;

    /// Engine that completes each request after a scripted latency.
    struct Scripted {
        mapping: AddressMapping,
        depth: usize,
        latencies: VecDeque<u64>,
        default_latency: u64,
        now: u64,
        queued: Vec<Vec<(MemoryAccess, u64)>>,
        done: Vec<Completion>,
    }

    impl Scripted {
        fn new(depth: usize, latencies: &[u64]) -> Self {
            Scripted {
                mapping: AddressMapping::newton(),
                depth,
                latencies: latencies.iter().copied().collect(),
                default_latency: 3,
                now: 0,
                queued: vec![vec![]; 2],
                done: vec![],
            }
        }
    }

    impl TimingEngine for Scripted {
        fn will_accept(&self, channel: usize, _request: &MemoryAccess) -> bool {
            self.queued[channel].len() < self.depth
        }

        fn add_transaction(&mut self, channel: usize, request: &MemoryAccess) {
            let latency = self.latencies.pop_front().unwrap_or(self.default_latency);
            self.queued[channel].push((*request, self.now + latency));
        }

        fn clock_tick(&mut self) {
            self.now += 1;
            for (channel, queue) in self.queued.iter_mut().enumerate() {
                let now = self.now;
                let mapping = self.mapping;
                let done = &mut self.done;
                queue.retain(|(req, ready)| {
                    if *ready > now {
                        return true;
                    }
                    done.push(Completion {
                        id: req.id,
                        channel,
                        bank: mapping.decode_bank(req.address),
                        row_open: req.kind != AccessKind::PimHeader,
                        all_banks: req.kind == AccessKind::PimHeader,
                    });
                    false
                });
            }
        }

        fn take_completed(&mut self) -> Vec<Completion> {
            std::mem::take(&mut self.done)
        }

        fn pim_active(&self, channel: usize) -> bool {
            self.queued[channel]
                .iter()
                .any(|(r, _)| r.kind == AccessKind::PimHeader)
        }

        fn outstanding(&self) -> usize {
            self.queued.iter().map(Vec::len).sum()
        }
    }

    fn config() -> SimulationConfig {
        SimulationConfig::from_json(
            r#"{
                "precision": 2,
                "model_n_embd": 64,
                "n_channels": 2,
                "bank_per_channel": 4,
                "dram_page_size": 16,
                "stat_interval": 4,
                "burst_cycles": 1
            }"#,
        )
        .unwrap()
    }

    fn addr(channel: usize, bank: usize, row: usize) -> u64 {
        AddressMapping::newton().encode_address(channel, 0, bank / 4, bank % 4, row, 0)
    }

    fn drain(pim: &mut Pim<Scripted>) -> Vec<Vec<RequestId>> {
        let mut out = vec![vec![]; pim.n_channels()];
        for _ in 0..100 {
            pim.cycle();
            for (cid, seen) in out.iter_mut().enumerate() {
                while !pim.is_empty(cid) {
                    seen.push(pim.top(cid));
                    pim.pop(cid);
                }
            }
            if !pim.running() {
                break;
            }
        }
        out
    }

    #[test]
    fn completions_are_fifo_per_channel() {
        // second request finishes first inside the engine
        let mut pim = Pim::new(&config(), Scripted::new(8, &[6, 1, 2]));
        let a = MemoryAccess::read(1, addr(0, 0, 1));
        let b = MemoryAccess::read(2, addr(0, 5, 2));
        let c = MemoryAccess::write(3, addr(1, 2, 3));
        for r in [a, b, c] {
            let cid = pim.get_channel_id(&r);
            assert!(!pim.is_full(cid, &r));
            pim.push(cid, &r);
        }
        pim.cycle();
        assert!(pim.is_empty(0), "b is done but must wait behind a");
        let seen = drain(&mut pim);
        assert_eq!(seen[0], vec![RequestId(1), RequestId(2)]);
        assert_eq!(seen[1], vec![RequestId(3)]);
        assert!(!pim.running());
    }

    #[test]
    fn admission_reflects_engine_depth() {
        let mut pim = Pim::new(&config(), Scripted::new(1, &[]));
        let a = MemoryAccess::read(1, addr(0, 0, 1));
        let b = MemoryAccess::read(2, addr(0, 0, 2));
        pim.push(0, &a);
        assert!(pim.is_full(0, &b));
        assert!(!pim.is_full(1, &b));
        drain(&mut pim);
        assert!(!pim.is_full(0, &b));
    }

    #[test]
    #[should_panic(expected = "full channel")]
    fn push_when_full_panics() {
        let mut pim = Pim::new(&config(), Scripted::new(1, &[]));
        pim.push(0, &MemoryAccess::read(1, addr(0, 0, 1)));
        pim.push(0, &MemoryAccess::read(2, addr(0, 0, 2)));
    }

    #[test]
    #[should_panic(expected = "empty channel")]
    fn top_on_empty_panics() {
        let pim = Pim::new(&config(), Scripted::new(1, &[]));
        pim.top(0);
    }

    #[test]
    #[should_panic(expected = "empty channel")]
    fn pop_on_empty_panics() {
        let mut pim = Pim::new(&config(), Scripted::new(1, &[]));
        pim.pop(1);
    }

    #[test]
    fn channel_id_follows_address_codec() {
        let pim = Pim::new(&config(), Scripted::new(1, &[]));
        let r = MemoryAccess::read(1, pim.make_address(1, 0, 3, 2, 99, 4));
        assert_eq!(pim.get_channel_id(&r), 1);
        let h = MemoryAccess::pim_header(2, pim.encode_pim_header(1, 99, true, 3, 1));
        assert_eq!(pim.get_channel_id(&h), 1);
    }

    #[test]
    fn banks_are_tracked_on_admission() {
        let mut pim = Pim::new(&config(), Scripted::new(8, &[]));
        pim.push(0, &MemoryAccess::read(1, addr(0, 13, 1)));
        pim.push(0, &MemoryAccess::read(2, addr(0, 13, 1)));
        pim.push(1, &MemoryAccess::pim_header(3, pim.encode_pim_header(1, 4, false, 1, 1)));
        assert_eq!(pim.bank_stats().access_count(0, 13), 2);
        assert_eq!(pim.bank_stats().access_count(1, 0), 1);
        assert_eq!(pim.bank_stats().access_count(1, 15), 1);
        drain(&mut pim);
        assert!(pim.bank_stats().is_active(0, 13));
        assert!(pim.get_bank_utilization(0, 13) > 0.0);
    }

    #[test]
    fn pim_command_closes_rows_of_every_bank() {
        let mut pim = Pim::new(&config(), Scripted::new(8, &[]));
        pim.push(0, &MemoryAccess::read(1, addr(0, 5, 1)));
        pim.push(1, &MemoryAccess::read(2, addr(1, 5, 1)));
        drain(&mut pim);
        assert!(pim.bank_stats().is_active(0, 5));
        assert!(pim.bank_stats().is_active(1, 5));

        pim.push(0, &MemoryAccess::pim_header(3, pim.encode_pim_header(0, 4, false, 1, 1)));
        drain(&mut pim);
        assert_eq!(pim.bank_stats().active_banks(0), 0);
        // other channels keep their rows
        assert!(pim.bank_stats().is_active(1, 5));
    }

    #[test]
    fn pim_cycles_accumulate_and_reset() {
        let mut pim = Pim::new(&config(), Scripted::new(8, &[4]));
        let h = MemoryAccess::pim_header(1, pim.encode_pim_header(0, 4, false, 1, 1));
        pim.push(0, &h);
        drain(&mut pim);
        // busy for cycles 1..=3, completes on cycle 4; averaged over 2 channels
        assert_eq!(pim.report().channels[0].pim_cycles, 3);
        assert_eq!(pim.get_avg_pim_cycle(), 1);
        pim.reset_pim_cycle();
        assert_eq!(pim.get_avg_pim_cycle(), 0);
    }

    #[test]
    fn stage_log_attributes_elapsed_cycles() {
        let mut pim = Pim::new(&config(), Scripted::new(8, &[]));
        for _ in 0..5 {
            pim.cycle();
        }
        pim.log(Stage::Prefill);
        for _ in 0..3 {
            pim.cycle();
        }
        pim.log(Stage::Decode);
        pim.cycle();
        pim.log(Stage::Decode);
        let report = pim.report();
        assert_eq!(report.stage_cycles[&Stage::Prefill], 5);
        assert_eq!(report.stage_cycles[&Stage::Decode], 4);
    }

    #[test]
    fn interval_stats_and_bandwidth() {
        let mut pim = Pim::new(&config(), Scripted::new(8, &[1, 1]));
        pim.push(0, &MemoryAccess::read(1, addr(0, 0, 1)));
        pim.push(0, &MemoryAccess::read(2, addr(0, 1, 1)));
        for _ in 0..8 {
            pim.cycle();
        }
        let report = pim.report();
        let ch0 = &report.channels[0];
        assert_eq!(ch0.intervals.len(), 2);
        assert_eq!(ch0.intervals[0].processed_requests, 2);
        assert_eq!(ch0.intervals[0].start_cycle, 0);
        assert!((ch0.intervals[0].bandwidth_utilization - 0.5).abs() < 1e-12);
        assert_eq!(ch0.intervals[1].processed_requests, 0);
        // 2 bursts of 1 cycle over 8 cycles, channel 1 idle
        assert!((pim.get_avg_bw_util() - 0.125).abs() < 1e-12);
    }
}
