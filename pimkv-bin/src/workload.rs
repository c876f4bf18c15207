//! Prefill and decode request generation for a multi-head KV cache.
//!
//! Every head owns one KEY and one VALUE [`PimTensor`] on channel
//! `head % n_channels`. Writing a token touches every `addr_align`-sized
//! line of both tensors that the token's elements land in.

use indicatif::ProgressBar;
use pimkv_core::allocator::RowAllocator;
use pimkv_core::dram::{Dram, MemoryAccess, Stage};
use pimkv_core::memory::AddressMapping;
use pimkv_core::util::PIM_COUNT_BITS;
use pimkv_core::{KvKind, PimTensor, RequestDriver, SimulationConfig};
use serde::Serialize;

/// Counters collected while driving the workload.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WorkloadSummary {
    /// Attention heads simulated
    pub heads: usize,
    /// Tokens written during prefill
    pub prompt_len: u32,
    /// Decode steps run
    pub decode_steps: u32,
    /// Sequence length at the end of the run
    pub final_seq_len: u32,
    /// Rows owned by all tensors at the end of the run
    pub total_rows: usize,
    /// Number of tensor growth events during decode
    pub growth_events: usize,
    /// Write requests issued
    pub writes: u64,
    /// Token elements written, over all heads and both tensors
    pub elements: u64,
    /// Token elements without an address, skipped by the writes
    pub unresolved_elements: u64,
    /// PIM command headers issued
    pub pim_commands: u64,
}

/// KEY/VALUE tensors of all heads plus the request id counter.
pub struct KvWorkload {
    heads: Vec<(PimTensor, PimTensor)>,
    mapping: AddressMapping,
    addr_align: u64,
    next_id: u64,
    summary: WorkloadSummary,
}

impl KvWorkload {
    /// Allocates the caches of `heads` heads for a prompt of `prompt_len` tokens.
    ///
    /// # Errors
    ///
    /// Propagates allocator failures.
    pub fn new<A: RowAllocator + ?Sized>(
        config: &SimulationConfig,
        heads: usize,
        prompt_len: u32,
        allocator: &mut A,
    ) -> Result<Self, A::Error> {
        let geometry = config.tensor_geometry();
        let mapping = config.mapping();
        let dims = [1, prompt_len, config.model_n_embd];
        let mut tensors = Vec::with_capacity(heads);
        for head in 0..heads {
            let channel = head % config.n_channels;
            let key = PimTensor::new(
                format!("head{head}.K"),
                channel,
                dims,
                KvKind::Key,
                geometry,
                mapping,
                allocator,
            )?;
            let value = PimTensor::new(
                format!("head{head}.V"),
                channel,
                dims,
                KvKind::Value,
                geometry,
                mapping,
                allocator,
            )?;
            tensors.push((key, value));
        }
        let summary = WorkloadSummary {
            heads,
            prompt_len,
            final_seq_len: prompt_len,
            ..Default::default()
        };
        info!(
            "placed {} heads, {} rows in total",
            heads,
            tensors
                .iter()
                .map(|(k, v)| k.num_rows() + v.num_rows())
                .sum::<usize>()
        );
        Ok(KvWorkload {
            heads: tensors,
            mapping,
            addr_align: config.addr_align,
            next_id: 0,
            summary,
        })
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Write requests storing token `seq_idx` of every head.
    fn token_writes(&mut self, seq_idx: u32) -> Vec<MemoryAccess> {
        let unresolved: usize = self
            .heads
            .iter()
            .map(|(k, v)| k.unresolved_in_token(seq_idx) + v.unresolved_in_token(seq_idx))
            .sum();
        let elements = self
            .heads
            .iter()
            .map(|(k, v)| k.geometry().embedding_width + v.geometry().embedding_width)
            .map(u64::from)
            .sum::<u64>();
        if unresolved > 0 && self.summary.unresolved_elements == 0 {
            warn!(
                "token {}: {} of {} elements have no address and are not written",
                seq_idx, unresolved, elements
            );
        }
        self.summary.elements += elements;
        self.summary.unresolved_elements += unresolved as u64;
        let addrs: Vec<u64> = self
            .heads
            .iter()
            .flat_map(|(k, v)| {
                let mut a = k.token_access_addrs(seq_idx, self.addr_align);
                a.extend(v.token_access_addrs(seq_idx, self.addr_align));
                a
            })
            .collect();
        self.summary.writes += addrs.len() as u64;
        addrs
            .into_iter()
            .map(|a| MemoryAccess::write(self.next_id(), a))
            .collect()
    }

    /// One PIM header per head, operating on the newest KEY row.
    fn attention_commands(&mut self) -> Vec<MemoryAccess> {
        let max = (1 << PIM_COUNT_BITS) - 1;
        let words: Vec<u64> = self
            .heads
            .iter()
            .filter_map(|(k, _)| {
                let row = self.mapping.decode(*k.rows().last()?).row;
                Some(
                    self.mapping
                        .encode_pim_header(k.channel(), row, false, k.seq_len().min(max), 1),
                )
            })
            .collect();
        self.summary.pim_commands += words.len() as u64;
        words
            .into_iter()
            .map(|w| MemoryAccess::pim_header(self.next_id(), w))
            .collect()
    }

    /// Writes the whole prompt and drains it, then closes the prefill stage.
    pub fn prefill<D: Dram + ?Sized>(
        &mut self,
        dram: &mut D,
        driver: &mut RequestDriver,
        progress: Option<&ProgressBar>,
    ) -> u64 {
        for seq_idx in 0..self.summary.prompt_len {
            let writes = self.token_writes(seq_idx);
            driver.issue(&*dram, writes);
        }
        if let Some(p) = progress {
            p.set_length(driver.pending() as u64);
        }
        let cycles = driver.run_to_completion(dram, progress);
        dram.log(Stage::Prefill);
        dram.reset_pim_cycle();
        cycles
    }

    /// Appends one token to every tensor, writes it and runs the attention commands.
    ///
    /// # Errors
    ///
    /// Propagates allocator failures.
    pub fn decode_step<D: Dram + ?Sized, A: RowAllocator + ?Sized>(
        &mut self,
        dram: &mut D,
        driver: &mut RequestDriver,
        allocator: &mut A,
    ) -> Result<u64, A::Error> {
        for (k, v) in self.heads.iter_mut() {
            for t in [k, v] {
                if t.add_token(allocator)? {
                    self.summary.growth_events += 1;
                }
            }
        }
        self.summary.decode_steps += 1;
        self.summary.final_seq_len += 1;
        let writes = self.token_writes(self.summary.final_seq_len - 1);
        driver.issue(&*dram, writes);
        let commands = self.attention_commands();
        driver.issue(&*dram, commands);
        let cycles = driver.run_to_completion(dram, None);
        dram.log(Stage::Decode);
        Ok(cycles)
    }

    /// Counters so far.
    pub fn summary(&self) -> WorkloadSummary {
        WorkloadSummary {
            total_rows: self
                .heads
                .iter()
                .map(|(k, v)| k.num_rows() + v.num_rows())
                .sum(),
            ..self.summary.clone()
        }
    }
}
