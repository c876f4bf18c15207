//! Request producer loop around a [`Dram`].
//!
//! Producers hand whole batches to [`RequestDriver::issue`]; the driver routes
//! each request to its channel backlog and feeds it to the memory system as
//! admission allows.

use crate::dram::{Dram, MemoryAccess, RequestId};
use crate::util::make_vec;
use indicatif::ProgressBar;
use log::debug;
use std::collections::VecDeque;

/// Applies backpressure between a request producer and a [`Dram`].
pub struct RequestDriver {
    backlog: Vec<VecDeque<MemoryAccess>>,
    completed: Vec<RequestId>,
}

impl RequestDriver {
    /// Creates a driver with one backlog per channel.
    pub fn new(n_channels: usize) -> Self {
        RequestDriver {
            backlog: make_vec(n_channels, |_| VecDeque::new()),
            completed: vec![],
        }
    }

    /// Queues requests, routing each by its address.
    ///
    /// # Panics
    ///
    /// Panics if a request routes to a channel this driver has no backlog for.
    pub fn issue<D: Dram + ?Sized>(
        &mut self,
        dram: &D,
        requests: impl IntoIterator<Item = MemoryAccess>,
    ) {
        for request in requests {
            let cid = dram.get_channel_id(&request);
            assert!(
                cid < self.backlog.len(),
                "request {} routes to channel {} but the driver has {} channels",
                request.id.0,
                cid,
                self.backlog.len()
            );
            self.backlog[cid].push_back(request);
        }
    }

    /// Requests not yet admitted by the memory system.
    pub fn pending(&self) -> usize {
        self.backlog.iter().map(VecDeque::len).sum()
    }

    /// Whether nothing is waiting in the backlog or in flight.
    pub fn is_idle<D: Dram + ?Sized>(&self, dram: &D) -> bool {
        self.pending() == 0 && !dram.running()
    }

    /// Admits what fits, advances one cycle and collects completions.
    ///
    /// Returns the number of requests completed in this step.
    pub fn step<D: Dram + ?Sized>(&mut self, dram: &mut D) -> usize {
        for (cid, queue) in self.backlog.iter_mut().enumerate() {
            while let Some(request) = queue.front() {
                if dram.is_full(cid, request) {
                    break;
                }
                dram.push(cid, request);
                queue.pop_front();
            }
        }
        dram.cycle();
        let before = self.completed.len();
        for cid in 0..dram.n_channels() {
            while !dram.is_empty(cid) {
                self.completed.push(dram.top(cid));
                dram.pop(cid);
            }
        }
        self.completed.len() - before
    }

    /// Steps until every issued request has completed.
    ///
    /// Returns the number of cycles taken.
    pub fn run_to_completion<D: Dram + ?Sized>(
        &mut self,
        dram: &mut D,
        progress: Option<&ProgressBar>,
    ) -> u64 {
        let mut cycles = 0;
        while !self.is_idle(dram) {
            let done = self.step(dram);
            if let Some(p) = progress {
                p.inc(done as u64);
            }
            cycles += 1;
        }
        debug!("drained after {} cycles", cycles);
        cycles
    }

    /// Takes the ids completed so far, in completion order.
    pub fn take_completed(&mut self) -> Vec<RequestId> {
        std::mem::take(&mut self.completed)
    }
}
