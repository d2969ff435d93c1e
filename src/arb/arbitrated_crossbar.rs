//! Crossbar with per-output arbitration and input/output queuing.
//!
//! # Architecture
//!
//! ```text
//!   data_in[i], dest_in[i] ──► [input queue i] ──┐
//!                                               ├─► arbiter[o] ──► [output queue o] ──► data_out[o]
//!   data_in[j], dest_in[j] ──► [input queue j] ──┘
//! ```
//!
//! Every input names one output. Each cycle the head of every input queue
//! requests its output; each output's round-robin arbiter grants one input,
//! and granted inputs dequeue. Losers stay at their queue head.
//!
//! Both queue stages are optional. With no input queue the incoming
//! requests are arbitrated directly and `ready[i]` reports whether input `i`
//! was consumed this cycle; the caller must hold a request that was not.
//! With no output queue the grants appear on the outputs in the same call.
//!
//! # Usage
//!
//! ```ignore
//! let mut xbar = ArbitratedCrossbar::<u32>::new(4, 4, 2, 0);
//! let out = xbar.run(&data, &dest, &valid);
//! for (i, r) in out.ready.iter().enumerate() { /* hold input i if !r */ }
//! ```

use super::arbiter::{one_hot_to_bin, Arbiter};
use crate::mem::fifo::BankedFifo;

/// Request parked in an input queue.
#[derive(Debug, Clone, Default)]
struct DataDest<T> {
    data: T,
    dest: usize,
}

/// Result of one [`ArbitratedCrossbar::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XbarOutput<T> {
    /// Per output: data (default when not valid).
    pub data: Vec<T>,
    /// Per output: a value is presented.
    pub valid: Vec<bool>,
    /// Per input: the request offered this cycle was accepted.
    pub ready: Vec<bool>,
    /// Per output: input granted this cycle, if any.
    pub source: Vec<Option<usize>>,
}

/// N-input, M-output arbitrated crossbar.
#[derive(Debug, Clone)]
pub struct ArbitratedCrossbar<T> {
    num_inputs: usize,
    num_outputs: usize,
    input_queues: BankedFifo<DataDest<T>>,
    output_queues: BankedFifo<T>,
    arbiters: Vec<Arbiter>,
    /// Cycles in which a queued input lost arbitration.
    conflicts: u64,
}

impl<T: Clone + Default> ArbitratedCrossbar<T> {
    /// `in_queue`/`out_queue` are per-lane queue depths; 0 disables the stage.
    pub fn new(num_inputs: usize, num_outputs: usize, in_queue: usize, out_queue: usize) -> Self {
        assert!(num_inputs > 0 && num_outputs > 0, "crossbar needs inputs and outputs");
        Self {
            num_inputs,
            num_outputs,
            input_queues: BankedFifo::new(in_queue, num_inputs),
            output_queues: BankedFifo::new(out_queue, num_outputs),
            arbiters: (0..num_outputs).map(|_| Arbiter::round_robin(num_inputs)).collect(),
            conflicts: 0,
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn has_input_queue(&self) -> bool {
        self.input_queues.depth() > 0
    }

    fn has_output_queue(&self) -> bool {
        self.output_queues.depth() > 0
    }

    pub fn reset(&mut self) {
        self.input_queues.reset();
        self.output_queues.reset();
        for a in &mut self.arbiters {
            a.reset();
        }
        self.conflicts = 0;
    }

    pub fn is_input_empty(&self, input: usize) -> bool {
        !self.has_input_queue() || self.input_queues.is_empty(input)
    }

    pub fn is_input_full(&self, input: usize) -> bool {
        self.has_input_queue() && self.input_queues.is_full(input)
    }

    pub fn is_output_empty(&self, output: usize) -> bool {
        !self.has_output_queue() || self.output_queues.is_empty(output)
    }

    pub fn is_output_full(&self, output: usize) -> bool {
        self.has_output_queue() && self.output_queues.is_full(output)
    }

    pub fn is_all_input_empty(&self) -> bool {
        (0..self.num_inputs).all(|i| self.is_input_empty(i))
    }

    pub fn is_all_output_empty(&self) -> bool {
        (0..self.num_outputs).all(|o| self.is_output_empty(o))
    }

    pub fn is_all_input_ready(&self) -> bool {
        (0..self.num_inputs).all(|i| !self.is_input_full(i))
    }

    /// Enqueue a request directly. Panics when the input queue is full.
    pub fn push(&mut self, data: T, input: usize, dest: usize) {
        assert!(dest < self.num_outputs, "crossbar destination {} out of range", dest);
        self.input_queues.push(input, DataDest { data, dest });
    }

    /// Head of an output queue.
    pub fn peek(&self, output: usize) -> &T {
        self.output_queues.peek(output)
    }

    /// Dequeue from an output queue.
    pub fn pop(&mut self, output: usize) -> T {
        self.output_queues.pop(output)
    }

    /// Dequeue every output whose `valid_out` is set.
    pub fn pop_all_lanes(&mut self, valid_out: &[bool]) {
        for (o, &v) in valid_out.iter().enumerate() {
            if v {
                self.output_queues.pop(o);
            }
        }
    }

    /// Cycles in which at least one requesting input lost arbitration.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    /// One arbitration cycle over the presented heads.
    fn xbar(
        &mut self,
        heads: &[Option<DataDest<T>>],
        output_ready: &[bool],
    ) -> (Vec<Option<T>>, Vec<bool>, Vec<Option<usize>>) {
        let mut requests = vec![0u64; self.num_outputs];
        for (i, head) in heads.iter().enumerate() {
            if let Some(h) = head {
                assert!(h.dest < self.num_outputs, "crossbar destination {} out of range", h.dest);
                requests[h.dest] |= 1 << i;
            }
        }

        let mut consumed = vec![false; self.num_inputs];
        let mut out = vec![None; self.num_outputs];
        let mut source = vec![None; self.num_outputs];

        for o in 0..self.num_outputs {
            if !output_ready[o] {
                continue;
            }
            let grant = self.arbiters[o].pick(requests[o]);
            if let Some(i) = one_hot_to_bin(grant) {
                consumed[i] = true;
                source[o] = Some(i);
                out[o] = heads[i].as_ref().map(|h| h.data.clone());
            }
        }

        let requesting = heads.iter().filter(|h| h.is_some()).count();
        if consumed.iter().filter(|&&c| c).count() < requesting {
            self.conflicts += 1;
        }

        (out, consumed, source)
    }

    /// Run one cycle.
    ///
    /// `data_in`, `dest_in` and `valid_in` have one entry per input.
    pub fn run(&mut self, data_in: &[T], dest_in: &[usize], valid_in: &[bool]) -> XbarOutput<T> {
        assert_eq!(data_in.len(), self.num_inputs, "crossbar: data_in width");
        assert_eq!(dest_in.len(), self.num_inputs, "crossbar: dest_in width");
        assert_eq!(valid_in.len(), self.num_inputs, "crossbar: valid_in width");

        let mut ready = vec![false; self.num_inputs];
        let mut heads: Vec<Option<DataDest<T>>> = vec![None; self.num_inputs];

        if self.has_input_queue() {
            for i in 0..self.num_inputs {
                let full = self.input_queues.is_full(i);
                ready[i] = !full || !valid_in[i];
                if !full && valid_in[i] {
                    self.push(data_in[i].clone(), i, dest_in[i]);
                }
                heads[i] = self.input_queues.front(i).cloned();
            }
        } else {
            for i in 0..self.num_inputs {
                if valid_in[i] {
                    heads[i] = Some(DataDest {
                        data: data_in[i].clone(),
                        dest: dest_in[i],
                    });
                }
            }
        }

        let output_ready: Vec<bool> = (0..self.num_outputs).map(|o| !self.is_output_full(o)).collect();
        let (granted, consumed, source) = self.xbar(&heads, &output_ready);

        if self.has_input_queue() {
            for (i, &c) in consumed.iter().enumerate() {
                if c {
                    self.input_queues.incr_head(i);
                }
            }
        } else {
            ready = consumed;
        }

        let mut data = vec![T::default(); self.num_outputs];
        let mut valid = vec![false; self.num_outputs];
        if self.has_output_queue() {
            for (o, g) in granted.into_iter().enumerate() {
                if let Some(v) = g {
                    self.output_queues.push(o, v);
                }
                if let Some(v) = self.output_queues.front(o) {
                    data[o] = v.clone();
                    valid[o] = true;
                }
            }
        } else {
            for (o, g) in granted.into_iter().enumerate() {
                if let Some(v) = g {
                    data[o] = v;
                    valid[o] = true;
                }
            }
        }

        log::trace!("xbar sources {:?} ready {:?}", source, ready);
        XbarOutput {
            data,
            valid,
            ready,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conflict_passes_through() {
        let mut x = ArbitratedCrossbar::<u32>::new(3, 3, 2, 0);
        let out = x.run(&[10, 20, 30], &[2, 0, 1], &[true, true, true]);
        assert_eq!(out.data, vec![20, 30, 10]);
        assert_eq!(out.valid, vec![true; 3]);
        assert_eq!(out.ready, vec![true; 3]);
        assert_eq!(out.source, vec![Some(1), Some(2), Some(0)]);
        assert!(x.is_all_input_empty());
    }

    #[test]
    fn test_conflict_serializes_through_queue() {
        let mut x = ArbitratedCrossbar::<u32>::new(2, 2, 2, 0);
        let first = x.run(&[1, 2], &[0, 0], &[true, true]);
        assert_eq!(first.source[0], Some(0));
        assert_eq!(first.data[0], 1);
        assert!(!x.is_input_empty(1));
        let second = x.run(&[0, 0], &[0, 0], &[false, false]);
        assert_eq!(second.source[0], Some(1));
        assert_eq!(second.data[0], 2);
        assert!(x.is_all_input_empty());
        assert_eq!(x.conflicts(), 1);
    }

    #[test]
    fn test_ready_drops_when_queue_full() {
        let mut x = ArbitratedCrossbar::<u8>::new(2, 1, 1, 0);
        // Input 1 loses and stays queued.
        let a = x.run(&[1, 2], &[0, 0], &[true, true]);
        assert_eq!(a.ready, vec![true, true]);
        // Input 1's queue is full: its new request is refused, input 0 is accepted.
        let b = x.run(&[3, 4], &[0, 0], &[true, true]);
        assert_eq!(b.ready, vec![true, false]);
        assert_eq!(b.source[0], Some(1));
        assert_eq!(b.data[0], 2);
        // An idle full input still reports ready.
        let c = x.run(&[0, 0], &[0, 0], &[false, false]);
        assert_eq!(c.ready, vec![true, true]);
        assert_eq!(c.data[0], 3);
    }

    #[test]
    fn test_without_input_queue_ready_means_consumed() {
        let mut x = ArbitratedCrossbar::<u8>::new(2, 1, 0, 0);
        let out = x.run(&[5, 6], &[0, 0], &[true, true]);
        assert_eq!(out.ready, vec![true, false]);
        let out = x.run(&[5, 6], &[0, 0], &[false, true]);
        assert_eq!(out.ready, vec![false, true]);
        assert_eq!(out.data[0], 6);
    }

    #[test]
    fn test_output_queue_holds_until_popped() {
        let mut x = ArbitratedCrossbar::<u8>::new(2, 1, 1, 1);
        let out = x.run(&[7, 8], &[0, 0], &[true, true]);
        assert_eq!(out.valid, vec![true]);
        assert_eq!(out.data[0], 7);
        // Output full: no arbitration, value stays presented.
        let out = x.run(&[0, 0], &[0, 0], &[false, false]);
        assert_eq!(out.source[0], None);
        assert_eq!(out.data[0], 7);
        x.pop_all_lanes(&out.valid);
        assert!(x.is_all_output_empty());
        let out = x.run(&[0, 0], &[0, 0], &[false, false]);
        assert_eq!(out.data[0], 8);
        assert_eq!(x.pop(0), 8);
    }
}
