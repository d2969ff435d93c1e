//! Cycle-driven simulation engine.
//!
//! The simulator owns a [`ChannelArena`] and a list of [`Process`]es. One
//! call to [`Simulator::step`] is one clock cycle:
//!
//! 1. every process is ticked once, in registration order;
//! 2. every channel commits (the clock edge).
//!
//! Processes exchange data only through channels, so the registration order
//! decides whether a combinational channel delivers in the same cycle or the
//! next one. It never changes what is delivered.
//!
//! # Usage
//!
//! ```ignore
//! let mut sim = Simulator::new();
//! let ch = sim.channels_mut().channel::<u32>("link", ChannelPolicy::Buffered);
//! let producer = sim.add(Producer::new(ch));
//! sim.run(100);
//! let p: &Producer = sim.process(producer);
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use super::channel::ChannelArena;

/// A clocked component.
pub trait Process {
    /// Evaluate one cycle. All channel effects commit after every process ticks.
    fn tick(&mut self, chans: &mut ChannelArena);

    /// Return to the initial state.
    fn reset(&mut self);

    /// Instance name for logs.
    fn name(&self) -> &str;
}

trait ProcessObj: Process {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<P: Process + 'static> ProcessObj for P {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to a process registered with a [`Simulator`].
pub struct ProcId<P> {
    index: usize,
    _marker: PhantomData<fn() -> P>,
}

impl<P> Clone for ProcId<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ProcId<P> {}

impl<P> fmt::Debug for ProcId<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcId({})", self.index)
    }
}

/// How [`Simulator::reset`] takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetKind {
    /// Applied immediately.
    #[default]
    Async,
    /// Applied at the next clock edge; that cycle does no work.
    Sync,
}

/// Simulator status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimStatus {
    /// Nothing has run since construction or reset.
    Idle,
    /// Cycles are being executed.
    Running,
    /// Reset is asserted; processes are held.
    InReset,
    /// Cycle budget exhausted.
    Paused,
}

/// Cycle-driven simulator.
pub struct Simulator {
    chans: ChannelArena,
    procs: Vec<Box<dyn ProcessObj>>,
    /// Current status.
    pub status: SimStatus,
    /// Cycles executed since the last reset.
    pub total_cycles: u64,
    /// Stop after this many cycles (0 = unlimited).
    pub max_cycles: u64,
    reset_kind: ResetKind,
    reset_pending: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            chans: ChannelArena::new(),
            procs: Vec::new(),
            status: SimStatus::Idle,
            total_cycles: 0,
            max_cycles: 0,
            reset_kind: ResetKind::Async,
            reset_pending: false,
        }
    }

    pub fn with_reset_kind(mut self, kind: ResetKind) -> Self {
        self.reset_kind = kind;
        self
    }

    pub fn reset_kind(&self) -> ResetKind {
        self.reset_kind
    }

    pub fn channels(&self) -> &ChannelArena {
        &self.chans
    }

    pub fn channels_mut(&mut self) -> &mut ChannelArena {
        &mut self.chans
    }

    /// Register a process. It ticks after every process registered before it.
    pub fn add<P: Process + 'static>(&mut self, proc: P) -> ProcId<P> {
        let index = self.procs.len();
        log::debug!("process {} '{}' registered", index, proc.name());
        self.procs.push(Box::new(proc));
        ProcId {
            index,
            _marker: PhantomData,
        }
    }

    pub fn num_processes(&self) -> usize {
        self.procs.len()
    }

    pub fn process<P: Process + 'static>(&self, id: ProcId<P>) -> &P {
        self.procs[id.index]
            .as_any()
            .downcast_ref::<P>()
            .unwrap_or_else(|| panic!("process {} has a different type", id.index))
    }

    pub fn process_mut<P: Process + 'static>(&mut self, id: ProcId<P>) -> &mut P {
        self.procs[id.index]
            .as_any_mut()
            .downcast_mut::<P>()
            .unwrap_or_else(|| panic!("process {} has a different type", id.index))
    }

    fn apply_reset(&mut self) {
        for p in &mut self.procs {
            p.reset();
        }
        self.chans.reset_all();
        self.total_cycles = 0;
    }

    /// Reset every process and channel.
    ///
    /// With [`ResetKind::Async`] this happens now. With [`ResetKind::Sync`]
    /// it happens on the next [`step`](Self::step), which then does no other work.
    pub fn reset(&mut self) {
        match self.reset_kind {
            ResetKind::Async => {
                self.apply_reset();
                self.status = SimStatus::Idle;
            }
            ResetKind::Sync => self.reset_pending = true,
        }
    }

    /// Hold every process at its reset point until [`deassert_reset`](Self::deassert_reset).
    pub fn assert_reset(&mut self) {
        self.apply_reset();
        self.status = SimStatus::InReset;
    }

    /// Release reset; the next step is cycle 0.
    pub fn deassert_reset(&mut self) {
        if self.status == SimStatus::InReset {
            self.total_cycles = 0;
            self.status = SimStatus::Idle;
        }
    }

    pub fn in_reset(&self) -> bool {
        self.status == SimStatus::InReset
    }

    /// Execute one cycle.
    ///
    /// Returns false when nothing ran (reset held, sync reset applied or
    /// cycle budget exhausted).
    pub fn step(&mut self) -> bool {
        match self.status {
            SimStatus::Paused => return false,
            SimStatus::InReset => {
                // Held processes see a quiet fabric.
                self.chans.reset_all();
                return false;
            }
            _ => {}
        }

        if self.reset_pending {
            self.reset_pending = false;
            self.apply_reset();
            self.status = SimStatus::Idle;
            return false;
        }

        self.status = SimStatus::Running;
        for p in &mut self.procs {
            p.tick(&mut self.chans);
        }
        self.chans.commit_all();
        self.total_cycles += 1;
        log::trace!("cycle {} committed", self.total_cycles);

        if self.max_cycles > 0 && self.total_cycles >= self.max_cycles {
            self.status = SimStatus::Paused;
        }
        true
    }

    /// Run for up to `cycles` cycles. Returns the number executed.
    pub fn run(&mut self, cycles: u64) -> u64 {
        let mut done = 0;
        while done < cycles {
            if !self.step() {
                break;
            }
            done += 1;
        }
        done
    }

    /// Step until `done` returns true or `limit` cycles pass.
    ///
    /// Returns the cycle count at which `done` first held.
    pub fn run_until<F>(&mut self, limit: u64, mut done: F) -> Option<u64>
    where
        F: FnMut(&Simulator) -> bool,
    {
        for _ in 0..limit {
            if done(&*self) {
                return Some(self.total_cycles);
            }
            if !self.step() {
                break;
            }
        }
        if done(&*self) {
            Some(self.total_cycles)
        } else {
            None
        }
    }

    /// Continue after the cycle budget ran out.
    pub fn resume(&mut self) {
        if self.status == SimStatus::Paused {
            self.status = SimStatus::Running;
        }
    }

    pub fn status_string(&self) -> &'static str {
        match self.status {
            SimStatus::Idle => "Idle",
            SimStatus::Running => "Running",
            SimStatus::InReset => "Reset",
            SimStatus::Paused => "Paused",
        }
    }

    /// Print per-channel traffic.
    pub fn print_channel_stats(&self) {
        println!("Simulator: {} after {} cycles", self.status_string(), self.total_cycles);
        for (name, stats) in self.chans.all_stats() {
            println!(
                "  {:<28} pushes={:<6} pops={:<6} stalls={}",
                name, stats.pushes, stats.pops, stats.stall_cycles
            );
        }
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("status", &self.status)
            .field("total_cycles", &self.total_cycles)
            .field("processes", &self.procs.len())
            .field("channels", &self.chans.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ChanId, ChannelPolicy};

    struct Counter {
        out: ChanId<u32>,
        next: u32,
    }

    impl Process for Counter {
        fn tick(&mut self, chans: &mut ChannelArena) {
            if chans.try_push(self.out, self.next).is_ok() {
                self.next += 1;
            }
        }

        fn reset(&mut self) {
            self.next = 0;
        }

        fn name(&self) -> &str {
            "counter"
        }
    }

    struct Collector {
        inp: ChanId<u32>,
        seen: Vec<(u64, u32)>,
        cycle: u64,
    }

    impl Process for Collector {
        fn tick(&mut self, chans: &mut ChannelArena) {
            if let Some(v) = chans.try_pop(self.inp) {
                self.seen.push((self.cycle, v));
            }
            self.cycle += 1;
        }

        fn reset(&mut self) {
            self.seen.clear();
            self.cycle = 0;
        }

        fn name(&self) -> &str {
            "collector"
        }
    }

    fn build(policy: ChannelPolicy) -> (Simulator, ProcId<Collector>) {
        let mut sim = Simulator::new();
        let ch = sim.channels_mut().channel("link", policy);
        sim.add(Counter { out: ch, next: 0 });
        let c = sim.add(Collector {
            inp: ch,
            seen: Vec::new(),
            cycle: 0,
        });
        (sim, c)
    }

    #[test]
    fn test_combinational_latency() {
        let (mut sim, c) = build(ChannelPolicy::Combinational);
        assert_eq!(sim.run(3), 3);
        assert_eq!(sim.process(c).seen, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn test_buffered_latency() {
        let (mut sim, c) = build(ChannelPolicy::Buffered);
        sim.run(3);
        assert_eq!(sim.process(c).seen, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_max_cycles_pauses() {
        let (mut sim, _) = build(ChannelPolicy::Combinational);
        sim.max_cycles = 5;
        assert_eq!(sim.run(100), 5);
        assert_eq!(sim.status, SimStatus::Paused);
        assert!(!sim.step());
        sim.resume();
        sim.max_cycles = 0;
        assert!(sim.step());
    }

    #[test]
    fn test_async_reset() {
        let (mut sim, c) = build(ChannelPolicy::Buffered);
        sim.run(4);
        sim.reset();
        assert_eq!(sim.total_cycles, 0);
        assert_eq!(sim.status, SimStatus::Idle);
        assert!(sim.process(c).seen.is_empty());
        assert_eq!(sim.channels().total_occupancy(), 0);
    }

    #[test]
    fn test_sync_reset_applies_at_edge() {
        let (sim, c) = build(ChannelPolicy::Combinational);
        let mut sim = sim.with_reset_kind(ResetKind::Sync);
        sim.run(2);
        sim.reset();
        assert_eq!(sim.process(c).seen.len(), 2);
        assert!(!sim.step());
        assert!(sim.process(c).seen.is_empty());
        sim.run(1);
        assert_eq!(sim.process(c).seen, vec![(0, 0)]);
    }

    #[test]
    fn test_reset_held_then_released() {
        let (mut sim, c) = build(ChannelPolicy::Combinational);
        sim.assert_reset();
        assert_eq!(sim.run(10), 0);
        assert!(sim.in_reset());
        sim.deassert_reset();
        sim.run(2);
        assert_eq!(sim.total_cycles, 2);
        assert_eq!(sim.process(c).seen, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_run_until() {
        let (mut sim, c) = build(ChannelPolicy::Combinational);
        let at = sim.run_until(50, |s| s.process(c).seen.len() == 4);
        assert_eq!(at, Some(4));
        assert_eq!(sim.run_until(2, |_| false), None);
    }
}
