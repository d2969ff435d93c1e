//! N managers onto one subordinate.
//!
//! # Architecture
//!
//! ```text
//!   mgr[0..N].ar ──► [AR regs] ──► rr arb ──► sub.ar      readQ ← winner
//!   mgr[m].r     ◄───────────────────────────── sub.r      m = readQ.head
//!
//!   mgr[0..N].aw ──► [AW regs] ──► rr arb ──► sub.aw      writeQ ← winner
//!   mgr[m].w     ───── until W.last ─────────► sub.w      m = winner
//!   mgr[m].b     ◄───────────────────────────── sub.b      m = writeQ.head
//! ```
//!
//! Each manager may park one AR and one AW. Winners are recorded in
//! in-flight queues and responses are routed back by queue order, so the
//! subordinate must answer in request order. Once an AW wins, that
//! manager's W stream owns the subordinate's W channel until `last`; no
//! other AW is granted meanwhile.

use super::channel::AxiPort;
use super::config::AxiConfig;
use super::payload::AddrPayload;
use crate::arb::Arbiter;
use crate::mem::Fifo;
use crate::sim::{ChannelArena, Process};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxiArbiterStats {
    /// AR grants per manager.
    pub read_grants: Vec<u64>,
    /// AW grants per manager.
    pub write_grants: Vec<u64>,
    pub read_beats: u64,
    pub write_beats: u64,
}

#[derive(Debug)]
pub struct AxiArbiter {
    name: String,
    cfg: AxiConfig,
    managers: Vec<AxiPort>,
    sub: AxiPort,

    ar_regs: Vec<Option<AddrPayload>>,
    ar_arb: Arbiter,
    read_q: Fifo<usize>,
    read_active: Option<usize>,

    aw_regs: Vec<Option<AddrPayload>>,
    aw_arb: Arbiter,
    write_q: Fifo<usize>,
    /// Manager whose W stream is being forwarded.
    w_active: Option<usize>,
    b_active: Option<usize>,

    stats: AxiArbiterStats,
}

impl AxiArbiter {
    /// `managers` are the subordinate-facing ports the managers drive;
    /// `sub` is the manager port toward the subordinate.
    pub fn new(
        name: impl Into<String>,
        cfg: AxiConfig,
        managers: Vec<AxiPort>,
        sub: AxiPort,
        max_outstanding: usize,
    ) -> Self {
        let n = managers.len();
        assert!(n > 0 && n <= 64, "AXI arbiter needs 1..=64 managers, got {}", n);
        assert!(max_outstanding > 0, "AXI arbiter needs room for one outstanding request");
        Self {
            name: name.into(),
            cfg,
            managers,
            sub,
            ar_regs: vec![None; n],
            ar_arb: Arbiter::round_robin(n),
            read_q: Fifo::new(max_outstanding),
            read_active: None,
            aw_regs: vec![None; n],
            aw_arb: Arbiter::round_robin(n),
            write_q: Fifo::new(max_outstanding),
            w_active: None,
            b_active: None,
            stats: AxiArbiterStats {
                read_grants: vec![0; n],
                write_grants: vec![0; n],
                ..AxiArbiterStats::default()
            },
        }
    }

    pub fn num_managers(&self) -> usize {
        self.managers.len()
    }

    pub fn stats(&self) -> &AxiArbiterStats {
        &self.stats
    }

    fn valid_mask(regs: &[Option<AddrPayload>]) -> u64 {
        regs.iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .fold(0, |m, (i, _)| m | (1 << i))
    }

    fn run_ar(&mut self, chans: &mut ChannelArena) {
        for (m, port) in self.managers.iter().enumerate() {
            if self.ar_regs[m].is_none() {
                self.ar_regs[m] = chans.try_pop(port.rd.ar);
            }
        }
        if self.read_q.is_full() || chans.is_blocked(self.sub.rd.ar) {
            return;
        }
        if let Some(m) = self.ar_arb.pick_index(Self::valid_mask(&self.ar_regs)) {
            if let Some(ar) = self.ar_regs[m].take() {
                log::debug!("{}: AR from manager {} id {} addr {:#x}", self.name, m, ar.id, ar.addr);
                // Parked on back-pressure; delivered at a later edge.
                chans.send(self.sub.rd.ar, ar);
                self.read_q.push(m);
                self.stats.read_grants[m] += 1;
            }
        }
    }

    fn run_r(&mut self, chans: &mut ChannelArena) {
        if self.read_active.is_none() && !self.read_q.is_empty() {
            self.read_active = Some(self.read_q.pop());
        }
        let Some(m) = self.read_active else { return };
        let dst = self.managers[m].rd.r;
        if chans.is_blocked(dst) {
            return;
        }
        if let Some(beat) = chans.try_pop(self.sub.rd.r) {
            let last = beat.last;
            chans.send(dst, beat);
            self.stats.read_beats += 1;
            if last {
                self.read_active = None;
            }
        }
    }

    fn run_aw(&mut self, chans: &mut ChannelArena) {
        for (m, port) in self.managers.iter().enumerate() {
            if self.aw_regs[m].is_none() {
                self.aw_regs[m] = chans.try_pop(port.wr.aw);
            }
        }
        if self.w_active.is_some() || self.write_q.is_full() || chans.is_blocked(self.sub.wr.aw) {
            return;
        }
        if let Some(m) = self.aw_arb.pick_index(Self::valid_mask(&self.aw_regs)) {
            if let Some(aw) = self.aw_regs[m].take() {
                log::debug!("{}: AW from manager {} id {} addr {:#x}", self.name, m, aw.id, aw.addr);
                chans.send(self.sub.wr.aw, aw);
                self.write_q.push(m);
                self.w_active = Some(m);
                self.stats.write_grants[m] += 1;
            }
        }
    }

    fn run_w(&mut self, chans: &mut ChannelArena) {
        let Some(m) = self.w_active else { return };
        if chans.is_blocked(self.sub.wr.w) {
            return;
        }
        if let Some(beat) = chans.try_pop(self.managers[m].wr.w) {
            let last = beat.last;
            chans.send(self.sub.wr.w, beat);
            self.stats.write_beats += 1;
            if last {
                log::trace!("{}: W stream of manager {} done", self.name, m);
                self.w_active = None;
            }
        }
    }

    fn run_b(&mut self, chans: &mut ChannelArena) {
        if self.b_active.is_none() && !self.write_q.is_empty() {
            self.b_active = Some(self.write_q.pop());
        }
        let Some(m) = self.b_active else { return };
        if !self.cfg.use_write_responses {
            self.b_active = None;
            return;
        }
        let dst = self.managers[m].wr.b;
        if chans.is_blocked(dst) {
            return;
        }
        if let Some(b) = chans.try_pop(self.sub.wr.b) {
            chans.send(dst, b);
            self.b_active = None;
        }
    }
}

impl Process for AxiArbiter {
    fn tick(&mut self, chans: &mut ChannelArena) {
        self.run_ar(chans);
        self.run_r(chans);
        self.run_aw(chans);
        self.run_w(chans);
        self.run_b(chans);
    }

    fn reset(&mut self) {
        self.ar_regs.fill(None);
        self.aw_regs.fill(None);
        self.ar_arb.reset();
        self.aw_arb.reset();
        self.read_q.reset();
        self.write_q.reset();
        self.read_active = None;
        self.w_active = None;
        self.b_active = None;
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axi::payload::{ReadPayload, Resp, WRespPayload, WritePayload};
    use crate::sim::{ChannelPolicy, Simulator};

    fn setup(n: usize, cfg: AxiConfig) -> (Simulator, Vec<AxiPort>, AxiPort) {
        let mut sim = Simulator::new();
        let chans = sim.channels_mut();
        let mgrs = AxiPort::alloc_many(chans, "m", n, ChannelPolicy::Combinational);
        let sub = AxiPort::alloc(chans, "s", ChannelPolicy::Combinational);
        sim.add(AxiArbiter::new("arb", cfg, mgrs.clone(), sub, 4));
        (sim, mgrs, sub)
    }

    #[test]
    fn test_reads_routed_back_in_grant_order() {
        let (mut sim, mgrs, sub) = setup(2, AxiConfig::standard());
        sim.channels_mut().try_push(mgrs[0].rd.ar, AddrPayload::new(1, 0x10, 0)).unwrap();
        sim.channels_mut().try_push(mgrs[1].rd.ar, AddrPayload::new(1, 0x20, 1)).unwrap();
        let mut ars = Vec::new();
        for _ in 0..3 {
            sim.step();
            if let Some(ar) = sim.channels_mut().try_pop(sub.rd.ar) {
                ars.push(ar.addr);
            }
        }
        assert_eq!(ars, vec![0x10, 0x20]);

        let beats = [
            ReadPayload { data: 1, last: true, ..ReadPayload::default() },
            ReadPayload { data: 2, last: false, ..ReadPayload::default() },
            ReadPayload { data: 3, last: true, ..ReadPayload::default() },
        ];
        let mut got = vec![Vec::new(), Vec::new()];
        let mut idx = 0;
        for _ in 0..10 {
            if idx < beats.len() && sim.channels_mut().try_push(sub.rd.r, beats[idx]).is_ok() {
                idx += 1;
            }
            sim.step();
            for (m, port) in mgrs.iter().enumerate() {
                if let Some(r) = sim.channels_mut().try_pop(port.rd.r) {
                    got[m].push(r.data);
                }
            }
        }
        assert_eq!(got, vec![vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_write_streams_do_not_interleave() {
        let (mut sim, mgrs, sub) = setup(2, AxiConfig::standard());
        let mut m0: Vec<WritePayload> = (0..4).map(|i| WritePayload::new(i, i == 3)).collect();
        let mut m1: Vec<WritePayload> = (10..12).map(|i| WritePayload::new(i, i == 11)).collect();
        m0.reverse();
        m1.reverse();
        sim.channels_mut().try_push(mgrs[0].wr.aw, AddrPayload::new(0, 0x0, 3)).unwrap();
        sim.channels_mut().try_push(mgrs[1].wr.aw, AddrPayload::new(0, 0x100, 1)).unwrap();

        let mut seen = Vec::new();
        let mut aws = 0;
        let mut bs = [0, 0];
        for _ in 0..20 {
            if let Some(&w) = m0.last() {
                if sim.channels_mut().try_push(mgrs[0].wr.w, w).is_ok() {
                    m0.pop();
                }
            }
            if let Some(&w) = m1.last() {
                if sim.channels_mut().try_push(mgrs[1].wr.w, w).is_ok() {
                    m1.pop();
                }
            }
            sim.step();
            let chans = sim.channels_mut();
            if chans.try_pop(sub.wr.aw).is_some() {
                aws += 1;
            }
            if let Some(w) = chans.try_pop(sub.wr.w) {
                seen.push(w.data);
                if w.last {
                    chans.try_push(sub.wr.b, WRespPayload { id: 0, resp: Resp::Okay, buser: 0 }).unwrap();
                }
            }
            for (m, port) in mgrs.iter().enumerate() {
                if chans.try_pop(port.wr.b).is_some() {
                    bs[m] += 1;
                }
            }
        }
        assert_eq!(aws, 2);
        assert_eq!(seen, vec![0, 1, 2, 3, 10, 11]);
        assert_eq!(bs, [1, 1]);
    }

    #[test]
    fn test_round_robin_between_managers() {
        let (mut sim, mgrs, sub) = setup(2, AxiConfig::standard());
        let mut order = Vec::new();
        for _ in 0..8 {
            for (m, port) in mgrs.iter().enumerate() {
                let _ = sim.channels_mut().try_push(port.rd.ar, AddrPayload::new(0, m as u64, 0));
            }
            sim.step();
            if let Some(ar) = sim.channels_mut().try_pop(sub.rd.ar) {
                order.push(ar.addr);
            }
        }
        assert_eq!(&order[..4], &[0, 1, 0, 1]);
    }
}
