//! Wormhole virtual-channel router with source routing and credit flow
//! control.
//!
//! # Ports
//!
//! ```text
//!                 ┌───────────────────────────────┐
//!   in_flit[0..L] │ local    ififo[port][vc]       │ out_flit[0..L]   local
//!   in_flit[L..P] │ remote   ──► route ──► arb[k] ─┼► out_flit[L..P]  remote
//!                 │                                │
//!   out_credit ◄──┤ credit_send[port][vc]          │◄── in_credit
//!                 └───────────────────────────────┘
//! ```
//!
//! Port `k < L` is local port `k`; port `L + r` is remote port `r`.
//!
//! # Cycle
//!
//! 1. Absorb returned credits into `credit_recv`.
//! 2. Move at most one arriving flit per input port into its VC buffer.
//! 3. Per input port pick the lowest non-empty VC.
//! 4. Route HEAD flits: consume this hop's field and shift the rest down.
//! 5. Per output port grant one eligible input round-robin.
//! 6. Dequeue granted flits and owe a credit upstream for each.
//! 7. Return owed credits, one per (port, VC) per cycle.
//! 8. Drive granted (or previously stalled) flits out.
//!
//! An output VC that has started a packet accepts no other HEAD until the
//! packet's TAIL has left. A flit is only granted when downstream has a
//! credit for its VC. A refused output push stalls the port; the flit is
//! retried next cycle and the port takes no new grants meanwhile.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::flit::Flit;
use crate::arb::Arbiter;
use crate::bits::{index_width, log2_ceil, mask};
use crate::mem::BankedFifo;
use crate::sim::{ChanId, ChannelArena, ChannelPolicy, Process};

/// Credit returned upstream; each carries one buffer slot.
pub type Credit = u8;

/// Router geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterParams {
    /// Local ports.
    pub num_lports: usize,
    /// Remote ports.
    pub num_rports: usize,
    /// Virtual channels per port.
    pub num_vchannels: usize,
    /// Flit buffer depth per (input port, VC); also the initial credit count.
    pub buffer_size: usize,
    /// Maximum hops a route can describe.
    pub max_hops: usize,
    /// Deliver to one local and one remote port from a single input flit.
    pub multicast: bool,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            num_lports: 1,
            num_rports: 4,
            num_vchannels: 2,
            buffer_size: 8,
            max_hops: 4,
            multicast: false,
        }
    }
}

/// Invalid router geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("router needs at least one port")]
    NoPorts,

    #[error("{0} ports exceed the 64-port limit")]
    TooManyPorts(usize),

    #[error("router needs at least one virtual channel")]
    NoVirtualChannels,

    #[error("{0} virtual channels; the count must be a power of two")]
    VcCountNotPowerOfTwo(usize),

    #[error("buffer size must be non-zero")]
    ZeroBuffer,

    #[error("route of {hops} hops x {per_hop} bits exceeds 64 bits")]
    RouteTooWide { hops: usize, per_hop: u32 },
}

impl RouterParams {
    pub fn validate(&self) -> Result<(), RouterError> {
        let ports = self.num_ports();
        if ports == 0 {
            return Err(RouterError::NoPorts);
        }
        if ports > 64 {
            return Err(RouterError::TooManyPorts(ports));
        }
        if self.num_vchannels == 0 {
            return Err(RouterError::NoVirtualChannels);
        }
        if !self.num_vchannels.is_power_of_two() {
            return Err(RouterError::VcCountNotPowerOfTwo(self.num_vchannels));
        }
        if self.buffer_size == 0 {
            return Err(RouterError::ZeroBuffer);
        }
        if self.dest_width() > 64 {
            return Err(RouterError::RouteTooWide {
                hops: self.max_hops,
                per_hop: self.dest_width_per_hop(),
            });
        }
        Ok(())
    }

    pub fn num_ports(&self) -> usize {
        self.num_lports + self.num_rports
    }

    /// Bits per hop field: remote code above the local bitmap.
    pub fn dest_width_per_hop(&self) -> u32 {
        index_width(self.num_rports) + self.num_lports as u32
    }

    /// Bits of HEAD data holding the route.
    pub fn dest_width(&self) -> u32 {
        self.max_hops as u32 * self.dest_width_per_hop()
    }

    /// VC a packet travels on, from the low bits of its id. Only meaningful
    /// for validated params.
    pub fn vc_of(&self, packet_id: u32) -> usize {
        let vc = (packet_id as u128 & mask(log2_ceil(self.num_vchannels))) as usize;
        debug_assert!(vc < self.num_vchannels);
        vc
    }

    /// Port index of remote port `r`.
    pub fn rport(&self, r: usize) -> usize {
        self.num_lports + r
    }
}

/// Channel handles of one router.
#[derive(Debug, Clone)]
pub struct RouterPorts {
    /// Flits arriving, per port.
    pub in_flit: Vec<ChanId<Flit>>,
    /// Flits leaving, per port.
    pub out_flit: Vec<ChanId<Flit>>,
    /// Credits from downstream, per (output port, VC).
    pub in_credit: Vec<ChanId<Credit>>,
    /// Credits to upstream, per (input port, VC).
    pub out_credit: Vec<ChanId<Credit>>,
}

impl RouterPorts {
    /// Allocate every channel the router uses.
    pub fn alloc(arena: &mut ChannelArena, name: &str, params: &RouterParams, policy: ChannelPolicy) -> Self {
        let p = params.num_ports();
        let pv = p * params.num_vchannels;
        Self {
            in_flit: arena.channels(&format!("{}.in_flit", name), p, policy),
            out_flit: arena.channels(&format!("{}.out_flit", name), p, policy),
            in_credit: arena.channels(&format!("{}.in_credit", name), pv, policy),
            out_credit: arena.channels(&format!("{}.out_credit", name), pv, policy),
        }
    }
}

/// Router counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Flits taken from input channels.
    pub flits_in: u64,
    /// Flits delivered per output port.
    pub flits_out: Vec<u64>,
    /// Cycles each output port spent stalled on a refused push.
    pub stall_cycles: Vec<u64>,
    /// Credits returned upstream.
    pub credits_returned: u64,
    /// Multicast flits delivered to both a local and a remote port.
    pub multicasts: u64,
}

/// Wormhole virtual-channel router.
#[derive(Debug)]
pub struct WhvcRouter {
    name: String,
    params: RouterParams,
    ports: RouterPorts,
    /// Bank `port * V + vc`.
    ififo: BankedFifo<Flit>,
    /// Credits available at the downstream of each (output port, VC).
    credit_recv: Vec<usize>,
    /// Credits owed upstream for each (input port, VC).
    credit_send: Vec<usize>,
    /// Output bitmap of the packet at the head of each (input port, VC).
    out_dest: Vec<u64>,
    /// Output (port, VC) is between packets.
    accepting_header: Vec<bool>,
    /// Input (port, VC) has forwarded a HEAD and not yet its TAIL.
    in_packet: Vec<bool>,
    out_stall: Vec<bool>,
    flit_out: Vec<Flit>,
    vc_out: Vec<usize>,
    arbiters: Vec<Arbiter>,
    stats: RouterStats,
}

impl WhvcRouter {
    pub fn new(name: impl Into<String>, params: RouterParams, ports: RouterPorts) -> Result<Self, RouterError> {
        params.validate()?;
        let p = params.num_ports();
        let pv = p * params.num_vchannels;
        assert_eq!(ports.in_flit.len(), p, "router: in_flit port count");
        assert_eq!(ports.out_flit.len(), p, "router: out_flit port count");
        assert_eq!(ports.in_credit.len(), pv, "router: in_credit count");
        assert_eq!(ports.out_credit.len(), pv, "router: out_credit count");
        let mut router = Self {
            name: name.into(),
            params,
            ports,
            ififo: BankedFifo::new(params.buffer_size, pv),
            credit_recv: vec![0; pv],
            credit_send: vec![0; pv],
            out_dest: vec![0; pv],
            accepting_header: vec![true; pv],
            in_packet: vec![false; pv],
            out_stall: vec![false; p],
            flit_out: vec![Flit::default(); p],
            vc_out: vec![0; p],
            arbiters: (0..p).map(|_| Arbiter::round_robin(p)).collect(),
            stats: RouterStats::default(),
        };
        router.reset_state();
        Ok(router)
    }

    pub fn params(&self) -> &RouterParams {
        &self.params
    }

    pub fn ports(&self) -> &RouterPorts {
        &self.ports
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    fn idx(&self, port: usize, vc: usize) -> usize {
        port * self.params.num_vchannels + vc
    }

    /// Downstream credits held for (output port, VC).
    pub fn credit_recv(&self, port: usize, vc: usize) -> usize {
        self.credit_recv[self.idx(port, vc)]
    }

    /// Credits still owed upstream for (input port, VC).
    pub fn credit_send(&self, port: usize, vc: usize) -> usize {
        self.credit_send[self.idx(port, vc)]
    }

    /// Flits buffered at (input port, VC).
    pub fn buffered(&self, port: usize, vc: usize) -> usize {
        self.ififo.num_filled(self.idx(port, vc))
    }

    /// Output bitmap computed for the head packet of (input port, VC).
    pub fn out_dest(&self, port: usize, vc: usize) -> u64 {
        self.out_dest[self.idx(port, vc)]
    }

    pub fn is_stalled(&self, port: usize) -> bool {
        self.out_stall[port]
    }

    /// True when no flit is buffered or stalled and no credit is owed.
    pub fn is_idle(&self) -> bool {
        let pv = self.params.num_ports() * self.params.num_vchannels;
        (0..pv).all(|b| self.ififo.is_empty(b))
            && self.out_stall.iter().all(|s| !s)
            && self.credit_send.iter().all(|&c| c == 0)
    }

    fn reset_state(&mut self) {
        let p = self.params.num_ports();
        self.ififo.reset();
        self.credit_recv.fill(self.params.buffer_size);
        self.credit_send.fill(0);
        self.out_dest.fill(0);
        self.accepting_header.fill(true);
        self.in_packet.fill(false);
        self.out_stall.fill(false);
        self.flit_out = vec![Flit::default(); p];
        self.vc_out.fill(0);
        for a in &mut self.arbiters {
            a.reset();
        }
        self.stats = RouterStats {
            flits_out: vec![0; p],
            stall_cycles: vec![0; p],
            ..RouterStats::default()
        };
    }

    fn receive_credit(&mut self, chans: &mut ChannelArena) {
        for b in 0..self.credit_recv.len() {
            if let Some(c) = chans.try_pop(self.ports.in_credit[b]) {
                self.credit_recv[b] += c as usize;
                assert!(
                    self.credit_recv[b] <= self.params.buffer_size,
                    "{}: credit overflow on output {} ({} > {})",
                    self.name,
                    b,
                    self.credit_recv[b],
                    self.params.buffer_size
                );
            }
        }
    }

    fn fill_ififo(&mut self, chans: &mut ChannelArena) {
        for port in 0..self.params.num_ports() {
            if let Some(flit) = chans.try_pop(self.ports.in_flit[port]) {
                let b = self.idx(port, self.params.vc_of(flit.packet_id));
                assert!(
                    !self.ififo.is_full(b),
                    "{}: input buffer overflow at port {} (sender ignored credits)",
                    self.name,
                    port
                );
                self.ififo.push(b, flit);
                self.stats.flits_in += 1;
            }
        }
    }

    /// Lowest non-empty VC of each input port.
    fn inputvc_arbiter(&self) -> Vec<Option<usize>> {
        (0..self.params.num_ports())
            .map(|port| (0..self.params.num_vchannels).find(|&vc| !self.ififo.is_empty(self.idx(port, vc))))
            .collect()
    }

    /// Route a HEAD flit at (port, vc): record its outputs and strip this hop.
    fn compute_route(&mut self, port: usize, vc: usize, flit: &mut Flit) {
        let b = self.idx(port, vc);
        if !flit.flit_id.is_header() {
            assert!(
                self.in_packet[b],
                "{}: {:?} flit on port {} VC {} without HEAD",
                self.name,
                flit.flit_id,
                port,
                vc
            );
            return;
        }
        let l = self.params.num_lports as u32;
        let dwph = self.params.dest_width_per_hop();
        let dest_mask = mask(self.params.dest_width()) as u64;

        let route = flit.data & dest_mask;
        let local_dest = route & mask(dwph) as u64;
        let next = if dwph >= 64 { 0 } else { route >> dwph };
        flit.data = (flit.data & !dest_mask) | next;

        let ldest = local_dest & mask(l) as u64;
        let rdest = (local_dest >> l) as usize;
        let rdest_1hot = if next != 0 {
            assert!(rdest < self.params.num_rports, "{}: remote port {} out of range", self.name, rdest);
            1u64 << rdest
        } else {
            0
        };
        self.out_dest[b] = (rdest_1hot << l) | ldest;
        log::trace!("{}: port {} VC {} routes to {:#b}", self.name, port, vc, self.out_dest[b]);
    }

    /// Per-output grants.
    fn arbitration(&mut self, vcin: &[Option<usize>], flit_in: &[Flit]) -> Vec<Option<usize>> {
        let p = self.params.num_ports();
        let v = self.params.num_vchannels;
        let mut valid = vec![0u64; p];
        for (k, valid_k) in valid.iter_mut().enumerate() {
            if self.out_stall[k] {
                continue;
            }
            for (i, vc) in vcin.iter().enumerate() {
                let Some(vc) = *vc else { continue };
                let ok = self.credit_recv[k * v + vc] != 0
                    && (self.out_dest[i * v + vc] >> k) & 1 == 1
                    && (self.accepting_header[k * v + vc] || !flit_in[i].flit_id.is_header());
                if ok {
                    *valid_k |= 1 << i;
                }
            }
        }

        // Multicast pairs must be able to go out on both ports at once.
        let l = self.params.num_lports;
        let mut pair: Vec<Option<(usize, usize)>> = vec![None; p];
        if self.params.multicast {
            for (i, vc) in vcin.iter().enumerate() {
                let Some(vc) = *vc else { continue };
                let dest = self.out_dest[i * v + vc];
                for lp in (0..l).filter(|&lp| (dest >> lp) & 1 == 1) {
                    for rp in (l..p).filter(|&rp| (dest >> rp) & 1 == 1) {
                        pair[i] = Some((lp, rp));
                        let both = (valid[lp] >> i) & 1 == 1 && (valid[rp] >> i) & 1 == 1;
                        if !both {
                            valid[lp] &= !(1 << i);
                            valid[rp] &= !(1 << i);
                        }
                    }
                }
            }
        }

        let mut select: Vec<Option<usize>> = (0..p).map(|k| self.arbiters[k].pick_index(valid[k])).collect();

        if self.params.multicast {
            // A local grant drags its remote partner along.
            for lp in 0..l {
                if let Some(i) = select[lp] {
                    if let Some((pl, pr)) = pair[i] {
                        if pl == lp && (valid[pr] >> i) & 1 == 1 {
                            select[pr] = Some(i);
                        }
                    }
                }
            }
            // Two local grants can drag the same remote port; the later one
            // keeps it. Any pair left holding only one side is withdrawn.
            for (i, pr) in pair.iter().enumerate() {
                let Some((pl, pr)) = *pr else { continue };
                let has_local = select[pl] == Some(i);
                let has_remote = select[pr] == Some(i);
                if has_local && !has_remote {
                    select[pl] = None;
                } else if has_remote && !has_local {
                    select[pr] = None;
                }
            }
            for (i, pr) in pair.iter().enumerate() {
                if let Some((pl, pr)) = pr {
                    if select[*pl] == Some(i) && select[*pr] == Some(i) {
                        self.stats.multicasts += 1;
                    }
                }
            }
        }
        select
    }

    fn send_credit(&mut self, chans: &mut ChannelArena) {
        for b in 0..self.credit_send.len() {
            if self.credit_send[b] > 0 && chans.try_push(self.ports.out_credit[b], 1).is_ok() {
                self.credit_send[b] -= 1;
                self.stats.credits_returned += 1;
            }
        }
    }

    fn flit_output(&mut self, chans: &mut ChannelArena, is_push: &[bool]) {
        let v = self.params.num_vchannels;
        for k in 0..self.params.num_ports() {
            if !is_push[k] && !self.out_stall[k] {
                continue;
            }
            let flit = self.flit_out[k];
            let b = k * v + self.vc_out[k];
            self.accepting_header[b] = flit.flit_id.is_tail();
            match chans.try_push(self.ports.out_flit[k], flit) {
                Ok(()) => {
                    self.out_stall[k] = false;
                    self.credit_recv[b] -= 1;
                    self.stats.flits_out[k] += 1;
                }
                Err(_) => {
                    if !self.out_stall[k] {
                        log::debug!("{}: output {} stalled", self.name, k);
                    }
                    self.out_stall[k] = true;
                    self.stats.stall_cycles[k] += 1;
                }
            }
        }
    }
}

impl Process for WhvcRouter {
    fn tick(&mut self, chans: &mut ChannelArena) {
        let p = self.params.num_ports();
        self.receive_credit(chans);
        self.fill_ififo(chans);

        let vcin = self.inputvc_arbiter();
        let mut flit_in = vec![Flit::default(); p];
        for (i, vc) in vcin.iter().enumerate() {
            if let Some(vc) = *vc {
                let mut flit = *self.ififo.peek(self.idx(i, vc));
                self.compute_route(i, vc, &mut flit);
                flit_in[i] = flit;
            }
        }

        let select = self.arbitration(&vcin, &flit_in);

        for i in 0..p {
            if !select.contains(&Some(i)) {
                continue;
            }
            let Some(vc) = vcin[i] else { continue };
            let b = self.idx(i, vc);
            self.ififo.incr_head(b);
            let id = flit_in[i].flit_id;
            if id.is_tail() {
                self.in_packet[b] = false;
            } else if id.is_header() {
                self.in_packet[b] = true;
            }
            self.credit_send[b] += 1;
            assert!(
                self.credit_send[b] <= self.params.buffer_size,
                "{}: owes more credits than buffer slots on input {}",
                self.name,
                b
            );
        }

        self.send_credit(chans);

        let mut is_push = vec![false; p];
        for (k, sel) in select.iter().enumerate() {
            if let Some(i) = *sel {
                self.flit_out[k] = flit_in[i];
                self.vc_out[k] = vcin[i].unwrap_or(0);
                is_push[k] = true;
            }
        }

        self.flit_output(chans, &is_push);
    }

    fn reset(&mut self) {
        self.reset_state();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noc::flit::{FlitId, Hop, SourceRoute};
    use std::collections::VecDeque;

    struct Rig {
        arena: ChannelArena,
        router: WhvcRouter,
        credits_back: Vec<usize>,
    }

    impl Rig {
        fn new(params: RouterParams) -> Self {
            let mut arena = ChannelArena::new();
            let ports = RouterPorts::alloc(&mut arena, "r", &params, ChannelPolicy::Combinational);
            let router = WhvcRouter::new("r", params, ports).unwrap();
            let pv = params.num_ports() * params.num_vchannels;
            Self {
                arena,
                router,
                credits_back: vec![0; pv],
            }
        }

        /// Offer `inputs`, tick once, collect outputs from ports in `drain`.
        fn cycle(&mut self, inputs: &[(usize, Flit)], drain: &[usize]) -> Vec<(usize, Flit)> {
            for &(port, flit) in inputs {
                let id = self.router.ports().in_flit[port];
                self.arena.try_push(id, flit).unwrap();
            }
            self.router.tick(&mut self.arena);
            let mut out = Vec::new();
            for &k in drain {
                let id = self.router.ports().out_flit[k];
                if let Some(f) = self.arena.try_pop(id) {
                    out.push((k, f));
                }
            }
            for b in 0..self.credits_back.len() {
                let id = self.router.ports().out_credit[b];
                if self.arena.try_pop(id).is_some() {
                    self.credits_back[b] += 1;
                }
            }
            self.arena.commit_all();
            out
        }

        fn give_credit(&mut self, port: usize, vc: usize) {
            let id = self.router.ports().in_credit[port * self.router.params().num_vchannels + vc];
            self.arena.try_push(id, 1).unwrap();
        }
    }

    fn all_ports(params: &RouterParams) -> Vec<usize> {
        (0..params.num_ports()).collect()
    }

    #[test]
    fn test_params_validation() {
        assert!(RouterParams::default().validate().is_ok());
        let p = RouterParams {
            num_lports: 0,
            num_rports: 0,
            ..RouterParams::default()
        };
        assert_eq!(p.validate(), Err(RouterError::NoPorts));
        let p = RouterParams {
            num_vchannels: 0,
            ..RouterParams::default()
        };
        assert_eq!(p.validate(), Err(RouterError::NoVirtualChannels));
        let p = RouterParams {
            num_vchannels: 3,
            ..RouterParams::default()
        };
        assert_eq!(p.validate(), Err(RouterError::VcCountNotPowerOfTwo(3)));
        let p = RouterParams {
            max_hops: 30,
            ..RouterParams::default()
        };
        assert!(matches!(p.validate(), Err(RouterError::RouteTooWide { .. })));
    }

    #[test]
    fn test_packet_to_remote_port_consumes_credits() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 4,
            num_vchannels: 2,
            buffer_size: 8,
            max_hops: 4,
            multicast: false,
        };
        let mut rig = Rig::new(params);
        let drain = all_ports(&params);
        let packet = [Flit::head(0xC), Flit::body(0x55), Flit::tail(0x66)];
        let mut out = Vec::new();
        for f in packet {
            out.extend(rig.cycle(&[(0, f)], &drain));
        }
        out.extend(rig.cycle(&[], &drain));

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|(k, _)| *k == 3));
        assert_eq!(rig.router.out_dest(0, 0), 0b1000);
        // Route field consumed; remaining hop shifted down.
        assert_eq!(out[0].1, Flit::head(1));
        assert_eq!(out[1].1.data, 0x55);
        assert_eq!(out[2].1.flit_id, FlitId::Tail);
        assert_eq!(rig.router.credit_recv(3, 0), 5);
        assert_eq!(rig.router.credit_recv(3, 1), 8);
        assert_eq!(rig.credits_back[0], 3);
        assert!(rig.router.is_idle());
    }

    #[test]
    fn test_vc_follows_packet_id() {
        let params = RouterParams::default();
        let mut rig = Rig::new(params);
        let drain = all_ports(&params);
        let out = rig.cycle(&[(0, Flit::single(0xC).with_packet_id(1))], &drain);
        assert_eq!(out.len(), 1);
        assert_eq!(rig.router.credit_recv(3, 1), 7);
        assert_eq!(rig.router.credit_recv(3, 0), 8);
    }

    #[test]
    fn test_local_delivery_on_last_hop() {
        let params = RouterParams {
            num_lports: 2,
            num_rports: 2,
            num_vchannels: 1,
            ..RouterParams::default()
        };
        let sr = SourceRoute::new(2, 2);
        let dest = sr.encode(&[Hop::local(0b10)]);
        let mut rig = Rig::new(params);
        let out = rig.cycle(&[(2, Flit::single(dest))], &all_ports(&params));
        assert_eq!(out, vec![(1, Flit::single(0))]);
    }

    #[test]
    fn test_wormhole_keeps_packets_contiguous() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 2,
            num_vchannels: 1,
            ..RouterParams::default()
        };
        let mut rig = Rig::new(params);
        let drain = [0];
        let a = [Flit::head(1), Flit::body(0xA1), Flit::tail(0xA2)];
        let b = [Flit::head(1), Flit::tail(0xB1)];
        let mut out = Vec::new();
        out.extend(rig.cycle(&[(1, a[0]), (2, b[0])], &drain));
        out.extend(rig.cycle(&[(1, a[1]), (2, b[1])], &drain));
        out.extend(rig.cycle(&[(1, a[2])], &drain));
        for _ in 0..4 {
            out.extend(rig.cycle(&[], &drain));
        }
        let ids: Vec<FlitId> = out.iter().map(|(_, f)| f.flit_id).collect();
        assert_eq!(
            ids,
            vec![FlitId::Head, FlitId::Body, FlitId::Tail, FlitId::Head, FlitId::Tail]
        );
        assert_eq!(out[2].1.data, 0xA2);
        assert_eq!(out[4].1.data, 0xB1);
    }

    #[test]
    fn test_no_credit_no_grant() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 1,
            num_vchannels: 1,
            buffer_size: 2,
            ..RouterParams::default()
        };
        let mut rig = Rig::new(params);
        let drain = [0];
        let mut out = Vec::new();
        for d in 0..3 {
            out.extend(rig.cycle(&[(1, Flit::single(1 | (d << 8)))], &drain));
        }
        assert_eq!(out.len(), 2);
        assert_eq!(rig.router.credit_recv(0, 0), 0);
        assert_eq!(rig.router.buffered(1, 0), 1);

        rig.give_credit(0, 0);
        let out = rig.cycle(&[], &drain);
        assert_eq!(out.len(), 1);
        assert_eq!(rig.router.credit_recv(0, 0), 0);
    }

    #[test]
    fn test_refused_push_stalls_and_retries() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 1,
            num_vchannels: 1,
            ..RouterParams::default()
        };
        let mut rig = Rig::new(params);
        // Output 0 is never drained while the first two flits arrive.
        rig.cycle(&[(1, Flit::head(1))], &[]);
        rig.cycle(&[(1, Flit::tail(7))], &[]);
        assert!(rig.router.is_stalled(0));
        assert_eq!(rig.router.credit_recv(0, 0), params.buffer_size - 1);

        let out = rig.cycle(&[], &[0]);
        assert_eq!(out, vec![(0, Flit::head(0))]);
        let out = rig.cycle(&[], &[0]);
        assert_eq!(out, vec![(0, Flit::tail(7))]);
        assert!(!rig.router.is_stalled(0));
        assert_eq!(rig.router.stats().stall_cycles[0], 2);
        assert_eq!(rig.router.credit_recv(0, 0), params.buffer_size - 2);
    }

    #[test]
    fn test_multicast_waits_for_both_ports() {
        let params = RouterParams {
            num_lports: 2,
            num_rports: 2,
            num_vchannels: 1,
            buffer_size: 1,
            max_hops: 2,
            multicast: true,
        };
        let sr = SourceRoute::new(2, 2);
        let mut rig = Rig::new(params);
        let drain = all_ports(&params);

        // Use up local port 0's only credit.
        let out = rig.cycle(&[(1, Flit::single(sr.encode(&[Hop::local(0b01)])))], &drain);
        assert_eq!(out.len(), 1);
        assert_eq!(rig.router.credit_recv(0, 0), 0);

        // Local 0 plus remote port 1 (port 3), then local delivery downstream.
        let mc = sr.encode(&[Hop::multicast(1, 0b01), Hop::local(0b01)]);
        let out = rig.cycle(&[(2, Flit::single(mc))], &drain);
        assert!(out.is_empty());

        rig.give_credit(0, 0);
        let out = rig.cycle(&[], &drain);
        let ports: Vec<usize> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(ports, vec![0, 3]);
        assert_eq!(out[0].1, out[1].1);
        assert_eq!(rig.router.stats().multicasts, 1);
    }

    #[test]
    fn test_multicasts_sharing_a_remote_port_both_deliver() {
        let params = RouterParams {
            num_lports: 2,
            num_rports: 2,
            num_vchannels: 1,
            buffer_size: 8,
            max_hops: 2,
            multicast: true,
        };
        let sr = SourceRoute::new(2, 2);
        let mut rig = Rig::new(params);
        let drain = all_ports(&params);

        // Different local ports, same remote port 1 (port 3).
        let to_l0 = sr.encode(&[Hop::multicast(1, 0b01), Hop::local(0b01)]);
        let to_l1 = sr.encode(&[Hop::multicast(1, 0b10), Hop::local(0b01)]);
        let mut out = rig.cycle(&[(2, Flit::single(to_l0)), (3, Flit::single(to_l1))], &drain);
        // Only one pair can hold port 3 this cycle.
        assert_eq!(out.len(), 2);
        for _ in 0..6 {
            out.extend(rig.cycle(&[], &drain));
        }

        let mut ports: Vec<usize> = out.iter().map(|(k, _)| *k).collect();
        ports.sort_unstable();
        assert_eq!(ports, vec![0, 1, 3, 3]);
        assert_eq!(rig.router.stats().multicasts, 2);
        assert_eq!(rig.router.stats().flits_out, vec![1, 1, 0, 2]);
        assert_eq!(rig.credits_back[2] + rig.credits_back[3], 2);
        assert!(rig.router.is_idle());
    }

    #[test]
    fn test_credits_conserved_with_interleaved_vcs() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 1,
            num_vchannels: 2,
            buffer_size: 2,
            max_hops: 2,
            multicast: false,
        };
        let b = params.buffer_size;
        let dest = SourceRoute::new(1, 1).encode(&[Hop::local(0b1)]);
        let mut rig = Rig::new(params);

        // Two packets per round, one per VC, flits alternating between them.
        let mut script = VecDeque::new();
        for round in 0..4u64 {
            let packets: Vec<Vec<Flit>> = (0..2u32)
                .map(|vc| {
                    let tag = round << 8 | vc as u64;
                    vec![Flit::head(dest), Flit::body(tag), Flit::tail(tag)]
                        .into_iter()
                        .map(|f| f.with_packet_id(vc))
                        .collect()
                })
                .collect();
            for i in 0..3 {
                script.push_back(packets[0][i]);
                script.push_back(packets[1][i]);
            }
        }
        let total = script.len();

        // Upstream credits per VC, and flits held downstream awaiting credit return.
        let mut upstream = [b; 2];
        let mut returned_seen = [0usize; 2];
        let mut held = [0usize; 2];
        let mut received: [Vec<FlitId>; 2] = [Vec::new(), Vec::new()];

        for cycle in 0..120 {
            let mut inputs = Vec::new();
            if let Some(&f) = script.front() {
                let vc = f.packet_id as usize;
                if upstream[vc] > 0 {
                    upstream[vc] -= 1;
                    inputs.push((1, f));
                    script.pop_front();
                }
            }
            for (_, f) in rig.cycle(&inputs, &[0]) {
                let vc = f.packet_id as usize;
                held[vc] += 1;
                received[vc].push(f.flit_id);
            }
            for vc in 0..2 {
                let back = rig.credits_back[params.num_vchannels + vc];
                upstream[vc] += back - returned_seen[vc];
                returned_seen[vc] = back;

                // Downstream: credits held plus flits in flight.
                assert_eq!(rig.router.credit_recv(0, vc) + held[vc], b, "output VC {} cycle {}", vc, cycle);
                // Upstream: sender credits plus buffered plus owed.
                assert_eq!(
                    upstream[vc] + rig.router.buffered(1, vc) + rig.router.credit_send(1, vc),
                    b,
                    "input VC {} cycle {}",
                    vc,
                    cycle
                );
            }
            if cycle % 2 == 0 {
                for vc in 0..2 {
                    if held[vc] > 0 {
                        held[vc] -= 1;
                        rig.give_credit(0, vc);
                    }
                }
            }
        }

        assert!(script.is_empty());
        assert_eq!(received[0].len() + received[1].len(), total);
        for ids in &received {
            for packet in ids.chunks(3) {
                assert_eq!(packet, [FlitId::Head, FlitId::Body, FlitId::Tail]);
            }
        }
        assert_eq!(rig.router.credit_recv(0, 0), b);
        assert_eq!(rig.router.credit_recv(0, 1), b);
        assert!(rig.router.is_idle());
    }

    #[test]
    #[should_panic(expected = "without HEAD")]
    fn test_body_without_head_panics() {
        let params = RouterParams::default();
        let mut rig = Rig::new(params);
        rig.cycle(&[(0, Flit::body(0x55))], &all_ports(&params));
    }

    #[test]
    #[should_panic(expected = "input buffer overflow")]
    fn test_sender_ignoring_credits_panics() {
        let params = RouterParams {
            num_lports: 1,
            num_rports: 1,
            num_vchannels: 1,
            buffer_size: 1,
            ..RouterParams::default()
        };
        let mut rig = Rig::new(params);
        // First flit takes output 0's only credit; the second sits in the
        // one-slot buffer; the third has nowhere to go.
        for d in 0..3 {
            rig.cycle(&[(1, Flit::single(1 | (d << 8)))], &[]);
        }
    }

    #[test]
    fn test_reset_restores_credits() {
        let params = RouterParams::default();
        let mut rig = Rig::new(params);
        rig.cycle(&[(0, Flit::head(0xC))], &[3]);
        assert_eq!(rig.router.credit_recv(3, 0), 7);
        rig.router.reset();
        assert_eq!(rig.router.credit_recv(3, 0), 8);
        assert_eq!(rig.router.credit_send(0, 0), 0);
        assert!(rig.router.is_idle());
    }
}
