//! End-to-end scenarios.
//!
//! Each scenario builds a small fabric, drives it with scripted traffic and
//! returns a report of what was observed. `verdict()` compares the report
//! against the expected outcome. The CLI runs the same functions by name.

use thiserror::Error;

use super::harness::{Sink, Source, Tap};
use crate::arb::Arbiter;
use crate::axi::{
    AddrMap, AddrPayload, AddrRange, AxiArbiter, AxiConfig, AxiConfigError, AxiManagerGate, AxiPort, AxiSplitter,
    AxiSubordinateMem, AxiWrite, GateError, GatePorts, RdRequest, Resp, SplitterError, WRespPayload, WritePayload,
};
use crate::config::Config;
use crate::noc::{Flit, Hop, RouterError, RouterParams, RouterPorts, SourceRoute, WhvcRouter};
use crate::scratchpad::{ArbitratedScratchpad, ClientRequest};
use crate::sim::Simulator;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("unknown scenario '{0}'")]
    Unknown(String),
    #[error(transparent)]
    AxiConfig(#[from] AxiConfigError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Splitter(#[from] SplitterError),
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Summary of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub name: &'static str,
    pub cycles: u64,
    /// `Err` holds the first mismatch.
    pub result: Result<(), String>,
}

impl ScenarioOutcome {
    pub fn is_pass(&self) -> bool {
        self.result.is_ok()
    }
}

fn check(ok: bool, what: impl FnOnce() -> String) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(what())
    }
}

// ----------------------------------------------------------------------------
// Arbiter
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterReport {
    pub masks: Vec<u64>,
    pub grants: Vec<Option<usize>>,
}

impl ArbiterReport {
    pub fn verdict(&self) -> Result<(), String> {
        let expected = [Some(0), Some(1), Some(2), Some(3), None, Some(0)];
        check(self.grants == expected, || format!("grants {:?}, expected {:?}", self.grants, expected))
    }
}

/// Four-way round-robin arbiter over a fixed mask sequence.
pub fn arbiter_scenario() -> ArbiterReport {
    let masks = vec![0b1111, 0b1111, 0b1111, 0b1111, 0b0000, 0b1111];
    let mut arb = Arbiter::round_robin(4);
    let grants = masks.iter().map(|&m| arb.pick_index(m)).collect();
    ArbiterReport { masks, grants }
}

// ----------------------------------------------------------------------------
// Scratchpad
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchpadReport {
    /// `(lane, data)` of every valid load response.
    pub loads: Vec<(usize, u32)>,
    pub not_ready: usize,
    pub cycles: u64,
}

impl ScratchpadReport {
    pub fn verdict(&self) -> Result<(), String> {
        check(self.not_ready == 0, || format!("{} lanes reported not ready", self.not_ready))?;
        let expected = vec![(0, 0xA1), (2, 0xB2)];
        check(self.loads == expected, || format!("loads {:x?}, expected {:x?}", self.loads, expected))
    }
}

/// Four lanes over four banks: two stores, then loads of the same words.
pub fn scratchpad_scenario() -> ScratchpadReport {
    let mut sp = ArbitratedScratchpad::<u32>::new(256, 4, 4, 2);
    let script = [
        ClientRequest::store(4).with_lane(0, 0x04, 0xA1).with_lane(1, 0x05, 0xB2),
        ClientRequest::load(4).with_lane(0, 0x04, 0).with_lane(2, 0x05, 0),
        ClientRequest::load(4),
    ];
    let mut report = ScratchpadReport {
        loads: Vec::new(),
        not_ready: 0,
        cycles: 0,
    };
    for req in &script {
        let out = sp.load_store(req);
        report.cycles += 1;
        report.not_ready += req.valid.iter().zip(&out.ready).filter(|&(&v, &r)| v && !r).count();
        for lane in 0..req.lanes() {
            if out.rsp.valid[lane] {
                report.loads.push((lane, out.rsp.data[lane]));
            }
        }
    }
    report
}

// ----------------------------------------------------------------------------
// Router
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterReport {
    /// Port every egressing flit left on, with the flit.
    pub egress: Vec<(usize, Flit)>,
    pub credits_before: usize,
    pub credits_after: usize,
    pub credits_returned: usize,
    pub cycles: u64,
}

impl RouterReport {
    pub fn verdict(&self) -> Result<(), String> {
        check(self.egress.len() == 3, || format!("{} flits egressed, expected 3", self.egress.len()))?;
        check(self.egress.iter().all(|(p, _)| *p == ROUTER_OUT_PORT), || {
            format!("flits left on ports {:?}", self.egress.iter().map(|(p, _)| p).collect::<Vec<_>>())
        })?;
        let data: Vec<u64> = self.egress.iter().map(|(_, f)| f.data).collect();
        check(data[1..] == [0xdead_beef, 0xcafe_f00d], || format!("payloads {:x?}", data))?;
        check(self.egress[0].1.flit_id.is_header() && self.egress[2].1.flit_id.is_tail(), || {
            "flits out of order".to_string()
        })?;
        check(self.credits_before.saturating_sub(self.credits_after) == 3, || {
            format!("credits went {} -> {}", self.credits_before, self.credits_after)
        })?;
        check(self.credits_returned == 3, || format!("{} credits returned upstream", self.credits_returned))
    }
}

/// Remote port 2 of a 1L+4R router.
const ROUTER_OUT_PORT: usize = 3;

/// One three-flit packet from local port 0 to remote port 2.
pub fn router_scenario(config: &Config) -> Result<RouterReport, ScenarioError> {
    let params = RouterParams {
        num_lports: 1,
        num_rports: 4,
        num_vchannels: 2,
        buffer_size: 8,
        max_hops: 4,
        multicast: false,
    };
    let policy = config.channel_policy();
    let mut sim = Simulator::new().with_reset_kind(config.reset_kind());
    let ports = RouterPorts::alloc(sim.channels_mut(), "router", &params, policy);
    let dest = SourceRoute::new(params.num_lports, params.num_rports).encode(&[Hop::remote(2), Hop::local(1)]);
    let packet = [Flit::head(dest), Flit::body(0xdead_beef), Flit::tail(0xcafe_f00d)];

    sim.add(Source::from_values("inject", ports.in_flit[0], packet));
    let router = sim.add(WhvcRouter::new("router", params, ports.clone())?);
    let egress: Vec<_> = (0..params.num_ports())
        .map(|p| sim.add(Sink::new(format!("egress{}", p), ports.out_flit[p])))
        .collect();
    let credits = sim.add(Sink::new("credits", ports.out_credit[0]));

    let credits_before = sim.process(router).credit_recv(ROUTER_OUT_PORT, 0);
    let limit = config.max_cycles();
    sim.run_until(limit, |s| {
        s.process(router).is_idle() && s.process(egress[ROUTER_OUT_PORT]).len() == 3 && s.process(credits).len() == 3
    });

    let mut out: Vec<(u64, usize, Flit)> = Vec::new();
    for (p, id) in egress.iter().enumerate() {
        out.extend(sim.process(*id).received().iter().map(|&(c, f)| (c, p, f)));
    }
    out.sort_by_key(|&(c, p, _)| (c, p));
    Ok(RouterReport {
        egress: out.into_iter().map(|(_, p, f)| (p, f)).collect(),
        credits_before,
        credits_after: sim.process(router).credit_recv(ROUTER_OUT_PORT, 0),
        credits_returned: sim.process(credits).len(),
        cycles: sim.total_cycles,
    })
}

// ----------------------------------------------------------------------------
// AXI manager gate
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub data: Vec<u64>,
    pub expected: Vec<u64>,
    pub errors: usize,
    pub cycles: u64,
}

impl GateReport {
    pub fn verdict(&self) -> Result<(), String> {
        check(self.errors == 0, || format!("{} error responses", self.errors))?;
        check(self.data == self.expected, || {
            format!("responses {:x?}, expected {:x?}", self.data, self.expected)
        })
    }
}

fn pattern(i: u64) -> u64 {
    0x1000 + i
}

/// A single-beat read at 0x40 followed by a burst at 0x80.
pub fn gate_scenario(config: &Config) -> Result<GateReport, ScenarioError> {
    let cfg = config.axi_config()?;
    let policy = config.channel_policy();
    let bpb = cfg.bytes_per_beat();
    let burst_len = cfg.max_len().min(3);

    let mut sim = Simulator::new().with_reset_kind(config.reset_kind());
    let chans = sim.channels_mut();
    let axi = AxiPort::alloc(chans, "axi", policy);
    let ports = GatePorts::alloc(chans, "gate", axi, policy);

    let reqs = [RdRequest::new(0x40, 0), RdRequest::new(0x80, burst_len)];
    sim.add(Source::from_values("client", ports.rd_req, reqs));
    let in_flight = config.max_in_flight().min(cfg.num_ids());
    let gate = sim.add(AxiManagerGate::new("gate", cfg, ports, config.rob_depth(), in_flight)?);
    let mut mem = AxiSubordinateMem::new("mem", cfg, axi, 0x1000);
    for i in 0..0x1000 / bpb {
        mem.load(i * bpb, pattern(i));
    }
    sim.add(mem);
    let resp = sim.add(Sink::new("responses", ports.rd_resp));

    let mut expected = vec![pattern(0x40 / bpb)];
    expected.extend((0..=burst_len as u64).map(|b| pattern(0x80 / bpb + b)));
    let want = expected.len();
    sim.run_until(config.max_cycles(), |s| s.process(resp).len() == want && s.process(gate).is_idle());

    let sink = sim.process(resp);
    Ok(GateReport {
        data: sink.values().map(|r| r.data).collect(),
        expected,
        errors: sink.values().filter(|r| r.resp.is_error()).count(),
        cycles: sim.total_cycles,
    })
}

// ----------------------------------------------------------------------------
// AXI splitter
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitterReport {
    /// Addresses seen on subordinate 1's AW channel.
    pub sub1_aw: Vec<u64>,
    /// Word stored at 0x100 in subordinate 1.
    pub sub1_word: Option<u64>,
    pub writes: Vec<u64>,
    pub b_resps: Vec<Resp>,
    pub expect_b: bool,
    pub cycles: u64,
}

impl SplitterReport {
    pub fn verdict(&self) -> Result<(), String> {
        check(self.sub1_aw == [0x100], || format!("subordinate 1 AW addresses {:x?}", self.sub1_aw))?;
        check(self.sub1_word == Some(0x123), || format!("subordinate 1 holds {:x?}", self.sub1_word))?;
        check(self.writes == [0, 1], || format!("writes per subordinate {:?}", self.writes))?;
        let want = if self.expect_b { vec![Resp::Okay] } else { Vec::new() };
        check(self.b_resps == want, || format!("write responses {:?}, expected {:?}", self.b_resps, want))
    }
}

/// Write to 0x80100 through a two-way splitter with address translation.
pub fn splitter_scenario(config: &Config) -> Result<SplitterReport, ScenarioError> {
    let cfg = config.axi_config()?;
    let policy = config.channel_policy();
    let mut sim = Simulator::new().with_reset_kind(config.reset_kind());
    let chans = sim.channels_mut();
    let mgr = AxiPort::alloc(chans, "mgr", policy);
    let subs = AxiPort::alloc_many(chans, "sub", 2, policy);
    let tapped_aw = chans.channel("sub[1].aw.tap", policy);

    let map = AddrMap::new(vec![AddrRange::new(0x0_0000, 0x7_FFFF), AddrRange::new(0x8_0000, 0xF_FFFF)], 20)
        .with_translate_addr(true);

    sim.add(Source::from_values("aw", mgr.wr.aw, [AddrPayload::new(0, 0x8_0100, 0)]));
    sim.add(Source::from_values("w", mgr.wr.w, [WritePayload::new(0x123, true)]));
    let split = sim.add(AxiSplitter::new("split", cfg, map, mgr, subs.clone())?);
    let tap = sim.add(Tap::new("tap", subs[1].wr.aw, tapped_aw));
    sim.add(AxiSubordinateMem::new("mem0", cfg, subs[0], 0x1000));
    let mem1_port = AxiPort {
        rd: subs[1].rd,
        wr: AxiWrite {
            aw: tapped_aw,
            ..subs[1].wr
        },
    };
    let mem1 = sim.add(AxiSubordinateMem::new("mem1", cfg, mem1_port, 0x1000));
    let b = sim.add(Sink::<WRespPayload>::new("b", mgr.wr.b));

    let expect_b = cfg.use_write_responses;
    sim.run_until(config.max_cycles(), |s| {
        s.process(split).is_idle() && s.process(mem1).stats().write_beats == 1 && (!expect_b || s.process(b).len() == 1)
    });

    Ok(SplitterReport {
        sub1_aw: sim.process(tap).seen().iter().map(|(_, a)| a.addr).collect(),
        sub1_word: sim.process(mem1).peek(0x100),
        writes: sim.process(split).stats().writes.clone(),
        b_resps: sim.process(b).values().map(|r| r.resp).collect(),
        expect_b,
        cycles: sim.total_cycles,
    })
}

// ----------------------------------------------------------------------------
// AXI arbiter
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxiArbiterReport {
    /// W data in the order the subordinate received it.
    pub w_order: Vec<u64>,
    pub expected_order: Vec<u64>,
    /// B responses delivered to each manager.
    pub b_counts: Vec<usize>,
    pub expect_b: bool,
    pub write_grants: Vec<u64>,
    pub cycles: u64,
}

impl AxiArbiterReport {
    pub fn verdict(&self) -> Result<(), String> {
        check(self.w_order == self.expected_order, || {
            format!("W beats {:x?}, expected {:x?}", self.w_order, self.expected_order)
        })?;
        check(self.write_grants == [1, 1], || format!("write grants {:?}", self.write_grants))?;
        let want = if self.expect_b { vec![1, 1] } else { vec![0, 0] };
        check(self.b_counts == want, || format!("write responses per manager {:?}", self.b_counts))
    }
}

/// Two managers write bursts one cycle apart; streams must not interleave.
pub fn axi_arbiter_scenario(config: &Config) -> Result<AxiArbiterReport, ScenarioError> {
    let cfg: AxiConfig = config.axi_config()?;
    let policy = config.channel_policy();
    let mut sim = Simulator::new().with_reset_kind(config.reset_kind());
    let chans = sim.channels_mut();
    let mgrs = AxiPort::alloc_many(chans, "mgr", 2, policy);
    let sub = AxiPort::alloc(chans, "sub", policy);
    let tapped_w = chans.channel("sub.w.tap", policy);

    let bursts = [(10u64, 0x000u64, 4u32, 0xA0u64), (11, 0x100, 2, 0xB0)];
    let mut expected_order = Vec::new();
    for (m, &(start, addr, beats, base)) in bursts.iter().enumerate() {
        let beats = beats.min(cfg.max_len() + 1);
        let data: Vec<u64> = (0..beats as u64).map(|i| base + i).collect();
        expected_order.extend(&data);
        let aw = AddrPayload::new(0, addr, beats - 1);
        sim.add(Source::new(format!("m{}.aw", m), mgrs[m].wr.aw, vec![(start, aw)]));
        let w: Vec<(u64, WritePayload)> = data
            .iter()
            .enumerate()
            .map(|(i, &d)| (start, WritePayload::new(d, i + 1 == data.len())))
            .collect();
        sim.add(Source::new(format!("m{}.w", m), mgrs[m].wr.w, w));
    }

    let arb = sim.add(AxiArbiter::new("arb", cfg, mgrs.clone(), sub, 4));
    let tap = sim.add(Tap::new("tap", sub.wr.w, tapped_w));
    let mem_port = AxiPort {
        rd: sub.rd,
        wr: AxiWrite { w: tapped_w, ..sub.wr },
    };
    sim.add(AxiSubordinateMem::new("mem", cfg, mem_port, 0x1000));
    let b_sinks: Vec<_> = mgrs
        .iter()
        .enumerate()
        .map(|(m, p)| sim.add(Sink::new(format!("m{}.b", m), p.wr.b)))
        .collect();

    let expect_b = cfg.use_write_responses;
    let total = expected_order.len();
    sim.run_until(config.max_cycles(), |s| {
        s.process(tap).seen().len() == total && (!expect_b || b_sinks.iter().all(|&id| s.process(id).len() == 1))
    });

    Ok(AxiArbiterReport {
        w_order: sim.process(tap).seen().iter().map(|(_, w)| w.data).collect(),
        expected_order,
        b_counts: b_sinks.iter().map(|&id| sim.process(id).len()).collect(),
        expect_b,
        write_grants: sim.process(arb).stats().write_grants.clone(),
        cycles: sim.total_cycles,
    })
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Scenario names in run order.
pub const SCENARIOS: [(&str, &str); 6] = [
    ("arbiter", "round-robin arbiter over a fixed mask sequence"),
    ("scratchpad", "stores then loads through a 4x4 banked scratchpad"),
    ("router", "three-flit packet through a 1L+4R wormhole router"),
    ("gate", "single read then burst through the AXI manager gate"),
    ("splitter", "translated write through a two-way AXI splitter"),
    ("axi-arbiter", "two managers' write bursts through the AXI arbiter"),
];

/// Run one scenario by name.
pub fn run_scenario(name: &str, config: &Config) -> Result<ScenarioOutcome, ScenarioError> {
    let (name, cycles, result) = match name {
        "arbiter" => {
            let r = arbiter_scenario();
            ("arbiter", r.masks.len() as u64, r.verdict())
        }
        "scratchpad" => {
            let r = scratchpad_scenario();
            ("scratchpad", r.cycles, r.verdict())
        }
        "router" => {
            let r = router_scenario(config)?;
            ("router", r.cycles, r.verdict())
        }
        "gate" => {
            let r = gate_scenario(config)?;
            ("gate", r.cycles, r.verdict())
        }
        "splitter" => {
            let r = splitter_scenario(config)?;
            ("splitter", r.cycles, r.verdict())
        }
        "axi-arbiter" => {
            let r = axi_arbiter_scenario(config)?;
            ("axi-arbiter", r.cycles, r.verdict())
        }
        other => return Err(ScenarioError::Unknown(other.to_string())),
    };
    log::info!("scenario {} finished after {} cycles", name, cycles);
    Ok(ScenarioOutcome { name, cycles, result })
}
