//! Request/response shim in front of an AXI manager port.
//!
//! # Architecture
//!
//! ```text
//!   rd_req ──► [req FIFO] ──► id alloc ──► AR ─────────────►
//!   rd_resp ◄── rd_rob (in-order, multi-beat) ◄── R ◄───────
//!
//!   wr_req ──► [req FIFO] ──► id alloc ──► AW, then W beats ─►
//!   wr_resp ◄── wr_rob (in-order) ◄── B ◄───────────────────
//! ```
//!
//! Callers see responses strictly in request order whatever order the
//! subordinate answers in. Each id names one ROB slot; a burst read is only
//! issued once the read ROB has drained, so its beats can be appended at the
//! tail as they arrive.
//!
//! A write request carries one data beat. The first beat of a burst also
//! drives AW; following requests of the same burst go straight to W.
//! Without write responses no write slot is allocated and `wr_resp` stays
//! silent.

use thiserror::Error;

use super::channel::AxiPort;
use super::config::{AxiConfig, AxiConfigError};
use super::payload::{AddrPayload, Burst, Resp, WritePayload};
use crate::rob::{ReorderBuf, ReorderBufWBeats, RobError};
use crate::sim::{ChanId, ChannelArena, ChannelPolicy, InBuffered, Process};

/// Depth of each request FIFO.
pub const REQUEST_FIFO_DEPTH: usize = 4;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid AXI config: {0}")]
    Config(#[from] AxiConfigError),

    #[error("invalid reorder buffer: {0}")]
    Rob(#[from] RobError),
}

/// Read request from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdRequest {
    pub addr: u64,
    pub len: u32,
    pub size: u8,
    pub burst: Burst,
    pub cache: u8,
    pub auser: u64,
}

impl RdRequest {
    pub fn new(addr: u64, len: u32) -> Self {
        Self {
            addr,
            len,
            ..Self::default()
        }
    }

    fn to_addr_payload(self, id: u32) -> AddrPayload {
        AddrPayload {
            id,
            addr: self.addr,
            len: self.len,
            size: self.size,
            burst: self.burst,
            cache: self.cache,
            auser: self.auser,
        }
    }
}

/// One write beat from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WrRequest {
    pub addr: u64,
    pub len: u32,
    pub size: u8,
    pub burst: Burst,
    pub cache: u8,
    pub auser: u64,
    pub data: u64,
    pub last: bool,
    pub wuser: u64,
}

impl WrRequest {
    pub fn new(addr: u64, len: u32, data: u64, last: bool) -> Self {
        Self {
            addr,
            len,
            data,
            last,
            ..Self::default()
        }
    }

    /// The beats of a `data.len()`-beat burst at `addr`.
    pub fn burst(addr: u64, data: &[u64]) -> Vec<Self> {
        let len = data.len().saturating_sub(1) as u32;
        data.iter()
            .enumerate()
            .map(|(i, &d)| Self::new(addr, len, d, i + 1 == data.len()))
            .collect()
    }

    fn to_addr_payload(self, id: u32) -> AddrPayload {
        RdRequest {
            addr: self.addr,
            len: self.len,
            size: self.size,
            burst: self.burst,
            cache: self.cache,
            auser: self.auser,
        }
        .to_addr_payload(id)
    }
}

/// One read beat returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdResp {
    pub resp: Resp,
    pub data: u64,
    pub last: bool,
    pub ruser: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WrResp {
    pub resp: Resp,
    pub buser: u64,
}

/// Caller-side channels of a gate plus its AXI manager port.
#[derive(Debug, Clone, Copy)]
pub struct GatePorts {
    pub rd_req: ChanId<RdRequest>,
    pub rd_resp: ChanId<RdResp>,
    pub wr_req: ChanId<WrRequest>,
    pub wr_resp: ChanId<WrResp>,
    pub axi: AxiPort,
}

impl GatePorts {
    /// Allocate the caller-side channels; `axi` is the manager port.
    pub fn alloc(arena: &mut ChannelArena, name: &str, axi: AxiPort, policy: ChannelPolicy) -> Self {
        Self {
            rd_req: arena.channel(format!("{}.rd_req", name), policy),
            rd_resp: arena.channel(format!("{}.rd_resp", name), policy),
            wr_req: arena.channel(format!("{}.wr_req", name), policy),
            wr_resp: arena.channel(format!("{}.wr_resp", name), policy),
            axi,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    pub reads_issued: u64,
    pub writes_issued: u64,
    pub read_beats: u64,
    pub write_beats: u64,
    pub error_responses: u64,
}

#[derive(Debug)]
pub struct AxiManagerGate {
    name: String,
    cfg: AxiConfig,
    ports: GatePorts,

    rd_reqs: InBuffered<RdRequest>,
    rd_rob: ReorderBufWBeats<RdResp>,
    rd_request: Option<RdRequest>,
    rd_id: Option<usize>,
    rd_burst_in_flight: bool,
    rd_receiving_beats: bool,

    wr_reqs: InBuffered<WrRequest>,
    wr_rob: ReorderBuf<WrResp>,
    wr_request: Option<WrRequest>,
    wr_id: Option<usize>,
    wr_addr_sent: bool,
    wr_burst_in_flight: bool,
    /// Id of the burst whose W beats are being sent.
    wr_burst_id: usize,
    wr_beats_left: u32,

    stats: GateStats,
}

impl AxiManagerGate {
    pub fn new(
        name: impl Into<String>,
        cfg: AxiConfig,
        ports: GatePorts,
        rob_depth: usize,
        max_in_flight: usize,
    ) -> Result<Self, GateError> {
        cfg.validate()?;
        Ok(Self {
            name: name.into(),
            cfg,
            ports,
            rd_reqs: InBuffered::new(ports.rd_req, REQUEST_FIFO_DEPTH),
            rd_rob: ReorderBufWBeats::new(rob_depth, max_in_flight, cfg.id_width)?,
            rd_request: None,
            rd_id: None,
            rd_burst_in_flight: false,
            rd_receiving_beats: false,
            wr_reqs: InBuffered::new(ports.wr_req, REQUEST_FIFO_DEPTH),
            wr_rob: ReorderBuf::new(rob_depth, max_in_flight, cfg.id_width)?,
            wr_request: None,
            wr_id: None,
            wr_addr_sent: false,
            wr_burst_in_flight: false,
            wr_burst_id: 0,
            wr_beats_left: 0,
            stats: GateStats::default(),
        })
    }

    pub fn ports(&self) -> &GatePorts {
        &self.ports
    }

    pub fn stats(&self) -> GateStats {
        self.stats
    }

    /// Nothing queued, outstanding or waiting for the caller.
    pub fn is_idle(&self) -> bool {
        self.rd_reqs.is_empty()
            && self.wr_reqs.is_empty()
            && self.rd_request.is_none()
            && self.wr_request.is_none()
            && self.rd_rob.is_empty()
            && self.wr_rob.is_empty()
    }

    fn run_rd(&mut self, chans: &mut ChannelArena) {
        if let Some(resp) = self.rd_rob.peek_top().copied() {
            if chans.try_push(self.ports.rd_resp, resp).is_ok() {
                self.rd_rob.pop_top();
            }
        }

        let fifo_was_full = self.rd_reqs.len() == REQUEST_FIFO_DEPTH;
        if self.rd_request.is_none() && !self.rd_reqs.is_empty() {
            self.rd_request = Some(self.rd_reqs.pop());
            self.rd_id = None;
        }

        if let Some(req) = self.rd_request {
            assert!(
                req.len <= self.cfg.max_len(),
                "{}: read len {} beyond maximum {}",
                self.name,
                req.len,
                self.cfg.max_len()
            );
            let is_burst = req.len != 0;
            let rob_ready = if is_burst {
                self.rd_rob.is_empty()
            } else {
                self.rd_rob.can_accept()
            };
            if self.rd_id.is_none() && rob_ready && !self.rd_burst_in_flight {
                let id = self.rd_rob.add_request();
                log::debug!("{}: read {:#x} len {} gets id {}", self.name, req.addr, req.len, id);
                self.rd_id = Some(id);
                self.rd_burst_in_flight = is_burst;
            }
            if let Some(id) = self.rd_id {
                if chans.try_push(self.ports.axi.rd.ar, req.to_addr_payload(id as u32)).is_ok() {
                    self.rd_request = None;
                    self.rd_id = None;
                    self.stats.reads_issued += 1;
                }
            }
        }

        if !fifo_was_full {
            self.rd_reqs.transfer_read(chans);
        }

        if !self.rd_receiving_beats || self.rd_rob.can_receive_beats() {
            if let Some(beat) = chans.try_pop(self.ports.axi.rd.r) {
                let resp = RdResp {
                    resp: beat.resp,
                    data: beat.data,
                    last: beat.last,
                    ruser: beat.ruser,
                };
                if resp.resp.is_error() {
                    self.stats.error_responses += 1;
                }
                self.stats.read_beats += 1;
                if !self.rd_receiving_beats {
                    self.rd_rob.add_response(beat.id as usize, resp);
                } else {
                    self.rd_rob.add_beat(resp);
                }
                if beat.last {
                    self.rd_burst_in_flight = false;
                }
                self.rd_receiving_beats = self.rd_burst_in_flight;
            }
        }
    }

    fn run_wr(&mut self, chans: &mut ChannelArena) {
        let wresp = self.cfg.use_write_responses;
        if let Some(resp) = self.wr_rob.peek_top().copied() {
            if chans.try_push(self.ports.wr_resp, resp).is_ok() {
                self.wr_rob.pop_top();
            }
        }

        let fifo_was_full = self.wr_reqs.len() == REQUEST_FIFO_DEPTH;
        if self.wr_request.is_none() && !self.wr_reqs.is_empty() {
            self.wr_request = Some(self.wr_reqs.pop());
            self.wr_id = None;
        }

        if wresp {
            if let Some(b) = chans.try_pop(self.ports.axi.wr.b) {
                if b.resp.is_error() {
                    self.stats.error_responses += 1;
                }
                log::trace!("{}: B id {} {}", self.name, b.id, b.resp);
                self.wr_rob.add_response(b.id as usize, WrResp { resp: b.resp, buser: b.buser });
            }
        }

        if let Some(req) = self.wr_request {
            if self.wr_id.is_none() && self.wr_burst_in_flight {
                self.wr_id = Some(self.wr_burst_id);
            }
            if self.wr_id.is_none() && (!wresp || self.wr_rob.can_accept()) {
                let id = if wresp { self.wr_rob.add_request() } else { 0 };
                log::debug!("{}: write {:#x} len {} gets id {}", self.name, req.addr, req.len, id);
                self.wr_id = Some(id);
            }
            if let Some(id) = self.wr_id {
                if !self.wr_addr_sent {
                    assert!(
                        req.len <= self.cfg.max_len(),
                        "{}: write len {} beyond maximum {}",
                        self.name,
                        req.len,
                        self.cfg.max_len()
                    );
                    if chans.try_push(self.ports.axi.wr.aw, req.to_addr_payload(id as u32)).is_ok() {
                        self.wr_addr_sent = true;
                        self.wr_burst_id = id;
                        self.wr_beats_left = req.len + 1;
                        self.stats.writes_issued += 1;
                    }
                } else {
                    let last = self.wr_beats_left == 1;
                    if self.cfg.use_last {
                        assert_eq!(
                            req.last, last,
                            "{}: write request last={} with {} beats left",
                            self.name, req.last, self.wr_beats_left
                        );
                    }
                    let beat = WritePayload {
                        data: req.data,
                        last: req.last,
                        wstrb: self.cfg.full_strobe(),
                        wuser: req.wuser,
                    };
                    let pushed = chans.try_push(self.ports.axi.wr.w, beat).is_ok();
                    if pushed {
                        self.wr_request = None;
                        self.wr_id = None;
                        self.wr_beats_left -= 1;
                        self.stats.write_beats += 1;
                    }
                    self.wr_burst_in_flight = !last;
                    self.wr_addr_sent = self.wr_burst_in_flight || !pushed;
                }
            }
        }

        if !fifo_was_full {
            self.wr_reqs.transfer_read(chans);
        }
    }
}

impl Process for AxiManagerGate {
    fn tick(&mut self, chans: &mut ChannelArena) {
        self.run_rd(chans);
        self.run_wr(chans);
    }

    fn reset(&mut self) {
        self.rd_reqs.reset();
        self.rd_rob.reset();
        self.rd_request = None;
        self.rd_id = None;
        self.rd_burst_in_flight = false;
        self.rd_receiving_beats = false;
        self.wr_reqs.reset();
        self.wr_rob.reset();
        self.wr_request = None;
        self.wr_id = None;
        self.wr_addr_sent = false;
        self.wr_burst_in_flight = false;
        self.wr_burst_id = 0;
        self.wr_beats_left = 0;
    }

    fn name(&self) -> &str {
        &self.name
    }
}
