//! One manager onto N address-ranged subordinates.
//!
//! Each subordinate owns an inclusive range `[lower, upper]` compared
//! against the low `addr_bits` bits of the request address. The first
//! matching range wins. Misses go to the last subordinate when
//! `default_output` is set and are fatal otherwise.
//!
//! Reads and writes run independent state machines and each allows a
//! single outstanding transaction.

use thiserror::Error;

use super::channel::AxiPort;
use super::config::AxiConfig;
use crate::bits::mask;
use crate::sim::{ChannelArena, Process};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SplitterError {
    #[error("splitter needs at least one address range")]
    EmptyRanges,
    #[error("range {index} is inverted: lower {lower:#x} > upper {upper:#x}")]
    InvertedRange { index: usize, lower: u64, upper: u64 },
    #[error("range {index} bound {bound:#x} does not fit in {addr_bits} inspected bits")]
    RangeTooWide { index: usize, bound: u64, addr_bits: u32 },
    #[error("{ranges} ranges for {subordinates} subordinates")]
    RangeCount { ranges: usize, subordinates: usize },
}

/// Inclusive address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    pub lower: u64,
    pub upper: u64,
}

impl AddrRange {
    pub fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.lower && addr <= self.upper
    }
}

/// Address decode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrMap {
    pub ranges: Vec<AddrRange>,
    /// Low address bits compared against the ranges.
    pub addr_bits: u32,
    /// Route misses to the last subordinate.
    pub default_output: bool,
    /// Forward addresses relative to the chosen range's lower bound.
    pub translate_addr: bool,
}

impl AddrMap {
    pub fn new(ranges: Vec<AddrRange>, addr_bits: u32) -> Self {
        Self {
            ranges,
            addr_bits,
            default_output: false,
            translate_addr: false,
        }
    }

    pub fn with_default_output(mut self, on: bool) -> Self {
        self.default_output = on;
        self
    }

    pub fn with_translate_addr(mut self, on: bool) -> Self {
        self.translate_addr = on;
        self
    }

    pub fn validate(&self) -> Result<(), SplitterError> {
        if self.ranges.is_empty() {
            return Err(SplitterError::EmptyRanges);
        }
        let limit = mask(self.addr_bits.min(64)) as u64;
        for (index, r) in self.ranges.iter().enumerate() {
            if r.lower > r.upper {
                return Err(SplitterError::InvertedRange {
                    index,
                    lower: r.lower,
                    upper: r.upper,
                });
            }
            if r.upper > limit {
                return Err(SplitterError::RangeTooWide {
                    index,
                    bound: r.upper,
                    addr_bits: self.addr_bits,
                });
            }
        }
        Ok(())
    }

    /// Subordinate index for `addr`, or `None` on a miss without default.
    pub fn decode(&self, addr: u64) -> Option<usize> {
        let inspected = addr & mask(self.addr_bits.min(64)) as u64;
        self.ranges
            .iter()
            .position(|r| r.contains(inspected))
            .or(if self.default_output { Some(self.ranges.len() - 1) } else { None })
    }

    /// Address as forwarded to subordinate `sub`.
    pub fn forward_addr(&self, addr: u64, sub: usize) -> u64 {
        if self.translate_addr {
            addr.wrapping_sub(self.ranges[sub].lower)
        } else {
            addr
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    InFlight(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    WriteInFlight(usize),
    RespInFlight(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitterStats {
    /// Reads routed to each subordinate.
    pub reads: Vec<u64>,
    /// Writes routed to each subordinate.
    pub writes: Vec<u64>,
    /// Requests that fell through to the default output.
    pub defaulted: u64,
}

#[derive(Debug)]
pub struct AxiSplitter {
    name: String,
    cfg: AxiConfig,
    map: AddrMap,
    manager: AxiPort,
    subs: Vec<AxiPort>,
    rd_state: ReadState,
    wr_state: WriteState,
    stats: SplitterStats,
}

impl AxiSplitter {
    /// `manager` is the port the manager drives; `subs[i]` is driven toward
    /// subordinate `i`, which owns `map.ranges[i]`.
    pub fn new(
        name: impl Into<String>,
        cfg: AxiConfig,
        map: AddrMap,
        manager: AxiPort,
        subs: Vec<AxiPort>,
    ) -> Result<Self, SplitterError> {
        map.validate()?;
        if map.ranges.len() != subs.len() {
            return Err(SplitterError::RangeCount {
                ranges: map.ranges.len(),
                subordinates: subs.len(),
            });
        }
        let n = subs.len();
        Ok(Self {
            name: name.into(),
            cfg,
            map,
            manager,
            subs,
            rd_state: ReadState::Idle,
            wr_state: WriteState::Idle,
            stats: SplitterStats {
                reads: vec![0; n],
                writes: vec![0; n],
                defaulted: 0,
            },
        })
    }

    pub fn stats(&self) -> &SplitterStats {
        &self.stats
    }

    pub fn map(&self) -> &AddrMap {
        &self.map
    }

    pub fn is_idle(&self) -> bool {
        self.rd_state == ReadState::Idle && self.wr_state == WriteState::Idle
    }

    fn route(&mut self, addr: u64, kind: &str) -> usize {
        match self.map.decode(addr) {
            Some(i) => {
                let inspected = addr & mask(self.map.addr_bits.min(64)) as u64;
                if !self.map.ranges[i].contains(inspected) {
                    self.stats.defaulted += 1;
                }
                i
            }
            None => panic!(
                "{}: {} address {:#x} did not fall into any output address range",
                self.name, kind, addr
            ),
        }
    }

    fn run_rd(&mut self, chans: &mut ChannelArena) {
        match self.rd_state {
            ReadState::Idle => {
                let Some(mut ar) = chans.try_pop(self.manager.rd.ar) else { return };
                let i = self.route(ar.addr, "read");
                ar.addr = self.map.forward_addr(ar.addr, i);
                log::debug!("{}: AR id {} -> subordinate {} addr {:#x}", self.name, ar.id, i, ar.addr);
                chans.send(self.subs[i].rd.ar, ar);
                self.stats.reads[i] += 1;
                self.rd_state = ReadState::InFlight(i);
            }
            ReadState::InFlight(i) => {
                if chans.is_blocked(self.manager.rd.r) {
                    return;
                }
                if let Some(beat) = chans.try_pop(self.subs[i].rd.r) {
                    let last = beat.last;
                    chans.send(self.manager.rd.r, beat);
                    if last {
                        self.rd_state = ReadState::Idle;
                    }
                }
            }
        }
    }

    fn run_wr(&mut self, chans: &mut ChannelArena) {
        match self.wr_state {
            WriteState::Idle => {
                let Some(mut aw) = chans.try_pop(self.manager.wr.aw) else { return };
                let i = self.route(aw.addr, "write");
                aw.addr = self.map.forward_addr(aw.addr, i);
                log::debug!("{}: AW id {} -> subordinate {} addr {:#x}", self.name, aw.id, i, aw.addr);
                chans.send(self.subs[i].wr.aw, aw);
                self.stats.writes[i] += 1;
                self.wr_state = WriteState::WriteInFlight(i);
            }
            WriteState::WriteInFlight(i) => {
                if chans.is_blocked(self.subs[i].wr.w) {
                    return;
                }
                if let Some(beat) = chans.try_pop(self.manager.wr.w) {
                    let last = beat.last;
                    chans.send(self.subs[i].wr.w, beat);
                    if last {
                        self.wr_state = if self.cfg.use_write_responses {
                            WriteState::RespInFlight(i)
                        } else {
                            WriteState::Idle
                        };
                    }
                }
            }
            WriteState::RespInFlight(i) => {
                if chans.is_blocked(self.manager.wr.b) {
                    return;
                }
                if let Some(b) = chans.try_pop(self.subs[i].wr.b) {
                    chans.send(self.manager.wr.b, b);
                    self.wr_state = WriteState::Idle;
                }
            }
        }
    }
}

impl Process for AxiSplitter {
    fn tick(&mut self, chans: &mut ChannelArena) {
        self.run_rd(chans);
        self.run_wr(chans);
    }

    fn reset(&mut self) {
        self.rd_state = ReadState::Idle;
        self.wr_state = WriteState::Idle;
    }

    fn name(&self) -> &str {
        &self.name
    }
}
