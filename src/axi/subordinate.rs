//! Memory-backed AXI subordinate.
//!
//! Serves AR/AW requests from a flat word array. Read beats are produced
//! into a response queue one per cycle; write beats are merged under their
//! byte strobes. Addresses beyond the array answer DECERR.
//!
//! With `reverse_reads` set, the subordinate waits for a pause in the AR
//! stream and then serves the youngest queued read first, so responses to
//! different ids come back out of order.

use std::collections::VecDeque;

use super::channel::AxiPort;
use super::config::AxiConfig;
use super::payload::{AddrPayload, Burst, ReadPayload, Resp, WRespPayload};
use crate::mem::Fifo;
use crate::sim::{ChannelArena, Process};

const ADDR_QUEUE_DEPTH: usize = 8;
const RESP_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubordinateStats {
    pub read_beats: u64,
    pub write_beats: u64,
    pub decode_errors: u64,
}

#[derive(Debug)]
pub struct AxiSubordinateMem {
    name: String,
    cfg: AxiConfig,
    port: AxiPort,
    words: Vec<u64>,
    reverse_reads: bool,

    rd_addr: VecDeque<AddrPayload>,
    rd_current: Option<AddrPayload>,
    rd_beat: u32,
    rd_resp: Fifo<ReadPayload>,
    ar_arrived: bool,

    wr_addr: Fifo<AddrPayload>,
    wr_beat: u32,
    wr_error: bool,
    wr_resp: Fifo<WRespPayload>,

    stats: SubordinateStats,
}

impl AxiSubordinateMem {
    /// Subordinate with `capacity` bytes of zeroed storage.
    pub fn new(name: impl Into<String>, cfg: AxiConfig, port: AxiPort, capacity: u64) -> Self {
        let words = (capacity / cfg.bytes_per_beat()) as usize;
        Self {
            name: name.into(),
            cfg,
            port,
            words: vec![0; words],
            reverse_reads: false,
            rd_addr: VecDeque::with_capacity(ADDR_QUEUE_DEPTH),
            rd_current: None,
            rd_beat: 0,
            rd_resp: Fifo::new(RESP_QUEUE_DEPTH),
            ar_arrived: false,
            wr_addr: Fifo::new(ADDR_QUEUE_DEPTH),
            wr_beat: 0,
            wr_error: false,
            wr_resp: Fifo::new(RESP_QUEUE_DEPTH),
            stats: SubordinateStats::default(),
        }
    }

    pub fn with_reverse_reads(mut self, on: bool) -> Self {
        self.reverse_reads = on;
        self
    }

    pub fn stats(&self) -> SubordinateStats {
        self.stats
    }

    /// Bytes of storage.
    pub fn capacity(&self) -> u64 {
        self.words.len() as u64 * self.cfg.bytes_per_beat()
    }

    fn word_index(&self, addr: u64) -> Option<usize> {
        let idx = (addr / self.cfg.bytes_per_beat()) as usize;
        (idx < self.words.len()).then_some(idx)
    }

    /// Backdoor write.
    pub fn load(&mut self, addr: u64, data: u64) {
        let idx = self
            .word_index(addr)
            .unwrap_or_else(|| panic!("{}: backdoor load at {:#x} beyond capacity", self.name, addr));
        self.words[idx] = data;
    }

    /// Backdoor read.
    pub fn peek(&self, addr: u64) -> Option<u64> {
        self.word_index(addr).map(|i| self.words[i])
    }

    /// Address of beat `beat` of a burst.
    fn beat_addr(&self, req: &AddrPayload, beat: u32) -> u64 {
        let bytes = self.cfg.bytes_per_beat();
        match req.burst {
            Burst::Fixed => req.addr,
            Burst::Incr => req.addr + bytes * beat as u64,
            Burst::Wrap => {
                let span = bytes * req.beats() as u64;
                let base = req.addr - req.addr % span;
                base + (req.addr - base + bytes * beat as u64) % span
            }
        }
    }

    fn next_read(&mut self) -> Option<AddrPayload> {
        if self.reverse_reads {
            if self.ar_arrived {
                return None;
            }
            self.rd_addr.pop_back()
        } else {
            self.rd_addr.pop_front()
        }
    }

    fn tick_read(&mut self, chans: &mut ChannelArena) {
        if let Some(beat) = self.rd_resp.front().copied() {
            if chans.try_push(self.port.rd.r, beat).is_ok() {
                self.rd_resp.incr_head();
            }
        }

        if !self.rd_resp.is_full() {
            if self.rd_current.is_none() {
                self.rd_current = self.next_read();
                self.rd_beat = 0;
            }
            if let Some(req) = self.rd_current {
                let addr = self.beat_addr(&req, self.rd_beat);
                let (data, resp) = match self.word_index(addr) {
                    Some(i) => (self.words[i], Resp::Okay),
                    None => {
                        self.stats.decode_errors += 1;
                        (0, Resp::DecErr)
                    }
                };
                let last = self.rd_beat == req.len;
                self.rd_resp.push(ReadPayload {
                    id: req.id,
                    data,
                    resp,
                    last: last || !self.cfg.use_last,
                    ruser: 0,
                });
                self.stats.read_beats += 1;
                log::trace!("{}: R id {} beat {} addr {:#x} {}", self.name, req.id, self.rd_beat, addr, resp);
                if last {
                    self.rd_current = None;
                } else {
                    self.rd_beat += 1;
                }
            }
        }

        self.ar_arrived = false;
        if self.rd_addr.len() < ADDR_QUEUE_DEPTH {
            if let Some(ar) = chans.try_pop(self.port.rd.ar) {
                assert!(ar.len <= self.cfg.max_len(), "{}: AR len {} beyond maximum", self.name, ar.len);
                self.rd_addr.push_back(ar);
                self.ar_arrived = true;
            }
        }
    }

    fn tick_write(&mut self, chans: &mut ChannelArena) {
        if let Some(b) = self.wr_resp.front().copied() {
            if chans.try_push(self.port.wr.b, b).is_ok() {
                self.wr_resp.incr_head();
            }
        }

        if !self.wr_resp.is_full() {
            if let Some(req) = self.wr_addr.front().copied() {
                if let Some(w) = chans.try_pop(self.port.wr.w) {
                    let addr = self.beat_addr(&req, self.wr_beat);
                    match self.word_index(addr) {
                        Some(i) => {
                            let strobe = if self.cfg.use_write_strobes { w.wstrb } else { u64::MAX };
                            self.words[i] = merge_bytes(self.words[i], w.data, strobe, self.cfg.bytes_per_beat());
                        }
                        None => {
                            self.stats.decode_errors += 1;
                            self.wr_error = true;
                        }
                    }
                    self.stats.write_beats += 1;
                    let expect_last = self.wr_beat == req.len;
                    if self.cfg.use_last {
                        assert_eq!(
                            w.last, expect_last,
                            "{}: W.last is {} on beat {} of a {}-beat burst",
                            self.name,
                            w.last,
                            self.wr_beat,
                            req.beats()
                        );
                    }
                    if expect_last {
                        self.wr_addr.incr_head();
                        self.wr_beat = 0;
                        if self.cfg.use_write_responses {
                            let resp = if self.wr_error { Resp::DecErr } else { Resp::Okay };
                            self.wr_resp.push(WRespPayload { id: req.id, resp, buser: 0 });
                        }
                        self.wr_error = false;
                    } else {
                        self.wr_beat += 1;
                    }
                }
            }
        }

        if !self.wr_addr.is_full() {
            if let Some(aw) = chans.try_pop(self.port.wr.aw) {
                assert!(aw.len <= self.cfg.max_len(), "{}: AW len {} beyond maximum", self.name, aw.len);
                self.wr_addr.push(aw);
            }
        }
    }
}

/// Replace the bytes of `old` selected by `strobe`.
fn merge_bytes(old: u64, new: u64, strobe: u64, bytes: u64) -> u64 {
    let mut out = old;
    for b in 0..bytes.min(8) {
        if (strobe >> b) & 1 == 1 {
            let m = 0xFFu64 << (b * 8);
            out = (out & !m) | (new & m);
        }
    }
    out
}

impl Process for AxiSubordinateMem {
    fn tick(&mut self, chans: &mut ChannelArena) {
        self.tick_read(chans);
        self.tick_write(chans);
    }

    fn reset(&mut self) {
        self.rd_addr.clear();
        self.rd_current = None;
        self.rd_beat = 0;
        self.rd_resp.reset();
        self.ar_arrived = false;
        self.wr_addr.reset();
        self.wr_beat = 0;
        self.wr_error = false;
        self.wr_resp.reset();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axi::payload::WritePayload;
    use crate::sim::ChannelPolicy;

    fn setup(cfg: AxiConfig) -> (ChannelArena, AxiPort, AxiSubordinateMem) {
        let mut arena = ChannelArena::new();
        let port = AxiPort::alloc(&mut arena, "mem", ChannelPolicy::Combinational);
        let mem = AxiSubordinateMem::new("mem", cfg, port, 0x100);
        (arena, port, mem)
    }

    #[test]
    fn test_merge_bytes() {
        assert_eq!(merge_bytes(0x1122_3344, 0xAABB_CCDD, 0b0101, 4), 0x11BB_33DD);
        assert_eq!(merge_bytes(0, 0xFF, 0, 8), 0);
    }

    #[test]
    fn test_incr_burst_read() {
        let (mut arena, port, mut mem) = setup(AxiConfig::standard());
        for i in 0..4 {
            mem.load(0x40 + 8 * i, 100 + i);
        }
        arena.try_push(port.rd.ar, AddrPayload::new(2, 0x40, 3)).unwrap();
        let mut beats = Vec::new();
        for _ in 0..8 {
            mem.tick(&mut arena);
            if let Some(r) = arena.try_pop(port.rd.r) {
                beats.push(r);
            }
            arena.commit_all();
        }
        let data: Vec<u64> = beats.iter().map(|b| b.data).collect();
        assert_eq!(data, vec![100, 101, 102, 103]);
        assert!(beats.iter().all(|b| b.id == 2 && b.resp == Resp::Okay));
        assert_eq!(beats.iter().filter(|b| b.last).count(), 1);
        assert!(beats[3].last);
    }

    #[test]
    fn test_write_with_strobe_and_response() {
        let (mut arena, port, mut mem) = setup(AxiConfig::standard());
        mem.load(0x8, 0x1111_1111_1111_1111);
        arena.try_push(port.wr.aw, AddrPayload::new(1, 0x8, 0)).unwrap();
        mem.tick(&mut arena);
        arena.commit_all();
        let w = WritePayload {
            wstrb: 0x0F,
            ..WritePayload::new(0xAAAA_AAAA_2222_2222, true)
        };
        arena.try_push(port.wr.w, w).unwrap();
        mem.tick(&mut arena);
        arena.commit_all();
        mem.tick(&mut arena);
        let b = arena.try_pop(port.wr.b).unwrap();
        assert_eq!(b, WRespPayload { id: 1, resp: Resp::Okay, buser: 0 });
        assert_eq!(mem.peek(0x8), Some(0x1111_1111_2222_2222));
    }

    #[test]
    fn test_out_of_range_is_decerr() {
        let (mut arena, port, mut mem) = setup(AxiConfig::standard());
        arena.try_push(port.rd.ar, AddrPayload::new(0, 0x1000, 0)).unwrap();
        for _ in 0..2 {
            mem.tick(&mut arena);
            arena.commit_all();
        }
        mem.tick(&mut arena);
        let r = arena.try_pop(port.rd.r).unwrap();
        assert_eq!(r.resp, Resp::DecErr);
        assert_eq!(mem.stats().decode_errors, 1);
    }

    #[test]
    fn test_reverse_reads_serve_youngest_first() {
        let (mut arena, port, mem) = setup(AxiConfig::standard());
        let mut mem = mem.with_reverse_reads(true);
        for id in 0..3u32 {
            arena.try_push(port.rd.ar, AddrPayload::new(id, 8 * id as u64, 0)).unwrap();
            mem.tick(&mut arena);
            arena.commit_all();
        }
        let mut ids = Vec::new();
        for _ in 0..8 {
            mem.tick(&mut arena);
            if let Some(r) = arena.try_pop(port.rd.r) {
                ids.push(r.id);
            }
            arena.commit_all();
        }
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    #[should_panic(expected = "W.last")]
    fn test_early_last_panics() {
        let (mut arena, port, mut mem) = setup(AxiConfig::standard());
        arena.try_push(port.wr.aw, AddrPayload::new(0, 0, 1)).unwrap();
        mem.tick(&mut arena);
        arena.commit_all();
        arena.try_push(port.wr.w, WritePayload::new(1, true)).unwrap();
        mem.tick(&mut arena);
    }
}
