//! Packets, flits and source routes.
//!
//! # Flit format
//!
//! ```text
//!   | flit_id (2) | packet_id (P) | data (D) |      fields LSB-first: data, packet_id, flit_id
//! ```
//!
//! A packet travels as a HEAD flit, zero or more BODY flits and a TAIL flit,
//! or as one SNGL flit when it fits. The HEAD carries the route in the low
//! `dest_width` bits of its data, with the first slice of payload above it.
//!
//! # Source routes
//!
//! The route is a sequence of per-hop fields, hop 0 in the lowest bits:
//!
//! ```text
//!   hop field = | remote code (log2 R) | local bitmap (L) |
//! ```
//!
//! A router consumes its own field and shifts the rest down. The remote
//! code is honoured only while later hops remain; the last hop delivers to
//! the local bitmap.

use std::collections::VecDeque;

use crate::bits::{index_width, mask, BitsError, Marshallable, Marshaller, Unmarshaller};
use crate::sim::{ChanId, ChannelArena, Process};

/// Position of a flit within its packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlitId {
    #[default]
    Body = 0,
    Head = 1,
    Tail = 2,
    Single = 3,
}

impl FlitId {
    /// 2-bit wire encoding.
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(raw: u8) -> Self {
        match raw & 0b11 {
            0 => FlitId::Body,
            1 => FlitId::Head,
            2 => FlitId::Tail,
            _ => FlitId::Single,
        }
    }

    /// Starts a packet (HEAD or SNGL).
    pub fn is_header(self) -> bool {
        self.bits() & 0b01 != 0
    }

    /// Ends a packet (TAIL or SNGL).
    pub fn is_tail(self) -> bool {
        self.bits() & 0b10 != 0
    }

    pub fn is_body(self) -> bool {
        self == FlitId::Body
    }

    pub fn is_single(self) -> bool {
        self == FlitId::Single
    }
}

/// One flit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flit {
    pub data: u64,
    pub packet_id: u32,
    pub flit_id: FlitId,
}

impl Flit {
    pub fn new(flit_id: FlitId, data: u64) -> Self {
        Self {
            data,
            packet_id: 0,
            flit_id,
        }
    }

    pub fn with_packet_id(mut self, packet_id: u32) -> Self {
        self.packet_id = packet_id;
        self
    }

    pub fn head(data: u64) -> Self {
        Self::new(FlitId::Head, data)
    }

    pub fn body(data: u64) -> Self {
        Self::new(FlitId::Body, data)
    }

    pub fn tail(data: u64) -> Self {
        Self::new(FlitId::Tail, data)
    }

    pub fn single(data: u64) -> Self {
        Self::new(FlitId::Single, data)
    }
}

/// Field widths of a flit on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlitLayout {
    pub data_width: u32,
    pub packet_id_width: u32,
}

impl Marshallable for Flit {
    type Layout = FlitLayout;

    fn width(l: &FlitLayout) -> u32 {
        l.data_width + l.packet_id_width + 2
    }

    fn marshal(&self, l: &FlitLayout, m: &mut Marshaller) {
        m.put(self.data as u128, l.data_width)
            .put(self.packet_id as u128, l.packet_id_width)
            .put(self.flit_id.bits() as u128, 2);
    }

    fn unmarshal(l: &FlitLayout, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        Ok(Self {
            data: u.take(l.data_width)? as u64,
            packet_id: u.take(l.packet_id_width)? as u32,
            flit_id: FlitId::from_bits(u.take(2)? as u8),
        })
    }
}

/// A packet before serialization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    pub data: u128,
    /// Concatenated per-hop route fields.
    pub dest: u64,
    pub packet_id: u32,
}

/// Geometry shared by [`Packetizer`] and [`Depacketizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFormat {
    /// Payload bits per packet.
    pub data_width: u32,
    /// Route bits carried in the HEAD flit.
    pub dest_width: u32,
    /// Data bits per flit.
    pub flit_width: u32,
}

impl PacketFormat {
    pub fn new(data_width: u32, dest_width: u32, flit_width: u32) -> Self {
        assert!(flit_width <= 64, "flit data width {} exceeds 64", flit_width);
        assert!(data_width <= 128, "packet data width {} exceeds 128", data_width);
        assert!(dest_width <= flit_width, "route does not fit in a flit");
        Self {
            data_width,
            dest_width,
            flit_width,
        }
    }

    /// Payload bits that ride in the HEAD flit.
    pub fn header_data_width(&self) -> u32 {
        self.flit_width - self.dest_width
    }

    /// Flits needed for one packet, HEAD included.
    pub fn flits_per_packet(&self) -> usize {
        let hdr = self.header_data_width();
        if self.data_width <= hdr {
            1
        } else {
            let rest = self.data_width - hdr;
            1 + rest.div_ceil(self.flit_width) as usize
        }
    }

    /// Split `p` into flits.
    pub fn packetize(&self, p: &Packet) -> Vec<Flit> {
        let hdr = self.header_data_width();
        let payload = p.data & crate::bits::mask(self.data_width);
        let head_data = (p.dest & mask(self.dest_width) as u64)
            | (((payload & mask(hdr)) as u64) << self.dest_width.min(63));
        let n = self.flits_per_packet();
        if n == 1 {
            return vec![Flit::single(head_data).with_packet_id(p.packet_id)];
        }
        let mut flits = Vec::with_capacity(n);
        flits.push(Flit::head(head_data).with_packet_id(p.packet_id));
        for k in 1..n {
            let offset = hdr + (k as u32 - 1) * self.flit_width;
            let chunk = ((payload >> offset) & mask(self.flit_width)) as u64;
            let id = if k == n - 1 { FlitId::Tail } else { FlitId::Body };
            flits.push(Flit::new(id, chunk).with_packet_id(p.packet_id));
        }
        flits
    }
}

/// Process turning packets into a flit stream, one flit per cycle.
#[derive(Debug)]
pub struct Packetizer {
    name: String,
    format: PacketFormat,
    input: ChanId<Packet>,
    output: ChanId<Flit>,
    pending: VecDeque<Flit>,
}

impl Packetizer {
    pub fn new(name: impl Into<String>, format: PacketFormat, input: ChanId<Packet>, output: ChanId<Flit>) -> Self {
        Self {
            name: name.into(),
            format,
            input,
            output,
            pending: VecDeque::new(),
        }
    }
}

impl Process for Packetizer {
    fn tick(&mut self, chans: &mut ChannelArena) {
        if self.pending.is_empty() {
            if let Some(p) = chans.try_pop(self.input) {
                self.pending.extend(self.format.packetize(&p));
            }
        }
        if let Some(&flit) = self.pending.front() {
            if chans.try_push(self.output, flit).is_ok() {
                self.pending.pop_front();
            }
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
struct Partial {
    packet_id: u32,
    dest: u64,
    data: u128,
    bits: u32,
}

/// Reassembles flits into packets.
///
/// Packets with different packet ids may interleave; flits of one packet
/// must arrive in order. As a process it reads flits from `input` and
/// writes packets to `output`.
#[derive(Debug)]
pub struct Depacketizer {
    name: String,
    format: PacketFormat,
    capacity: usize,
    partial: Vec<Partial>,
    ports: Option<(ChanId<Flit>, ChanId<Packet>)>,
    done: VecDeque<Packet>,
}

impl Depacketizer {
    /// Reassembler holding at most `capacity` packets in progress.
    pub fn new(format: PacketFormat, capacity: usize) -> Self {
        Self {
            name: "depacketizer".to_string(),
            format,
            capacity,
            partial: Vec::new(),
            ports: None,
            done: VecDeque::new(),
        }
    }

    /// Bind to channels for use as a process.
    pub fn bind(mut self, name: impl Into<String>, input: ChanId<Flit>, output: ChanId<Packet>) -> Self {
        self.name = name.into();
        self.ports = Some((input, output));
        self
    }

    /// Packets currently being assembled.
    pub fn in_progress(&self) -> usize {
        self.partial.len()
    }

    /// Feed one flit; returns the packet it completes, if any.
    pub fn accept(&mut self, flit: Flit) -> Option<Packet> {
        let fmt = self.format;
        let hdr = fmt.header_data_width();
        if flit.flit_id.is_header() {
            assert!(
                self.partial.iter().all(|p| p.packet_id != flit.packet_id),
                "depacketizer: HEAD for packet {} while one is in progress",
                flit.packet_id
            );
            let part = Partial {
                packet_id: flit.packet_id,
                dest: flit.data & mask(fmt.dest_width) as u64,
                data: (flit.data >> fmt.dest_width.min(63)) as u128 & mask(hdr),
                bits: hdr,
            };
            if flit.flit_id.is_tail() {
                return Some(Self::finish(part, fmt));
            }
            assert!(self.partial.len() < self.capacity, "depacketizer: too many packets in progress");
            self.partial.push(part);
            return None;
        }

        let pos = self
            .partial
            .iter()
            .position(|p| p.packet_id == flit.packet_id)
            .unwrap_or_else(|| panic!("depacketizer: {:?} flit for packet {} without HEAD", flit.flit_id, flit.packet_id));
        let part = &mut self.partial[pos];
        if part.bits < 128 {
            part.data |= ((flit.data as u128) & mask(fmt.flit_width)) << part.bits;
        }
        part.bits += fmt.flit_width;
        if flit.flit_id.is_tail() {
            let part = self.partial.remove(pos);
            Some(Self::finish(part, fmt))
        } else {
            None
        }
    }

    fn finish(part: Partial, fmt: PacketFormat) -> Packet {
        Packet {
            data: part.data & mask(fmt.data_width),
            dest: part.dest,
            packet_id: part.packet_id,
        }
    }
}

impl Process for Depacketizer {
    fn tick(&mut self, chans: &mut ChannelArena) {
        let Some((input, output)) = self.ports else {
            return;
        };
        if self.done.is_empty() {
            if let Some(flit) = chans.try_pop(input) {
                if let Some(p) = self.accept(flit) {
                    self.done.push_back(p);
                }
            }
        }
        if let Some(p) = self.done.front() {
            if chans.try_push(output, p.clone()).is_ok() {
                self.done.pop_front();
            }
        }
    }

    fn reset(&mut self) {
        self.partial.clear();
        self.done.clear();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// One hop of a source route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hop {
    /// Remote port index (0-based among remote ports) to leave through.
    pub remote: Option<usize>,
    /// Local ports to deliver to at this hop.
    pub local: u64,
}

impl Hop {
    pub fn remote(port: usize) -> Self {
        Self {
            remote: Some(port),
            local: 0,
        }
    }

    pub fn local(bitmap: u64) -> Self {
        Self { remote: None, local: bitmap }
    }

    /// Deliver locally and forward remotely in the same hop.
    pub fn multicast(port: usize, bitmap: u64) -> Self {
        Self {
            remote: Some(port),
            local: bitmap,
        }
    }
}

/// Encoder for source-route destination fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRoute {
    num_lports: usize,
    num_rports: usize,
}

impl SourceRoute {
    pub fn new(num_lports: usize, num_rports: usize) -> Self {
        Self { num_lports, num_rports }
    }

    /// Bits per hop field.
    pub fn dest_width_per_hop(&self) -> u32 {
        index_width(self.num_rports) + self.num_lports as u32
    }

    /// Encode a route. The last hop should be local-only.
    pub fn encode(&self, hops: &[Hop]) -> u64 {
        let w = self.dest_width_per_hop();
        assert!(w as usize * hops.len() <= 64, "route of {} hops does not fit in 64 bits", hops.len());
        let mut dest = 0u64;
        for (i, hop) in hops.iter().enumerate() {
            assert!(hop.local >> self.num_lports == 0, "local bitmap {:#b} too wide", hop.local);
            let code = match hop.remote {
                Some(r) => {
                    assert!(r < self.num_rports, "remote port {} out of range", r);
                    r as u64
                }
                None => 0,
            };
            let field = (code << self.num_lports) | hop.local;
            dest |= field << (i as u32 * w);
        }
        dest
    }

    /// Decode the first hop: `(remote_code, local_bitmap, rest)`.
    pub fn decode_hop(&self, dest: u64) -> (usize, u64, u64) {
        let w = self.dest_width_per_hop();
        let field = dest & mask(w) as u64;
        let local = field & mask(self.num_lports as u32) as u64;
        let remote = (field >> self.num_lports) as usize;
        (remote, local, dest >> w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flit_id_encoding() {
        assert_eq!(FlitId::Body.bits(), 0);
        assert_eq!(FlitId::Head.bits(), 1);
        assert_eq!(FlitId::Tail.bits(), 2);
        assert_eq!(FlitId::Single.bits(), 3);
        assert!(FlitId::Single.is_header() && FlitId::Single.is_tail());
        assert!(FlitId::Head.is_header() && !FlitId::Head.is_tail());
        assert!(!FlitId::Tail.is_header() && FlitId::Tail.is_tail());
        assert_eq!(FlitId::from_bits(2), FlitId::Tail);
    }

    #[test]
    fn test_flit_marshal_layout() {
        let layout = FlitLayout {
            data_width: 8,
            packet_id_width: 2,
        };
        let f = Flit::tail(0xAB).with_packet_id(1);
        let bits = f.to_bits(&layout);
        assert_eq!(bits.len(), 12);
        assert_eq!(crate::bits::to_u128(&bits), 0xAB | (1 << 8) | (2 << 10));
        assert_eq!(Flit::from_bits(&layout, &bits).unwrap(), f);
    }

    #[test]
    fn test_packetize_head_body_tail() {
        let fmt = PacketFormat::new(64, 8, 32);
        let p = Packet {
            data: 0xcafe_f00d_dead_beef,
            dest: 0x0C,
            packet_id: 0,
        };
        let flits = fmt.packetize(&p);
        assert_eq!(fmt.flits_per_packet(), 3);
        assert_eq!(flits[0].flit_id, FlitId::Head);
        assert_eq!(flits[0].data & 0xFF, 0x0C);
        assert_eq!(flits[0].data >> 8, 0xad_beef);
        assert_eq!(flits[1].flit_id, FlitId::Body);
        assert_eq!(flits[2].flit_id, FlitId::Tail);

        let mut d = Depacketizer::new(fmt, 2);
        assert!(d.accept(flits[0]).is_none());
        assert!(d.accept(flits[1]).is_none());
        assert_eq!(d.accept(flits[2]), Some(p));
    }

    #[test]
    fn test_single_flit_packet() {
        let fmt = PacketFormat::new(16, 8, 32);
        let p = Packet {
            data: 0x1234,
            dest: 0x3,
            packet_id: 2,
        };
        let flits = fmt.packetize(&p);
        assert_eq!(flits.len(), 1);
        assert_eq!(flits[0].flit_id, FlitId::Single);
        let mut d = Depacketizer::new(fmt, 1);
        assert_eq!(d.accept(flits[0]), Some(p));
    }

    #[test]
    fn test_interleaved_packets_reassemble() {
        let fmt = PacketFormat::new(40, 4, 16);
        let a = Packet { data: 0xAA_1111_2222, dest: 1, packet_id: 0 };
        let b = Packet { data: 0xBB_3333_4444, dest: 2, packet_id: 1 };
        let fa = fmt.packetize(&a);
        let fb = fmt.packetize(&b);
        let mut d = Depacketizer::new(fmt, 2);
        let mut out = Vec::new();
        for (x, y) in fa.iter().zip(&fb) {
            out.extend(d.accept(*x));
            out.extend(d.accept(*y));
        }
        assert_eq!(out, vec![a, b]);
        assert_eq!(d.in_progress(), 0);
    }

    #[test]
    #[should_panic(expected = "without HEAD")]
    fn test_body_without_head_panics() {
        let mut d = Depacketizer::new(PacketFormat::new(32, 4, 16), 1);
        d.accept(Flit::body(1));
    }

    #[test]
    fn test_source_route_encoding() {
        let sr = SourceRoute::new(1, 4);
        assert_eq!(sr.dest_width_per_hop(), 3);
        // Leave through remote port 2, then deliver to local port 0.
        let dest = sr.encode(&[Hop::remote(2), Hop::local(1)]);
        assert_eq!(dest, 0xC);
        assert_eq!(sr.decode_hop(dest), (2, 0, 1));
        assert_eq!(sr.encode(&[Hop::multicast(3, 1), Hop::local(1)]), 0b001_111);
    }
}
