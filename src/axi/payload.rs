//! AXI4 channel payloads and their wire encodings.
//!
//! Field order on the wire, lowest bits first:
//!
//! | payload        | fields                                         |
//! |----------------|------------------------------------------------|
//! | `AddrPayload`  | id, addr, len, size, burst, cache, auser       |
//! | `ReadPayload`  | id, data, resp, last, ruser                    |
//! | `WritePayload` | data, last, wstrb, wuser                       |
//! | `WRespPayload` | id, resp, buser                                |
//!
//! Widths come from the [`AxiConfig`]; zero-width fields are skipped. An
//! elided `last` reads back as set, so every beat of a configuration
//! without `last` is a complete transfer. An elided `burst` reads back as
//! INCR and an elided `wstrb` as all lanes enabled.

use std::fmt;

use super::config::AxiConfig;
use crate::bits::{mask, BitsError, Marshallable, Marshaller, Unmarshaller};

/// Response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resp {
    #[default]
    Okay = 0,
    ExOkay = 1,
    SlvErr = 2,
    DecErr = 3,
}

impl Resp {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(raw: u8) -> Self {
        match raw & 0b11 {
            0 => Resp::Okay,
            1 => Resp::ExOkay,
            2 => Resp::SlvErr,
            _ => Resp::DecErr,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(self, Resp::SlvErr | Resp::DecErr)
    }
}

impl fmt::Display for Resp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resp::Okay => "OKAY",
            Resp::ExOkay => "EXOKAY",
            Resp::SlvErr => "SLVERR",
            Resp::DecErr => "DECERR",
        };
        f.write_str(s)
    }
}

/// Burst type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Burst {
    Fixed = 0,
    #[default]
    Incr = 1,
    Wrap = 2,
}

impl Burst {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(raw: u8) -> Self {
        match raw & 0b11 {
            0 => Burst::Fixed,
            2 => Burst::Wrap,
            _ => Burst::Incr,
        }
    }
}

/// AR / AW payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrPayload {
    pub id: u32,
    pub addr: u64,
    /// Beats minus one.
    pub len: u32,
    /// log2 of bytes per beat.
    pub size: u8,
    pub burst: Burst,
    pub cache: u8,
    pub auser: u64,
}

impl AddrPayload {
    pub fn new(id: u32, addr: u64, len: u32) -> Self {
        Self {
            id,
            addr,
            len,
            ..Self::default()
        }
    }

    /// Beats in this burst.
    pub fn beats(&self) -> u32 {
        self.len + 1
    }
}

/// R payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadPayload {
    pub id: u32,
    pub data: u64,
    pub resp: Resp,
    pub last: bool,
    pub ruser: u64,
}

/// W payload. Carries no id: beats follow AW order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePayload {
    pub data: u64,
    pub last: bool,
    pub wstrb: u64,
    pub wuser: u64,
}

impl Default for WritePayload {
    fn default() -> Self {
        Self {
            data: 0,
            last: false,
            wstrb: u64::MAX,
            wuser: 0,
        }
    }
}

impl WritePayload {
    pub fn new(data: u64, last: bool) -> Self {
        Self {
            data,
            last,
            ..Self::default()
        }
    }
}

/// B payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WRespPayload {
    pub id: u32,
    pub resp: Resp,
    pub buser: u64,
}

impl Marshallable for AddrPayload {
    type Layout = AxiConfig;

    fn width(c: &AxiConfig) -> u32 {
        c.id_width + c.addr_width + c.alen_width() + c.asize_width() + c.burst_width() + c.cache_width() + c.a_user_width
    }

    fn marshal(&self, c: &AxiConfig, m: &mut Marshaller) {
        m.put(self.id as u128, c.id_width)
            .put(self.addr as u128, c.addr_width)
            .put(self.len as u128, c.alen_width())
            .put(self.size as u128, c.asize_width())
            .put(self.burst.bits() as u128, c.burst_width())
            .put(self.cache as u128, c.cache_width())
            .put(self.auser as u128, c.a_user_width);
    }

    fn unmarshal(c: &AxiConfig, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        let id = u.take(c.id_width)? as u32;
        let addr = u.take(c.addr_width)? as u64;
        let len = u.take(c.alen_width())? as u32;
        let size = u.take(c.asize_width())? as u8;
        let burst = if c.burst_width() > 0 {
            Burst::from_bits(u.take(c.burst_width())? as u8)
        } else {
            Burst::Incr
        };
        Ok(Self {
            id,
            addr,
            len,
            size,
            burst,
            cache: u.take(c.cache_width())? as u8,
            auser: u.take(c.a_user_width)? as u64,
        })
    }
}

impl Marshallable for ReadPayload {
    type Layout = AxiConfig;

    fn width(c: &AxiConfig) -> u32 {
        c.id_width + c.data_width + c.resp_width() + c.last_width() + c.r_user_width
    }

    fn marshal(&self, c: &AxiConfig, m: &mut Marshaller) {
        m.put(self.id as u128, c.id_width)
            .put(self.data as u128, c.data_width)
            .put(self.resp.bits() as u128, c.resp_width())
            .put(self.last as u128, c.last_width())
            .put(self.ruser as u128, c.r_user_width);
    }

    fn unmarshal(c: &AxiConfig, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        let id = u.take(c.id_width)? as u32;
        let data = u.take(c.data_width)? as u64;
        let resp = Resp::from_bits(u.take(c.resp_width())? as u8);
        let last = if c.use_last { u.take_bool()? } else { true };
        Ok(Self {
            id,
            data,
            resp,
            last,
            ruser: u.take(c.r_user_width)? as u64,
        })
    }
}

impl Marshallable for WritePayload {
    type Layout = AxiConfig;

    fn width(c: &AxiConfig) -> u32 {
        c.data_width + c.last_width() + c.wstrb_width() + c.w_user_width
    }

    fn marshal(&self, c: &AxiConfig, m: &mut Marshaller) {
        m.put(self.data as u128, c.data_width)
            .put(self.last as u128, c.last_width())
            .put(self.wstrb as u128, c.wstrb_width())
            .put(self.wuser as u128, c.w_user_width);
    }

    fn unmarshal(c: &AxiConfig, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        let data = u.take(c.data_width)? as u64;
        let last = if c.use_last { u.take_bool()? } else { true };
        let wstrb = if c.use_write_strobes {
            u.take(c.wstrb_width())? as u64
        } else {
            mask(64) as u64
        };
        Ok(Self {
            data,
            last,
            wstrb,
            wuser: u.take(c.w_user_width)? as u64,
        })
    }
}

impl Marshallable for WRespPayload {
    type Layout = AxiConfig;

    fn width(c: &AxiConfig) -> u32 {
        c.bid_width() + c.resp_width() + c.buser_width()
    }

    fn marshal(&self, c: &AxiConfig, m: &mut Marshaller) {
        m.put(self.id as u128, c.bid_width())
            .put(self.resp.bits() as u128, c.resp_width())
            .put(self.buser as u128, c.buser_width());
    }

    fn unmarshal(c: &AxiConfig, u: &mut Unmarshaller<'_>) -> Result<Self, BitsError> {
        Ok(Self {
            id: u.take(c.bid_width())? as u32,
            resp: Resp::from_bits(u.take(c.resp_width())? as u8),
            buser: u.take(c.buser_width())? as u64,
        })
    }
}
