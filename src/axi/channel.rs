//! AXI channel bundles.
//!
//! A manager drives AR, AW and W and receives R and B; a subordinate does
//! the opposite. Both sides share one bundle of handles.

use super::payload::{AddrPayload, ReadPayload, WRespPayload, WritePayload};
use crate::sim::{ChanId, ChannelArena, ChannelPolicy};

/// Read address and read data channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxiRead {
    pub ar: ChanId<AddrPayload>,
    pub r: ChanId<ReadPayload>,
}

/// Write address, write data and write response channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxiWrite {
    pub aw: ChanId<AddrPayload>,
    pub w: ChanId<WritePayload>,
    pub b: ChanId<WRespPayload>,
}

impl AxiRead {
    pub fn alloc(arena: &mut ChannelArena, name: &str, policy: ChannelPolicy) -> Self {
        Self {
            ar: arena.channel(format!("{}.ar", name), policy),
            r: arena.channel(format!("{}.r", name), policy),
        }
    }
}

impl AxiWrite {
    pub fn alloc(arena: &mut ChannelArena, name: &str, policy: ChannelPolicy) -> Self {
        Self {
            aw: arena.channel(format!("{}.aw", name), policy),
            w: arena.channel(format!("{}.w", name), policy),
            b: arena.channel(format!("{}.b", name), policy),
        }
    }
}

/// Full read + write interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxiPort {
    pub rd: AxiRead,
    pub wr: AxiWrite,
}

impl AxiPort {
    pub fn alloc(arena: &mut ChannelArena, name: &str, policy: ChannelPolicy) -> Self {
        Self {
            rd: AxiRead::alloc(arena, name, policy),
            wr: AxiWrite::alloc(arena, name, policy),
        }
    }

    /// `n` interfaces named `name[0]`, `name[1]`, ...
    pub fn alloc_many(arena: &mut ChannelArena, name: &str, n: usize, policy: ChannelPolicy) -> Vec<Self> {
        (0..n).map(|i| Self::alloc(arena, &format!("{}[{}]", name, i), policy)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_names_channels() {
        let mut arena = ChannelArena::new();
        let port = AxiPort::alloc(&mut arena, "m0", ChannelPolicy::Combinational);
        assert_eq!(arena.len(), 5);
        assert_eq!(arena.get(port.rd.ar).name(), "m0.ar");
        assert_eq!(arena.get(port.wr.b).name(), "m0.b");
        let many = AxiPort::alloc_many(&mut arena, "s", 2, ChannelPolicy::Buffered);
        assert_eq!(arena.get(many[1].wr.w).name(), "s[1].w");
    }
}
