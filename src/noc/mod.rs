//! Network-on-chip: flits, packets and the wormhole VC router.

pub mod flit;
pub mod router;

pub use flit::{Depacketizer, Flit, FlitId, FlitLayout, Hop, Packet, PacketFormat, Packetizer, SourceRoute};
pub use router::{Credit, RouterError, RouterParams, RouterPorts, RouterStats, WhvcRouter};
