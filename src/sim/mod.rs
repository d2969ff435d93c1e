//! Simulation substrate: channels, buffered endpoints and the cycle engine.

pub mod buffered;
pub mod channel;
pub mod engine;

pub use buffered::{InBuffered, OutBuffered};
pub use channel::{ChanId, Channel, ChannelArena, ChannelPolicy, ChannelPolicyError, ChannelStats};
pub use engine::{ProcId, Process, ResetKind, SimStatus, Simulator};
