//! Storage primitives: FIFOs and banked memory.

pub mod banked;
pub mod fifo;

pub use banked::BankedMemory;
pub use fifo::{BankedFifo, Fifo};
