//! noc-emu library
//!
//! Cycle-level models of on-chip interconnect: a banked scratchpad with
//! per-bank arbitration, a wormhole virtual-channel router and an AXI4
//! fabric, all running on a shared channel/process simulation core.

pub mod arb;
pub mod axi;
pub mod bits;
pub mod config;
pub mod mem;
pub mod noc;
pub mod rob;
pub mod scratchpad;
pub mod sim;
pub mod testing;
