//! Arbitration and crossbar routing.

pub mod arbiter;
pub mod arbitrated_crossbar;
pub mod crossbar;

pub use arbiter::{all_ones, one_hot_to_bin, Arbiter, ArbiterPolicy};
pub use arbitrated_crossbar::{ArbitratedCrossbar, XbarOutput};
pub use crossbar::{crossbar, crossbar_select};
