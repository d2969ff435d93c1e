//! AXI4 fabric: configuration, payloads, channel bundles and the
//! components that move traffic between managers and subordinates.
//!
//! ```text
//!   client ──► AxiManagerGate ──► AxiArbiter ──► AxiSplitter ──► AxiSubordinateMem
//!                 (ROB)           (N → 1)         (1 → N)          (backing store)
//! ```

pub mod arbiter;
pub mod channel;
pub mod config;
pub mod manager_gate;
pub mod payload;
pub mod splitter;
pub mod subordinate;

pub use arbiter::{AxiArbiter, AxiArbiterStats};
pub use channel::{AxiPort, AxiRead, AxiWrite};
pub use config::{AxiConfig, AxiConfigError};
pub use manager_gate::{AxiManagerGate, GateError, GatePorts, GateStats, RdRequest, RdResp, WrRequest, WrResp};
pub use payload::{AddrPayload, Burst, ReadPayload, Resp, WRespPayload, WritePayload};
pub use splitter::{AddrMap, AddrRange, AxiSplitter, SplitterError, SplitterStats};
pub use subordinate::{AxiSubordinateMem, SubordinateStats};
