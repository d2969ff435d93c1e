//! Traffic harness and end-to-end scenarios.
//!
//! The scenarios double as the CLI's self-test:
//!
//! ```bash
//! cargo run -- router splitter
//! ```

pub mod harness;
pub mod scenarios;

pub use harness::{Sink, Source, Tap};
pub use scenarios::{run_scenario, ScenarioError, ScenarioOutcome, SCENARIOS};
