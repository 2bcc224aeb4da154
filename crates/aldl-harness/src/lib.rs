//! Deterministic simulation harness for ALDL protocol testing.
//!
//! Seeded implementations of the Environment trait and an in-memory serial
//! bus, plus a scenario runner that drives the dispatcher the way a scan tool
//! would and hands the final state to an oracle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_bus;
pub mod sim_env;

pub use scenario::{RecordingEcu, Scenario, Step, World};
pub use sim_bus::SimBus;
pub use sim_env::SimEnv;
