//! ALDL protocol core logic
//!
//! Pure protocol logic for talking to (and impersonating) a bank-switched
//! 68HC11 engine controller over the ALDL bus, decoupled from I/O.
//!
//! # Architecture
//!
//! Nothing in this crate touches a serial port. Time and randomness come from
//! an [`Environment`](env::Environment) supplied by the caller, and outside
//! effects (driving an output, running an uploaded kernel) go through the
//! [`ModeHandlers`](dispatch::ModeHandlers) collaborator. The same code runs
//! behind a real serial port and inside deterministic tests.
//!
//! # Components
//!
//! - [`security`]: Seed/key handshake and per-connection session
//! - [`flash`]: Bank-switched flash address translation and patch guard
//! - [`profile`]: Runtime-selectable target profiles
//! - [`dispatch`]: Mode dispatcher
//! - [`mod@env`]: Environment abstraction (time, RNG)
//! - [`error`]: Error types

pub mod dispatch;
pub mod env;
pub mod error;
pub mod flash;
pub mod profile;
pub mod security;

pub use dispatch::{Dispatcher, ModeHandlers, Upload};
pub use env::{Environment, SystemEnv};
pub use error::{DispatchError, FlashError, HandlerError, ProfileError};
pub use flash::{BankId, FlashLayout};
pub use profile::TargetProfile;
pub use security::{SecurityConfig, SecurityOutcome, SecuritySession, SecurityState, compute_key};
