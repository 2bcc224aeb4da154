//! ALDL bench tooling
//!
//! Blocking drivers that put the protocol core on a real or simulated bus.
//!
//! # Components
//!
//! - [`transport`]: Byte transport over anything `Read + Write`
//! - [`listener`]: Responder loop (controller side)
//! - [`scan_tool`]: Request/reply client (tester side)
//! - [`programming`]: Chatter-guarded flash entry and kernel upload sequences
//! - [`ecu`]: Simulated controller handlers
//! - [`image`]: Firmware image patching and checksums
//! - [`error`]: Error types

pub mod ecu;
pub mod error;
pub mod image;
pub mod listener;
pub mod programming;
pub mod scan_tool;
pub mod transport;

pub use ecu::BenchEcu;
pub use error::BenchError;
pub use listener::{Listener, ListenerStats, Poll};
pub use scan_tool::{ScanTool, Unlock};
pub use transport::ByteTransport;
