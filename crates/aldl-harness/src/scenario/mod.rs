//! Scenario testing.
//!
//! A scenario is a scripted conversation between a scan tool and a simulated
//! controller, followed by a mandatory oracle that checks the final
//! [`World`].
//!
//! ```ignore
//! Scenario::new("upload after unlock")
//!     .unlock()
//!     .send(upload_request)
//!     .oracle(Box::new(|world| {
//!         if world.ecu().uploads.len() == 1 { Ok(()) } else { Err("no upload".into()) }
//!     }))
//!     .run()?;
//! ```

mod builder;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use world::{Exchange, RecordingEcu, World};

/// Final-state check run after every scenario.
pub type OracleFn = Box<dyn Fn(&World) -> Result<(), String>>;
