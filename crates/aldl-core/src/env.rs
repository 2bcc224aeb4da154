//! Environment abstraction.
//!
//! Protocol state machines never read the clock or an RNG directly. Production
//! code passes [`SystemEnv`]; tests pass a seeded simulation environment so
//! that seeds and timeouts are reproducible.

use std::time::Instant;

use rand::RngCore;

/// Source of time and randomness.
pub trait Environment {
    /// Current time.
    fn now(&self) -> Instant;

    /// Fill `buffer` with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);
}

/// Wall clock and thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::thread_rng().fill_bytes(buffer);
    }
}
