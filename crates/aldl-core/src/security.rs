//! Seed/key security handshake.
//!
//! Flash entry (mode 5) and upload/execute (mode 6) are gated behind a
//! challenge-response exchange carried in mode 13.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐ seed request ┌────────────┐  key matches  ┌──────────┐
//! │ Locked │─────────────>│ SeedIssued │──────────────>│ Unlocked │
//! └────────┘              └────────────┘               └──────────┘
//!     ↑                        │ key rejected               │
//!     └────────────────────────┘                            │
//!     ↑          privileged request / reset / idle          │
//!     └─────────────────────────────────────────────────────┘
//! ```
//!
//! An unlock authorizes exactly one privileged request; the next one needs a
//! fresh exchange.
//!
//! # Key Derivation
//!
//! `seed = seedLo * 256 + seedHi` (the bytes are deliberately swapped relative
//! to the order they are sent in), `key = (magic - seed) mod 65536`.
//!
//! # Retry Limit
//!
//! The observed protocol has no lockout. Sessions here count consecutive
//! rejections and refuse new seeds for a cooldown once the limit is reached.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::env::Environment;

/// Magic constant of the stock `$060A` key algorithm (0x934D).
pub const SECURITY_MAGIC: u16 = 37709;

/// Compute the key for a seed with the stock magic.
pub fn compute_key(seed_hi: u8, seed_lo: u8) -> u16 {
    compute_key_with(SECURITY_MAGIC, seed_hi, seed_lo)
}

/// Compute the key for a seed with an arbitrary magic.
pub fn compute_key_with(magic: u16, seed_hi: u8, seed_lo: u8) -> u16 {
    Seed { hi: seed_hi, lo: seed_lo }.expected_key(magic)
}

/// Challenge issued by the controller, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    /// First seed byte on the wire
    pub hi: u8,
    /// Second seed byte on the wire
    pub lo: u8,
}

impl Seed {
    /// Seed reported when the session is already unlocked.
    pub const UNLOCKED: Self = Self { hi: 0, lo: 0 };

    /// Numeric seed: `lo * 256 + hi`.
    pub fn value(self) -> u16 {
        u16::from_le_bytes([self.hi, self.lo])
    }

    /// Key the tester must answer with.
    pub fn expected_key(self, magic: u16) -> u16 {
        magic.wrapping_sub(self.value())
    }
}

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    /// No seed outstanding, privileged modes refused
    Locked,
    /// Seed sent, waiting for the key
    SeedIssued,
    /// Key accepted, one privileged request allowed
    Unlocked,
}

/// Security parameters.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Key algorithm constant
    pub magic: u16,
    /// Consecutive rejections before the cooldown starts (0 disables it)
    pub max_failed_attempts: u32,
    /// How long seed requests are refused after too many rejections
    pub lockout: Duration,
    /// Session falls back to `Locked` after this long without traffic
    pub idle_timeout: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            magic: SECURITY_MAGIC,
            max_failed_attempts: 3,
            lockout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a handshake step, mapped onto reply frames by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOutcome {
    /// New seed issued
    SeedIssued(Seed),
    /// Seed requested while already unlocked
    AlreadyUnlocked,
    /// Key matched
    Accepted,
    /// Key didn't match, or no seed was outstanding
    Rejected,
    /// Too many rejections; seeds refused for `remaining`
    LockedOut {
        /// Time left in the cooldown
        remaining: Duration,
    },
}

/// Per-connection security state.
///
/// Created `Locked` at connection start and never persisted: a new
/// connection always starts a new session.
#[derive(Debug, Clone)]
pub struct SecuritySession {
    state: SecurityState,
    seed: Option<Seed>,
    config: SecurityConfig,
    failed_attempts: u32,
    lockout_until: Option<Instant>,
    last_activity: Instant,
}

impl SecuritySession {
    /// Create a locked session.
    pub fn new(now: Instant, config: SecurityConfig) -> Self {
        Self {
            state: SecurityState::Locked,
            seed: None,
            config,
            failed_attempts: 0,
            lockout_until: None,
            last_activity: now,
        }
    }

    /// Current state.
    pub fn state(&self) -> SecurityState {
        self.state
    }

    /// Outstanding seed, if any.
    pub fn seed(&self) -> Option<Seed> {
        self.seed
    }

    /// Consecutive rejections since the last success or cooldown.
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Configuration in use.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Whether a privileged request would be allowed right now.
    pub fn is_unlocked(&self) -> bool {
        self.state == SecurityState::Unlocked
    }

    /// Handle a seed request.
    ///
    /// Issues a fresh random seed (never `0x0000`, which means "already
    /// unlocked") and moves to `SeedIssued`. A second request while a seed is
    /// outstanding replaces it.
    pub fn request_seed(&mut self, env: &impl Environment) -> SecurityOutcome {
        let now = env.now();
        self.last_activity = now;

        if let Some(remaining) = self.lockout_remaining(now) {
            warn!(?remaining, "seed request refused during cooldown");
            return SecurityOutcome::LockedOut { remaining };
        }

        if self.state == SecurityState::Unlocked {
            return SecurityOutcome::AlreadyUnlocked;
        }

        let mut bytes = [0u8; 2];
        env.random_bytes(&mut bytes);
        if bytes == [0, 0] {
            bytes[1] = 1;
        }
        let seed = Seed { hi: bytes[0], lo: bytes[1] };

        self.state = SecurityState::SeedIssued;
        self.seed = Some(seed);
        debug!(seed = seed.value(), "seed issued");

        SecurityOutcome::SeedIssued(seed)
    }

    /// Handle a key submission.
    ///
    /// The key must match exactly. Any mismatch, or a key with no seed
    /// outstanding, drops the session back to `Locked`.
    pub fn submit_key(&mut self, key: u16, now: Instant) -> SecurityOutcome {
        self.last_activity = now;

        match (self.state, self.seed) {
            (SecurityState::SeedIssued, Some(seed)) if seed.expected_key(self.config.magic) == key => {
                self.state = SecurityState::Unlocked;
                self.seed = None;
                self.failed_attempts = 0;
                info!("security unlocked");
                SecurityOutcome::Accepted
            },
            (state, _) => {
                debug!(?state, key, "key rejected");
                self.record_failure(now);
                SecurityOutcome::Rejected
            },
        }
    }

    /// Consume the unlock for one privileged request.
    ///
    /// Returns `true` (and relocks) if the session was unlocked.
    pub fn take_grant(&mut self, now: Instant) -> bool {
        self.last_activity = now;
        if self.state != SecurityState::Unlocked {
            return false;
        }
        self.state = SecurityState::Locked;
        true
    }

    /// Record bus activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Return to `Locked` (bus reset or disconnect).
    ///
    /// The rejection counter and any cooldown survive a bus reset.
    pub fn reset(&mut self) {
        if self.state != SecurityState::Locked {
            debug!(state = ?self.state, "security session reset");
        }
        self.state = SecurityState::Locked;
        self.seed = None;
    }

    /// Time since the last activity, if it exceeds the idle timeout while
    /// the session holds a seed or an unlock.
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        if self.state == SecurityState::Locked {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_activity);
        (elapsed > self.config.idle_timeout).then_some(elapsed)
    }

    /// Apply the idle timeout. Returns `true` if the session was reset.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.check_timeout(now) {
            Some(elapsed) => {
                info!(?elapsed, "security session idle, relocking");
                self.reset();
                true
            },
            None => false,
        }
    }

    fn lockout_remaining(&mut self, now: Instant) -> Option<Duration> {
        let until = self.lockout_until?;
        if now >= until {
            self.lockout_until = None;
            return None;
        }
        Some(until - now)
    }

    fn record_failure(&mut self, now: Instant) {
        self.state = SecurityState::Locked;
        self.seed = None;
        self.failed_attempts += 1;

        let limit = self.config.max_failed_attempts;
        if limit > 0 && self.failed_attempts >= limit {
            warn!(attempts = self.failed_attempts, lockout = ?self.config.lockout, "security cooldown started");
            self.lockout_until = Some(now + self.config.lockout);
            self.failed_attempts = 0;
        }
    }
}
