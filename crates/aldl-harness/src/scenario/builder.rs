//! Scenario builder API.

use std::time::Duration;

use aldl_core::{TargetProfile, security::compute_key_with};
use aldl_proto::{Frame, requests};

use crate::{
    scenario::{OracleFn, RecordingEcu, World},
    sim_env::SimEnv,
};

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver a frame to the controller
    Send(Frame),
    /// Seed request, computed key, key submission
    Unlock,
    /// Move the clock and apply the idle timeout
    Advance(Duration),
    /// Bus reset
    Reset,
}

/// Scenario builder.
///
/// Must call `.oracle()` to get a [`RunnableScenario`].
pub struct Scenario {
    name: String,
    profile: TargetProfile,
    seed: u64,
    ecu: RecordingEcu,
    steps: Vec<Step>,
}

impl Scenario {
    /// New scenario against the VY V6 profile with seed 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile: TargetProfile::vy_v6(),
            seed: 0,
            ecu: RecordingEcu::default(),
            steps: Vec::new(),
        }
    }

    /// Use another target profile.
    pub fn profile(mut self, profile: TargetProfile) -> Self {
        self.profile = profile;
        self
    }

    /// RNG seed for the controller's security seeds.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Answer mode-1 requests with `payload`.
    pub fn datastream(mut self, payload: Vec<u8>) -> Self {
        self.ecu.datastream = Some(payload);
        self
    }

    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a frame delivery.
    pub fn send(self, frame: Frame) -> Self {
        self.step(Step::Send(frame))
    }

    /// Append a full unlock exchange.
    pub fn unlock(self) -> Self {
        self.step(Step::Unlock)
    }

    /// Append a clock advance.
    pub fn advance(self, by: Duration) -> Self {
        self.step(Step::Advance(by))
    }

    /// Append a bus reset.
    pub fn reset(self) -> Self {
        self.step(Step::Reset)
    }

    /// Set the oracle and return a runnable scenario.
    ///
    /// The oracle is mandatory; a scenario can't run without verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle, ready to execute.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute every step in order, then run the oracle.
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, profile, seed, ecu, steps } = self.scenario;
        let device = profile.device;
        let magic = profile.security.magic;
        let mut world = World::new(profile, SimEnv::with_seed(seed), ecu);

        for (index, step) in steps.into_iter().enumerate() {
            match step {
                Step::Send(frame) => {
                    world.send(frame);
                },
                Step::Unlock => {
                    let seed_reply = world
                        .send(requests::seed_request(device))
                        .ok_or_else(|| format!("Scenario '{name}': step {index}: no seed reply"))?;
                    let &[_, hi, lo] = seed_reply.payload() else {
                        return Err(format!(
                            "Scenario '{name}': step {index}: unexpected seed reply {seed_reply:?}"
                        ));
                    };
                    world.send(requests::key_submission(device, compute_key_with(magic, hi, lo)));
                },
                Step::Advance(by) => world.advance(by),
                Step::Reset => world.reset(),
            }
        }

        (self.oracle)(&world).map_err(|err| format!("Scenario '{name}': oracle failed: {err}"))
    }
}
