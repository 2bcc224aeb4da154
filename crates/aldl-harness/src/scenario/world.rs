//! World state for scenario execution.

use aldl_core::{
    Dispatcher, Environment, HandlerError, ModeHandlers, SecuritySession, TargetProfile, Upload,
};
use aldl_proto::{DiscreteOutputs, Frame, RESPONSE_OK};
use tracing::debug;

use crate::sim_env::SimEnv;

/// Controller stand-in that records everything it's asked to do.
#[derive(Debug, Clone, Default)]
pub struct RecordingEcu {
    /// Current Mode-4 output state
    pub outputs: DiscreteOutputs,
    /// Every control byte received
    pub controls: Vec<u8>,
    /// Number of flash entry requests that reached the handler
    pub flash_entries: usize,
    /// Uploads that reached the handler
    pub uploads: Vec<Upload>,
    /// Mode-1 reply, if the controller should answer data stream requests
    pub datastream: Option<Vec<u8>>,
}

impl ModeHandlers for RecordingEcu {
    fn datastream(&mut self, _request: &[u8]) -> Option<Vec<u8>> {
        self.datastream.clone()
    }

    fn actuator(&mut self, control: u8) -> u8 {
        self.controls.push(control);
        self.outputs = DiscreteOutputs::from_control(control);
        RESPONSE_OK
    }

    fn flash_entry(&mut self, _request: &[u8]) -> Result<Vec<u8>, HandlerError> {
        self.flash_entries += 1;
        Ok(vec![RESPONSE_OK])
    }

    fn upload_execute(&mut self, upload: &Upload) -> Result<Vec<u8>, HandlerError> {
        self.uploads.push(upload.clone());
        Ok(vec![RESPONSE_OK])
    }
}

/// One request and whatever came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Frame the scan tool sent
    pub request: Frame,
    /// Reply, if the controller answered
    pub reply: Option<Frame>,
}

/// Everything a scenario touched.
pub struct World {
    dispatcher: Dispatcher,
    session: SecuritySession,
    ecu: RecordingEcu,
    env: SimEnv,
    exchanges: Vec<Exchange>,
    idle_resets: usize,
}

impl World {
    /// Fresh world: locked session, clean controller.
    pub fn new(profile: TargetProfile, env: SimEnv, ecu: RecordingEcu) -> Self {
        let session = SecuritySession::new(env.now(), profile.security_config());
        Self {
            dispatcher: Dispatcher::new(profile),
            session,
            ecu,
            env,
            exchanges: Vec::new(),
            idle_resets: 0,
        }
    }

    /// Deliver one request and record the exchange.
    pub fn send(&mut self, request: Frame) -> Option<&Frame> {
        let reply = self.dispatcher.dispatch(&request, &mut self.session, &mut self.ecu, &self.env);
        debug!(
            step = self.exchanges.len(),
            mode = request.mode_byte(),
            answered = reply.is_some(),
            state = ?self.session.state(),
            "exchange"
        );
        self.exchanges.push(Exchange { request, reply });
        self.exchanges.last().and_then(|exchange| exchange.reply.as_ref())
    }

    /// Advance the clock and apply the idle timeout.
    pub fn advance(&mut self, by: std::time::Duration) {
        self.env.advance(by);
        if self.session.tick(self.env.now()) {
            debug!(?by, "idle timeout relocked session");
            self.idle_resets += 1;
        }
    }

    /// Bus reset.
    pub fn reset(&mut self) {
        debug!("bus reset");
        self.session.reset();
    }

    /// Profile in use.
    pub fn profile(&self) -> &TargetProfile {
        self.dispatcher.profile()
    }

    /// Security session.
    pub fn session(&self) -> &SecuritySession {
        &self.session
    }

    /// Simulated controller.
    pub fn ecu(&self) -> &RecordingEcu {
        &self.ecu
    }

    /// Environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Every exchange in order.
    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// Reply to the most recent request.
    pub fn last_reply(&self) -> Option<&Frame> {
        self.exchanges.last().and_then(|exchange| exchange.reply.as_ref())
    }

    /// Replies to every request with the given mode byte.
    pub fn replies_for(&self, mode: u8) -> Vec<Option<&Frame>> {
        self.exchanges
            .iter()
            .filter(|exchange| exchange.request.mode_byte() == mode)
            .map(|exchange| exchange.reply.as_ref())
            .collect()
    }

    /// Times the idle timeout relocked the session.
    pub fn idle_resets(&self) -> usize {
        self.idle_resets
    }
}
