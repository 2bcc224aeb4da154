//! Mode dispatcher.
//!
//! Routes one decoded request to the security handshake, the flash guard or
//! an external handler, and builds the reply frame. Every request gets exactly
//! one of: a reply, a status frame, or silence (frames for other modules and
//! data stream requests the handler declines).
//!
//! | mode | route | reply |
//! |---|---|---|
//! | 1 | [`ModeHandlers::datastream`] | handler payload, or nothing |
//! | 4 | [`ModeHandlers::actuator`] | `[status]` |
//! | 5 | unlock, then [`ModeHandlers::flash_entry`] | handler payload |
//! | 6 | unlock, bank and window checks, then [`ModeHandlers::upload_execute`] | handler payload |
//! | 13 | [`SecuritySession`] | `[sub, ..]` |
//! | 2, 3, 7-10 | [`ModeHandlers::service`] | handler payload, or `[0x55]` |
//! | other | none | `[0x55]` |
//!
//! The dispatcher holds no connection state. The session is passed in on
//! every call, so one dispatcher can serve any number of connections.

use aldl_proto::{
    Frame, Mode, RESPONSE_FAIL, RESPONSE_OK, RESPONSE_REJECTED,
    mode::{SUBMODE_KEY_SUBMIT, SUBMODE_SEED_REQUEST},
    requests::UPLOAD_HEADER_LEN,
};
use tracing::{debug, info, trace, warn};

use crate::{
    env::Environment,
    error::{DispatchError, HandlerError},
    flash::BankId,
    profile::TargetProfile,
    security::{Seed, SecurityOutcome, SecuritySession},
};

/// Validated mode-6 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Bank selected for the duration of the kernel
    pub bank: BankId,
    /// RAM load address, inside the profile's upload window
    pub load_addr: u16,
    /// Kernel bytes
    pub data: Vec<u8>,
}

/// Collaborators that touch the controller itself.
///
/// Handlers run to completion before the next byte is read from the bus.
pub trait ModeHandlers {
    /// Mode 1. `None` sends no reply.
    fn datastream(&mut self, _request: &[u8]) -> Option<Vec<u8>> {
        None
    }

    /// Mode 4. Apply the control byte and return a status byte.
    fn actuator(&mut self, control: u8) -> u8;

    /// Mode 5, already authorized.
    fn flash_entry(&mut self, request: &[u8]) -> Result<Vec<u8>, HandlerError>;

    /// Mode 6, already authorized and bounds-checked.
    fn upload_execute(&mut self, upload: &Upload) -> Result<Vec<u8>, HandlerError>;

    /// Modes 2, 3 and 7-10. `None` means unimplemented.
    fn service(&mut self, _mode: Mode, _request: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

/// Routes requests for one target profile.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    profile: TargetProfile,
}

impl Dispatcher {
    /// Dispatcher answering as `profile.device`.
    pub fn new(profile: TargetProfile) -> Self {
        Self { profile }
    }

    /// Profile in use.
    pub fn profile(&self) -> &TargetProfile {
        &self.profile
    }

    /// Handle one request. Returns the reply to send, if any.
    ///
    /// Never fails: refusals become status frames echoing the request's
    /// device and mode byte.
    pub fn dispatch(
        &self,
        request: &Frame,
        session: &mut SecuritySession,
        handlers: &mut impl ModeHandlers,
        env: &impl Environment,
    ) -> Option<Frame> {
        if request.device() != self.profile.device {
            trace!(device = %request.device(), "ignoring frame for another module");
            return None;
        }

        // An unlock that lapsed while the bus was busy with other modules
        // must not be revived by this request's activity.
        let now = env.now();
        session.tick(now);
        session.touch(now);
        debug!(
            mode = request.mode_byte(),
            payload = %hex::encode(request.payload()),
            "request"
        );

        let device = request.device();
        let mode = request.mode_byte();

        match self.route(request, session, handlers, env) {
            Ok(Some(payload)) => match Frame::new(device, mode, payload) {
                Ok(reply) => Some(reply),
                Err(err) => {
                    warn!(mode, error = %err, "handler reply doesn't fit in a frame");
                    Some(Frame::status(device, mode, RESPONSE_FAIL))
                },
            },
            Ok(None) => None,
            Err(err) => {
                let code = err.response_code();
                warn!(mode, error = %err, code, "request refused");
                Some(Frame::status(device, mode, code))
            },
        }
    }

    fn route(
        &self,
        request: &Frame,
        session: &mut SecuritySession,
        handlers: &mut impl ModeHandlers,
        env: &impl Environment,
    ) -> Result<Option<Vec<u8>>, DispatchError> {
        let payload = request.payload();
        let Some(mode) = request.mode() else {
            return Err(DispatchError::UnknownMode(request.mode_byte()));
        };

        match mode {
            Mode::Datastream => Ok(handlers.datastream(payload)),

            Mode::ActuatorTest => {
                let &control = payload
                    .first()
                    .ok_or(DispatchError::Malformed { mode, reason: "missing control byte" })?;
                Ok(Some(vec![handlers.actuator(control)]))
            },

            Mode::FlashEntry => {
                authorize(mode, session, env)?;
                info!("entering flash programming");
                Ok(Some(handlers.flash_entry(payload)?))
            },

            Mode::UploadExecute => {
                authorize(mode, session, env)?;
                let upload = self.parse_upload(payload)?;
                info!(
                    bank = %upload.bank,
                    load_addr = upload.load_addr,
                    len = upload.data.len(),
                    "uploading kernel"
                );
                Ok(Some(handlers.upload_execute(&upload)?))
            },

            Mode::Security => self.security(payload, session, env).map(Some),

            Mode::FreezeFrame
            | Mode::ReadDtc
            | Mode::ClearDtc
            | Mode::DisableChatter
            | Mode::EnableChatter
            | Mode::Diagnostics => handlers
                .service(mode, payload)
                .map(Some)
                .ok_or(DispatchError::UnknownMode(mode.to_u8())),
        }
    }

    fn security(
        &self,
        payload: &[u8],
        session: &mut SecuritySession,
        env: &impl Environment,
    ) -> Result<Vec<u8>, DispatchError> {
        let malformed = DispatchError::Malformed { mode: Mode::Security, reason: "unknown security sub-mode" };

        match *payload {
            [SUBMODE_SEED_REQUEST] => {
                Ok(security_reply(SUBMODE_SEED_REQUEST, session.request_seed(env)))
            },
            [hi, lo] | [SUBMODE_KEY_SUBMIT, hi, lo] => {
                let key = u16::from_be_bytes([hi, lo]);
                Ok(security_reply(SUBMODE_KEY_SUBMIT, session.submit_key(key, env.now())))
            },
            _ => Err(malformed),
        }
    }

    fn parse_upload(&self, payload: &[u8]) -> Result<Upload, DispatchError> {
        let malformed =
            |reason| DispatchError::Malformed { mode: Mode::UploadExecute, reason };

        if payload.len() < UPLOAD_HEADER_LEN {
            return Err(malformed("short upload header"));
        }
        let (header, data) = payload.split_at(UPLOAD_HEADER_LEN);
        if data.is_empty() {
            return Err(malformed("upload carries no data"));
        }

        let bank = self.profile.flash.bank_from_wire(header[0])?;
        let load_addr = u16::from_be_bytes([header[1], header[2]]);
        self.profile.check_upload(load_addr, data.len())?;

        Ok(Upload { bank, load_addr, data: data.to_vec() })
    }
}

fn authorize(
    mode: Mode,
    session: &mut SecuritySession,
    env: &impl Environment,
) -> Result<(), DispatchError> {
    if session.take_grant(env.now()) {
        Ok(())
    } else {
        Err(DispatchError::UnauthorizedAccess { mode })
    }
}

fn security_reply(submode: u8, outcome: SecurityOutcome) -> Vec<u8> {
    match outcome {
        SecurityOutcome::SeedIssued(seed) => vec![submode, seed.hi, seed.lo],
        SecurityOutcome::AlreadyUnlocked => vec![submode, Seed::UNLOCKED.hi, Seed::UNLOCKED.lo],
        SecurityOutcome::Accepted => vec![submode, RESPONSE_OK],
        SecurityOutcome::Rejected | SecurityOutcome::LockedOut { .. } => {
            vec![submode, RESPONSE_REJECTED]
        },
    }
}
