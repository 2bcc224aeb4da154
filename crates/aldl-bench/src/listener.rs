//! Bench responder loop.
//!
//! Pulls bytes off the transport, reassembles frames, dispatches them, and
//! writes replies. Each request is handled to completion before the next byte
//! is read, so privileged requests never interleave.
//!
//! ```text
//!   recv_byte ──> idle check ──> echo skip ──> FrameDecoder ──> Dispatcher ──> send(reply)
//!      │                            │               │
//!      │ TimedOut                   │ mismatch      └─ framing error: log, count, resync
//!      │   └─ drop partial frame,   └─ replay the bytes taken as echo
//!      │      apply idle timeout
//!      └ UnexpectedEof: reset session, stop
//! ```
//!
//! On a single-wire cable every reply comes straight back to the sender.
//! With echo enabled the listener expects its own bytes and drops them
//! before they reach the decoder; otherwise a status reply would be decoded
//! as a fresh request.

use std::{io::ErrorKind, mem};

use aldl_core::{Dispatcher, Environment, ModeHandlers, SecuritySession, TargetProfile};
use aldl_proto::FrameDecoder;
use tracing::{debug, info, warn};

use crate::{error::BenchError, transport::ByteTransport};

/// Counters kept by a [`Listener`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Frames decoded
    pub frames: u64,
    /// Replies written
    pub replies: u64,
    /// Frames dropped for bad length or checksum
    pub framing_errors: u64,
    /// Partial frames abandoned on a read timeout
    pub abandoned: u64,
    /// Bytes of our own replies heard back and dropped
    pub echoed: u64,
}

/// What one [`Listener::poll`] call saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Byte consumed
    Byte,
    /// Read timed out
    Idle,
    /// Transport closed
    Disconnected,
}

/// Responder answering as one target profile.
pub struct Listener<T, H, E> {
    transport: T,
    dispatcher: Dispatcher,
    session: SecuritySession,
    handlers: H,
    env: E,
    decoder: FrameDecoder,
    stats: ListenerStats,
    echo: bool,
    /// Last reply written and how much of it has been heard back.
    echo_expected: Vec<u8>,
    echo_heard: usize,
}

impl<T, H, E> Listener<T, H, E>
where
    T: ByteTransport,
    H: ModeHandlers,
    E: Environment,
{
    /// Listener with a fresh locked session, for a transport that doesn't
    /// echo.
    pub fn new(transport: T, profile: TargetProfile, handlers: H, env: E) -> Self {
        let session = SecuritySession::new(env.now(), profile.security_config());
        Self {
            transport,
            dispatcher: Dispatcher::new(profile),
            session,
            handlers,
            env,
            decoder: FrameDecoder::new(),
            stats: ListenerStats::default(),
            echo: false,
            echo_expected: Vec::new(),
            echo_heard: 0,
        }
    }

    /// Whether the transport echoes our own writes.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Serve until the transport closes.
    pub fn run(&mut self) -> Result<ListenerStats, BenchError> {
        info!(
            profile = %self.dispatcher.profile().name,
            device = %self.dispatcher.profile().device,
            "listening"
        );
        while self.poll()? != Poll::Disconnected {}
        info!(stats = ?self.stats, "bus closed");
        Ok(self.stats)
    }

    /// Read and process at most one byte.
    pub fn poll(&mut self) -> Result<Poll, BenchError> {
        let byte = match self.transport.recv_byte() {
            Ok(byte) => byte,
            Err(err) if err.kind() == ErrorKind::TimedOut => {
                self.on_idle();
                return Ok(Poll::Idle);
            },
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.session.reset();
                self.decoder.reset();
                self.clear_echo();
                return Ok(Poll::Disconnected);
            },
            Err(err) => return Err(err.into()),
        };

        // Chatter from other modules keeps reads from timing out, so the
        // idle timeout is applied on every byte.
        self.session.tick(self.env.now());

        if self.echo_expected.is_empty() {
            self.process(byte)?;
            return Ok(Poll::Byte);
        }

        if self.echo_expected.get(self.echo_heard) == Some(&byte) {
            self.echo_heard += 1;
            self.stats.echoed += 1;
            if self.echo_heard == self.echo_expected.len() {
                self.clear_echo();
            }
            return Ok(Poll::Byte);
        }

        // Not our echo. Whatever matched so far was bus traffic after all.
        warn!(offset = self.echo_heard, byte, "echo mismatch");
        let mut replay = mem::take(&mut self.echo_expected);
        replay.truncate(self.echo_heard);
        self.stats.echoed -= replay.len() as u64;
        self.echo_heard = 0;
        replay.push(byte);
        for byte in replay {
            self.process(byte)?;
        }
        Ok(Poll::Byte)
    }

    fn process(&mut self, byte: u8) -> Result<(), BenchError> {
        match self.decoder.push(byte) {
            Ok(Some(frame)) => {
                self.stats.frames += 1;
                debug!(frame = %hex::encode(frame.to_bytes()), "rx");

                if let Some(reply) =
                    self.dispatcher.dispatch(&frame, &mut self.session, &mut self.handlers, &self.env)
                {
                    let bytes = reply.to_bytes();
                    debug!(frame = %hex::encode(&bytes), "tx");
                    self.transport.send(&bytes)?;
                    self.stats.replies += 1;
                    if self.echo {
                        self.echo_expected = bytes;
                        self.echo_heard = 0;
                    }
                }
            },
            Ok(None) => {},
            Err(err) => {
                self.stats.framing_errors += 1;
                warn!(error = %err, "dropping frame");
            },
        }
        Ok(())
    }

    fn on_idle(&mut self) {
        if !self.decoder.is_idle() {
            debug!("read timeout mid-frame, resynchronising");
            self.decoder.reset();
            self.stats.abandoned += 1;
        }
        if !self.echo_expected.is_empty() {
            debug!(heard = self.echo_heard, len = self.echo_expected.len(), "echo never completed");
            self.clear_echo();
        }
        self.session.tick(self.env.now());
    }

    fn clear_echo(&mut self) {
        self.echo_expected.clear();
        self.echo_heard = 0;
    }

    /// Counters so far.
    pub fn stats(&self) -> ListenerStats {
        self.stats
    }

    /// Security session of the current connection.
    pub fn session(&self) -> &SecuritySession {
        &self.session
    }

    /// Mode handlers.
    pub fn handlers(&self) -> &H {
        &self.handlers
    }

    /// Give back the transport and handlers.
    pub fn into_parts(self) -> (T, H) {
        (self.transport, self.handlers)
    }
}
