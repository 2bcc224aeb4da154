//! Scan tool client.
//!
//! Talks to a controller the way a laptop on the diagnostic connector does:
//! one request, one reply, half duplex. On a single-wire cable the tool hears
//! its own transmission first; with echo enabled that copy is read back and
//! discarded before waiting for the reply.

use std::{
    io::ErrorKind,
    time::{Duration, Instant},
};

use aldl_core::{TargetProfile, security::compute_key_with};
use aldl_proto::{
    DeviceId, DiscreteOutputs, Frame, FrameDecoder, Mode, RESPONSE_OK,
    mode::{SUBMODE_KEY_SUBMIT, SUBMODE_SEED_REQUEST},
    requests,
};
use tracing::{debug, info, warn};

use crate::{error::BenchError, transport::ByteTransport};

/// Default time to wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a successful [`ScanTool::unlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unlock {
    /// Seed answered with the computed key
    Unlocked {
        /// Numeric seed
        seed: u16,
        /// Key sent
        key: u16,
    },
    /// Controller reported a zero seed
    AlreadyUnlocked,
}

/// Client for one addressed controller.
pub struct ScanTool<T> {
    transport: T,
    device: DeviceId,
    magic: u16,
    echo: bool,
    reply_timeout: Duration,
    decoder: FrameDecoder,
}

impl<T: ByteTransport> ScanTool<T> {
    /// Client addressing `device` with the stock key magic, echo enabled.
    pub fn new(transport: T, device: DeviceId) -> Self {
        Self {
            transport,
            device,
            magic: aldl_core::security::SECURITY_MAGIC,
            echo: true,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            decoder: FrameDecoder::new(),
        }
    }

    /// Client for a profile's device and key magic.
    pub fn for_profile(transport: T, profile: &TargetProfile) -> Self {
        Self::new(transport, profile.device).with_magic(profile.security.magic)
    }

    /// Whether the transport echoes our own writes.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Key algorithm constant.
    pub fn with_magic(mut self, magic: u16) -> Self {
        self.magic = magic;
        self
    }

    /// Overall deadline for one reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Addressed device.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Send `request` and wait for the reply from the same device and mode.
    ///
    /// Frames from other modules arriving in between are skipped.
    pub fn request(&mut self, request: &Frame) -> Result<Frame, BenchError> {
        let mode = request.mode_byte();
        let bytes = request.to_bytes();
        debug!(frame = %hex::encode(&bytes), "tx");
        self.transport.send(&bytes)?;

        self.decoder.reset();
        if self.echo
            && let Some(reply) = self.skip_echo(request, &bytes)?
        {
            return Ok(reply);
        }

        let deadline = Instant::now() + self.reply_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(BenchError::Timeout { mode });
            }

            let byte = self.recv(mode)?;
            if let Some(reply) = self.take(byte, request) {
                return Ok(reply);
            }
        }
    }

    /// Feed one byte; returns the reply to `request` once it completes.
    fn take(&mut self, byte: u8, request: &Frame) -> Option<Frame> {
        match self.decoder.push(byte) {
            Ok(Some(reply)) if reply.device() == request.device() && reply.mode_byte() == request.mode_byte() => {
                debug!(frame = %hex::encode(reply.to_bytes()), "rx");
                Some(reply)
            },
            Ok(Some(other)) => {
                debug!(device = %other.device(), mode = other.mode_byte(), "skipping unrelated frame");
                None
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "dropping frame");
                None
            },
        }
    }

    fn recv(&mut self, mode: u8) -> Result<u8, BenchError> {
        self.transport.recv_byte().map_err(|err| match err.kind() {
            ErrorKind::TimedOut => BenchError::Timeout { mode },
            _ => BenchError::Io(err),
        })
    }

    /// Read back our own transmission. On a mismatch the bytes taken as
    /// echo so far were bus traffic and go to the decoder, which may
    /// already complete the reply.
    fn skip_echo(&mut self, request: &Frame, sent: &[u8]) -> Result<Option<Frame>, BenchError> {
        for (i, &expected) in sent.iter().enumerate() {
            let byte = self.recv(request.mode_byte())?;
            if byte == expected {
                continue;
            }

            warn!(offset = i, expected, byte, "echo mismatch");
            for &replayed in sent[..i].iter().chain([byte].iter()) {
                if let Some(reply) = self.take(replayed, request) {
                    return Ok(Some(reply));
                }
            }
            return Ok(None);
        }
        Ok(None)
    }

    /// Seed/key exchange.
    pub fn unlock(&mut self) -> Result<Unlock, BenchError> {
        let mode = Mode::Security.to_u8();
        let reply = self.request(&requests::seed_request(self.device))?;

        let (hi, lo) = match *reply.payload() {
            [SUBMODE_SEED_REQUEST, 0x00, 0x00] => return Ok(Unlock::AlreadyUnlocked),
            [SUBMODE_SEED_REQUEST, hi, lo] => (hi, lo),
            [SUBMODE_SEED_REQUEST, code] => return Err(BenchError::Rejected { mode, code }),
            _ => return Err(unexpected(&reply)),
        };

        let seed = u16::from_le_bytes([hi, lo]);
        let key = compute_key_with(self.magic, hi, lo);
        let reply = self.request(&requests::key_submission(self.device, key))?;

        match *reply.payload() {
            [SUBMODE_KEY_SUBMIT, RESPONSE_OK] => {
                info!(seed, key, "unlocked");
                Ok(Unlock::Unlocked { seed, key })
            },
            [SUBMODE_KEY_SUBMIT, code] => Err(BenchError::Rejected { mode, code }),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Mode 4: drive the discrete outputs. Returns the status byte.
    pub fn actuate(&mut self, outputs: DiscreteOutputs) -> Result<u8, BenchError> {
        let request = requests::actuator(self.device, &[outputs.control_byte()])?;
        let reply = self.request(&request)?;
        match *reply.payload() {
            [status] => Ok(status),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Mode 5: unlock, then enter flash programming.
    pub fn enter_flash(&mut self) -> Result<Vec<u8>, BenchError> {
        self.unlock()?;
        let reply = self.request(&Frame::simple(self.device, Mode::FlashEntry))?;
        expect_ok(&reply)?;
        Ok(reply.payload().to_vec())
    }

    /// Mode 6: upload `data` at `load_addr` in chunks of at most `chunk`
    /// bytes, unlocking before each chunk. Returns the number of chunks sent.
    pub fn upload(&mut self, bank_wire_id: u8, load_addr: u16, data: &[u8], chunk: usize) -> Result<usize, BenchError> {
        if chunk == 0 {
            return Err(BenchError::InvalidArgument("upload chunk size must be above zero".into()));
        }

        let mut sent = 0;
        for (index, piece) in data.chunks(chunk).enumerate() {
            let offset = u16::try_from(index * chunk)
                .map_err(|_| BenchError::InvalidArgument("upload larger than the address space".into()))?;
            let addr = load_addr
                .checked_add(offset)
                .ok_or_else(|| BenchError::InvalidArgument("upload runs past 0xFFFF".into()))?;

            self.unlock()?;
            let request = requests::upload_chunk(self.device, bank_wire_id, addr, piece)?;
            let reply = self.request(&request)?;
            expect_ok(&reply)?;
            sent += 1;
        }

        info!(chunks = sent, len = data.len(), load_addr, "upload complete");
        Ok(sent)
    }

    /// Mode 8: ask `device` to stop its normal bus traffic.
    pub fn disable_chatter(&mut self, device: DeviceId) -> Result<(), BenchError> {
        self.chatter(device, Mode::DisableChatter)
    }

    /// Mode 9: let `device` resume its normal bus traffic.
    pub fn enable_chatter(&mut self, device: DeviceId) -> Result<(), BenchError> {
        self.chatter(device, Mode::EnableChatter)
    }

    fn chatter(&mut self, device: DeviceId, mode: Mode) -> Result<(), BenchError> {
        let reply = self.request(&Frame::simple(device, mode))?;
        match *reply.payload() {
            [] | [RESPONSE_OK] => Ok(()),
            [code] => Err(BenchError::Rejected { mode: mode.to_u8(), code }),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Run `body` with the body module and the addressed controller silenced.
    ///
    /// A body module that doesn't answer is tolerated; the controller must
    /// confirm. Chatter is re-enabled on both afterwards whether or not
    /// `body` succeeded. An error from `body` wins over a failed re-enable.
    pub fn with_chatter_disabled<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, BenchError>,
    ) -> Result<R, BenchError> {
        let target = self.device;
        let bcm = (target != DeviceId::Bcm).then_some(DeviceId::Bcm);

        if let Some(bcm) = bcm
            && let Err(err) = self.disable_chatter(bcm)
        {
            warn!(error = %err, "body module didn't go quiet, continuing");
        }
        let result = self.disable_chatter(target).and_then(|()| body(self));

        if let Some(bcm) = bcm
            && let Err(err) = self.enable_chatter(bcm)
        {
            warn!(error = %err, "body module chatter not re-enabled");
        }
        let restored = self.enable_chatter(target);

        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), restored) => {
                if let Err(restore_err) = restored {
                    warn!(error = %restore_err, "controller chatter not re-enabled");
                }
                Err(err)
            },
        }
    }

    /// Mode 1: one data stream snapshot.
    pub fn datastream(&mut self) -> Result<Vec<u8>, BenchError> {
        let reply = self.request(&Frame::simple(self.device, Mode::Datastream))?;
        Ok(reply.payload().to_vec())
    }

    /// Give back the transport.
    pub fn into_inner(self) -> T {
        self.transport
    }
}

fn unexpected(reply: &Frame) -> BenchError {
    BenchError::UnexpectedReply { mode: reply.mode_byte(), payload: reply.payload().to_vec() }
}

fn expect_ok(reply: &Frame) -> Result<(), BenchError> {
    match *reply.payload() {
        [RESPONSE_OK, ..] => Ok(()),
        [code] => Err(BenchError::Rejected { mode: reply.mode_byte(), code }),
        _ => Err(unexpected(reply)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Write};

    use proptest::prelude::*;

    use super::*;

    /// Replays canned bus bytes and keeps what the tool sent.
    struct Scripted {
        incoming: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(incoming: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self { incoming: Cursor::new(incoming.into_iter().flatten().collect()), sent: Vec::new() }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.incoming.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn datastream_reply() -> Vec<u8> {
        Frame::new(DeviceId::PcmVyV6, 0x01, vec![0x10, 0x20]).unwrap().to_bytes()
    }

    #[test]
    fn echo_is_skipped() {
        let request = Frame::simple(DeviceId::PcmVyV6, Mode::Datastream).to_bytes();
        let mut tool = ScanTool::new(Scripted::new([request.clone(), datastream_reply()]), DeviceId::PcmVyV6);

        assert_eq!(tool.datastream().unwrap(), vec![0x10, 0x20]);
        assert_eq!(tool.into_inner().sent, request);
    }

    #[test]
    fn missing_echo_does_not_lose_the_reply() {
        // The reply shares its first byte with the request, so it is taken
        // for echo until the length byte differs.
        let mut tool = ScanTool::new(Scripted::new([datastream_reply()]), DeviceId::PcmVyV6);
        assert_eq!(tool.datastream().unwrap(), vec![0x10, 0x20]);
    }

    #[test]
    fn other_modules_between_echo_and_reply_are_skipped() {
        let request = Frame::simple(DeviceId::PcmVyV6, Mode::Datastream).to_bytes();
        let bcm = Frame::new(DeviceId::Bcm, 0x01, vec![0x55]).unwrap().to_bytes();
        let mut tool = ScanTool::new(Scripted::new([request, bcm, datastream_reply()]), DeviceId::PcmVyV6);
        assert_eq!(tool.datastream().unwrap(), vec![0x10, 0x20]);
    }

    #[test]
    fn eof_before_reply_is_an_io_error() {
        let mut tool = ScanTool::new(Scripted::new([Vec::new()]), DeviceId::PcmVyV6).with_echo(false);
        assert!(matches!(tool.datastream(), Err(BenchError::Io(_))));
    }

    proptest! {
        #[test]
        fn line_noise_before_the_reply_is_skipped(
            noise in prop::collection::vec(any::<u8>().prop_filter("not a device id", |b| DeviceId::from_u8(*b).is_none()), 0..64),
        ) {
            let mut tool = ScanTool::new(Scripted::new([noise, datastream_reply()]), DeviceId::PcmVyV6).with_echo(false);
            prop_assert_eq!(tool.datastream().unwrap(), vec![0x10, 0x20]);
        }
    }
}
