//! Byte transport.
//!
//! The drivers only need to push a frame out and pull bytes in one at a
//! time. Anything `Read + Write` qualifies, which covers serial ports and the
//! simulated bus alike.

use std::io::{self, ErrorKind, Read, Write};

/// Blocking, byte-oriented link to the bus.
///
/// `recv_byte` fails with `TimedOut` when nothing arrives within the
/// transport's read timeout and with `UnexpectedEof` once the link is gone.
pub trait ByteTransport {
    /// Write all of `bytes` and flush.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read one byte.
    fn recv_byte(&mut self) -> io::Result<u8>;
}

impl<T: Read + Write + ?Sized> ByteTransport for T {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn recv_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        loop {
            match self.read(&mut byte) {
                Ok(0) => return Err(ErrorKind::UnexpectedEof.into()),
                Ok(_) => return Ok(byte[0]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {},
                Err(err) => return Err(err),
            }
        }
    }
}
