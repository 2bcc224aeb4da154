//! In-memory serial bus.
//!
//! [`SimBus::pair`] returns two connected endpoints implementing `Read` and
//! `Write`, so they can stand in for a serial port on either side. Reads
//! block until bytes arrive, fail with `TimedOut` after the configured timeout
//! (as `serialport` does), and return `Ok(0)` once the peer is dropped.
//!
//! An endpoint can also echo its own writes back to itself, which is what a
//! single-wire ALDL cable does to everything attached to it. The echo lands
//! in the endpoint's own read buffer, ahead of anything the peer sends after
//! the write.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    time::Duration,
};

/// One end of a simulated half-duplex bus.
#[derive(Debug)]
pub struct SimBus {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    echo: bool,
    pending: VecDeque<u8>,
    timeout: Duration,
}

impl SimBus {
    /// Two connected endpoints without echo.
    pub fn pair(timeout: Duration) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self::endpoint(a_tx, a_rx, false, timeout),
            Self::endpoint(b_tx, b_rx, false, timeout),
        )
    }

    /// Pair where only the first endpoint hears its own writes.
    pub fn pair_with_echo(timeout: Duration) -> (Self, Self) {
        let (mut a, b) = Self::pair(timeout);
        a.echo = true;
        (a, b)
    }

    /// Pair where both endpoints hear their own writes, as on the real
    /// single-wire bus.
    pub fn single_wire(timeout: Duration) -> (Self, Self) {
        let (mut a, mut b) = Self::pair(timeout);
        a.echo = true;
        b.echo = true;
        (a, b)
    }

    fn endpoint(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>, echo: bool, timeout: Duration) -> Self {
        Self { tx, rx, echo, pending: VecDeque::new(), timeout }
    }

    /// Change the read timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Read for SimBus {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "bus read timed out"));
                },
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimBus {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        // Echo first: the peer may answer before this call returns.
        if self.echo {
            self.pending.extend(buf);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "bus peer dropped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
