//! Byte links between the profiler and the shore station.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::TransportError;

/// A duplex byte stream polled without blocking.
///
/// Bursts and control lines are atomic units to the protocol, so a link only
/// has to move bytes in order; it never sees packet boundaries.
pub trait Link {
    /// Copy whatever bytes are pending into `buf`; `Ok(0)` when none are.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write every byte of `bytes`, giving up after `timeout`.
    fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError>;
}

impl<L: Link + ?Sized> Link for &mut L {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_available(buf)
    }

    fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).write_all(bytes, timeout)
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read_available(buf)
    }

    fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        (**self).write_all(bytes, timeout)
    }
}

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// One end of an in-memory duplex link.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    inbound: Pipe,
    outbound: Pipe,
    closed: Arc<AtomicBool>,
}

impl MemoryLink {
    /// Two connected ends; bytes written to one are read from the other.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Pipe::default();
        let b_to_a = Pipe::default();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                inbound: Arc::clone(&b_to_a),
                outbound: Arc::clone(&a_to_b),
                closed: Arc::clone(&closed),
            },
            Self {
                inbound: a_to_b,
                outbound: b_to_a,
                closed,
            },
        )
    }

    /// Hang up both ends. Bytes already queued can still be read.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Bytes written by the peer and not yet read.
    pub fn pending(&self) -> Result<usize, TransportError> {
        Ok(lock(&self.inbound)?.len())
    }
}

impl Link for MemoryLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut pipe = lock(&self.inbound)?;
        if pipe.is_empty() && self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let n = buf.len().min(pipe.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        lock(&self.outbound)?.extend(bytes);
        Ok(())
    }
}

fn lock(pipe: &Pipe) -> Result<MutexGuard<'_, VecDeque<u8>>, TransportError> {
    pipe.lock()
        .map_err(|_| TransportError::Io(io::Error::other("memory link poisoned")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn bytes_cross_in_order() {
        let (mut a, mut b) = MemoryLink::pair();
        a.write_all(b"BRST", TIMEOUT).unwrap();
        a.write_all(b"0770", TIMEOUT).unwrap();
        b.write_all(b"ALIF\r\n", TIMEOUT).unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(b.read_available(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"BRST07");
        assert_eq!(b.pending().unwrap(), 2);
        assert_eq!(b.read_available(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"70");
        assert_eq!(b.read_available(&mut buf).unwrap(), 0);

        assert_eq!(a.read_available(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"ALIF\r\n");
    }

    #[test]
    fn close_drains_then_fails() {
        let (mut a, mut b) = MemoryLink::pair();
        a.write_all(b"xy", TIMEOUT).unwrap();
        a.close();
        assert!(matches!(
            a.write_all(b"z", TIMEOUT),
            Err(TransportError::Closed)
        ));
        let mut buf = [0u8; 8];
        assert_eq!(b.read_available(&mut buf).unwrap(), 2);
        assert!(matches!(
            b.read_available(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn boxed_links_forward() {
        let (a, mut b) = MemoryLink::pair();
        let mut boxed: Box<dyn Link> = Box::new(a);
        boxed.write_all(b"RXED", TIMEOUT).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(b.read_available(&mut buf).unwrap(), 4);
    }
}
