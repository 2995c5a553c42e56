//! TCP link to the shore station.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use super::error::TransportError;
use super::link::Link;

const WRITE_BACKOFF: Duration = Duration::from_millis(5);

/// A socket link (RUDICS-style dial-in over TCP).
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// Connect to the shore station.
    #[instrument(level = "info")]
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, TransportError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        debug!(%addr, "link connected");
        Self::from_stream(stream)
    }

    /// Wrap an accepted or connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Remote address of the link.
    pub fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.stream.peer_addr()?)
    }

    /// Local address of the link.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.stream.local_addr()?)
    }
}

impl Link for TcpLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::WriteTimeout {
                            written,
                            len: bytes.len(),
                            timeout,
                        });
                    }
                    thread::sleep(WRITE_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
