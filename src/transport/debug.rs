//! Session capture for offline inspection (`debug-tools` feature).

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use super::error::TransportError;
use super::link::Link;

/// Direction of captured bytes, stored as the first byte of each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    /// Written to the link.
    Outbound = b'>',
    /// Read from the link.
    Inbound = b'<',
}

/// Thread-safe wrapper around a PCAP writer.
#[derive(Clone)]
pub struct PcapRecorder {
    inner: Arc<Mutex<PcapWriter>>,
}

impl PcapRecorder {
    /// Create a recorder that writes to the provided path, truncating any existing file.
    pub fn create(path: &Path) -> io::Result<Self> {
        let writer = PcapWriter::new(File::create(path)?)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(writer)),
        })
    }

    /// Record bytes moving in `direction` with the current system timestamp.
    pub fn record(&self, direction: Direction, bytes: &[u8]) -> io::Result<()> {
        let timestamp = SystemTime::now();
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("pcap recorder poisoned"))?;
        guard.write_record(timestamp, direction, bytes)
    }
}

impl std::fmt::Debug for PcapRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcapRecorder").finish_non_exhaustive()
    }
}

struct PcapWriter {
    file: File,
}

impl PcapWriter {
    fn new(mut file: File) -> io::Result<Self> {
        write_global_header(&mut file)?;
        Ok(Self { file })
    }

    fn write_record(
        &mut self,
        timestamp: SystemTime,
        direction: Direction,
        data: &[u8],
    ) -> io::Result<()> {
        let (sec, usec) = micros(timestamp);
        let data = &data[..data.len().min(PCAP_SNAPLEN as usize - 1)];
        // Bounded by the snap length above.
        let length = (data.len() + 1) as u32;
        let mut header = [0u8; 16];
        header[0..4].copy_from_slice(&sec.to_le_bytes());
        header[4..8].copy_from_slice(&usec.to_le_bytes());
        header[8..12].copy_from_slice(&length.to_le_bytes());
        header[12..16].copy_from_slice(&length.to_le_bytes());

        self.file.write_all(&header)?;
        self.file.write_all(&[direction as u8])?;
        self.file.write_all(data)?;
        self.file.flush()
    }
}

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_THISZONE: i32 = 0;
const PCAP_SIGFIGS: u32 = 0;
const PCAP_SNAPLEN: u32 = 65_535;
const PCAP_NETWORK: u32 = 147; // LINKTYPE_USER0

fn write_global_header(file: &mut File) -> io::Result<()> {
    let mut header = [0u8; 24];
    header[0..4].copy_from_slice(&PCAP_MAGIC.to_le_bytes());
    header[4..6].copy_from_slice(&PCAP_VERSION_MAJOR.to_le_bytes());
    header[6..8].copy_from_slice(&PCAP_VERSION_MINOR.to_le_bytes());
    header[8..12].copy_from_slice(&PCAP_THISZONE.to_le_bytes());
    header[12..16].copy_from_slice(&PCAP_SIGFIGS.to_le_bytes());
    header[16..20].copy_from_slice(&PCAP_SNAPLEN.to_le_bytes());
    header[20..24].copy_from_slice(&PCAP_NETWORK.to_le_bytes());
    file.write_all(&header)
}

fn micros(timestamp: SystemTime) -> (u32, u32) {
    let duration = timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = duration.as_secs().min(u64::from(u32::MAX)) as u32;
    let micros = duration.subsec_micros();
    (secs, micros)
}

/// A link that records every byte it moves.
///
/// Capture failures are logged and never fail the link.
#[derive(Debug)]
pub struct CaptureLink<L> {
    inner: L,
    recorder: PcapRecorder,
}

impl<L: Link> CaptureLink<L> {
    /// Wrap `inner`, capturing into `recorder`.
    pub fn new(inner: L, recorder: PcapRecorder) -> Self {
        Self { inner, recorder }
    }

    /// Unwrap the inner link.
    pub fn into_inner(self) -> L {
        self.inner
    }

    fn capture(&self, direction: Direction, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Err(err) = self.recorder.record(direction, bytes) {
            debug!(error = ?err, ?direction, "failed to record link bytes");
        }
    }
}

impl<L: Link> Link for CaptureLink<L> {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.inner.read_available(buf)?;
        self.capture(Direction::Inbound, &buf[..n]);
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), TransportError> {
        self.inner.write_all(bytes, timeout)?;
        self.capture(Direction::Outbound, bytes);
        Ok(())
    }
}
