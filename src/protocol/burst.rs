//! Burst framing
//!
//! A serialized packet is cut into bursts of at most `burst_size` bytes. Every
//! burst carries a 24-byte ASCII header followed by the hex CRC32:
//!
//! ```text
//! "BRST" serial(4) profile(5) packet(4) | "000" count(4)     announce (burst 0)
//!                                       | burst(3) size(4)   data (1..=count)
//!                                       | "ZZZ" "ZZZZ"       terminal (count+1)
//! crc32(8 hex)  [payload (size bytes), data bursts only]
//! ```
//!
//! The CRC covers the header, plus the payload for data bursts.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use super::instructions::validate_burst_size;
use super::metrics::Metrics;
use super::{
    BURST_HEADER_SIZE, BURST_MAGIC, BURST_OVERHEAD, Error, MAX_BURST_SIZE,
    MAX_BURSTS_PER_PACKET, Result, crc32, crc_hex, parse_crc_hex, parse_digits, push_digits,
};

const TERMINAL_NUMBER: &[u8; 3] = b"ZZZ";
const TERMINAL_SIZE: &[u8; 4] = b"ZZZZ";

/// Identifies one packet of one profile from one profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketKey {
    /// Profiler serial number.
    pub profiler_serial: u16,
    /// Profile id (YYDDD).
    pub profile_id: u16,
    /// Packet number (0 for the Info Packet).
    pub packet_number: u16,
}

impl PacketKey {
    /// Build a key.
    #[must_use]
    pub const fn new(profiler_serial: u16, profile_id: u16, packet_number: u16) -> Self {
        Self {
            profiler_serial,
            profile_id,
            packet_number,
        }
    }

    /// The `(serial, profile)` pair shared by all packets of a profile.
    #[must_use]
    pub const fn profile(&self) -> (u16, u16) {
        (self.profiler_serial, self.profile_id)
    }

    fn push_prefix(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(BURST_MAGIC);
        push_digits(out, u32::from(self.profiler_serial), 4);
        push_digits(out, u32::from(self.profile_id), 5);
        push_digits(out, u32::from(self.packet_number), 4);
    }
}

/// What a burst carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstKind {
    /// Burst 0: announces how many data bursts follow.
    Announce {
        /// Number of data bursts in the packet.
        burst_count: u16,
    },
    /// Burst `index` (1-based) with its slice of the packet.
    Data {
        /// Burst number.
        index: u16,
        /// Packet bytes carried.
        payload: Bytes,
    },
    /// No further bursts expected for the packet.
    Terminal,
}

/// One framed burst.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Burst {
    /// Packet the burst belongs to.
    pub key: PacketKey,
    /// Burst contents.
    pub kind: BurstKind,
}

impl Burst {
    /// The 24-byte ASCII header.
    #[must_use]
    pub fn header(&self) -> [u8; BURST_HEADER_SIZE] {
        let mut out = Vec::with_capacity(BURST_HEADER_SIZE);
        self.key.push_prefix(&mut out);
        match &self.kind {
            BurstKind::Announce { burst_count } => {
                push_digits(&mut out, 0, 3);
                push_digits(&mut out, u32::from(*burst_count), 4);
            }
            BurstKind::Data { index, payload } => {
                push_digits(&mut out, u32::from(*index), 3);
                push_digits(&mut out, payload.len() as u32, 4);
            }
            BurstKind::Terminal => {
                out.extend_from_slice(TERMINAL_NUMBER);
                out.extend_from_slice(TERMINAL_SIZE);
            }
        }
        let mut header = [0u8; BURST_HEADER_SIZE];
        header.copy_from_slice(&out);
        header
    }

    /// CRC32 over the header, and the payload for data bursts.
    #[must_use]
    pub fn crc(&self) -> u32 {
        let header = self.header();
        match &self.kind {
            BurstKind::Data { payload, .. } => crc32(&[&header, payload]),
            _ => crc32(&[&header]),
        }
    }

    /// Bytes as sent on the wire.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.extend_from_slice(&self.header());
        out.extend_from_slice(&crc_hex(self.crc()));
        if let BurstKind::Data { payload, .. } = &self.kind {
            out.extend_from_slice(payload);
        }
        out
    }

    /// Length on the wire.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        match &self.kind {
            BurstKind::Data { payload, .. } => BURST_OVERHEAD + payload.len(),
            _ => BURST_OVERHEAD,
        }
    }

    /// Parse one burst from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds a plausible but incomplete burst.
    pub fn parse(buf: &[u8], max_payload: usize) -> Result<Option<(Self, usize)>> {
        if buf.len() < BURST_MAGIC.len() {
            return Ok(None);
        }
        if &buf[..4] != BURST_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&buf[..4]);
            return Err(Error::InvalidMagic { found });
        }
        if buf.len() < BURST_OVERHEAD {
            return Ok(None);
        }

        let header = &buf[..BURST_HEADER_SIZE];
        let key = PacketKey {
            profiler_serial: narrow(parse_digits(&header[4..8], "serial")?, "serial")?,
            profile_id: narrow(parse_digits(&header[8..13], "profile")?, "profile")?,
            packet_number: narrow(parse_digits(&header[13..17], "packet")?, "packet")?,
        };
        let found = parse_crc_hex(&buf[BURST_HEADER_SIZE..BURST_OVERHEAD])?;

        if &header[17..20] == TERMINAL_NUMBER && &header[20..24] == TERMINAL_SIZE {
            check_crc(crc32(&[header]), found)?;
            let burst = Self {
                key,
                kind: BurstKind::Terminal,
            };
            return Ok(Some((burst, BURST_OVERHEAD)));
        }

        let number = narrow(parse_digits(&header[17..20], "burst number")?, "burst number")?;
        let size = parse_digits(&header[20..24], "burst size")? as usize;

        if number == 0 {
            check_crc(crc32(&[header]), found)?;
            let burst = Self {
                key,
                kind: BurstKind::Announce {
                    burst_count: narrow(size as u32, "burst count")?,
                },
            };
            return Ok(Some((burst, BURST_OVERHEAD)));
        }

        if size == 0 || size > max_payload {
            return Err(Error::MalformedField {
                field: "burst size",
            });
        }
        let total = BURST_OVERHEAD + size;
        if buf.len() < total {
            return Ok(None);
        }
        let payload = &buf[BURST_OVERHEAD..total];
        check_crc(crc32(&[header, payload]), found)?;
        let burst = Self {
            key,
            kind: BurstKind::Data {
                index: number,
                payload: Bytes::copy_from_slice(payload),
            },
        };
        Ok(Some((burst, total)))
    }
}

fn narrow(value: u32, field: &'static str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::MalformedField { field })
}

fn check_crc(expected: u32, found: u32) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch { expected, found })
    }
}

/// A serialized packet cut into bursts.
#[derive(Debug, Clone)]
pub struct FramedPacket {
    key: PacketKey,
    data: Bytes,
    burst_size: usize,
    burst_count: u16,
}

impl FramedPacket {
    /// Frame `data` into bursts of `burst_size` bytes.
    pub fn frame(key: PacketKey, data: Bytes, burst_size: usize) -> Result<Self> {
        validate_burst_size(burst_size)?;
        let count = data.len().div_ceil(burst_size);
        if count > MAX_BURSTS_PER_PACKET {
            return Err(Error::TooManyBursts {
                len: data.len(),
                count,
                max: MAX_BURSTS_PER_PACKET,
            });
        }
        trace!(
            packet = key.packet_number,
            len = data.len(),
            bursts = count,
            "packet framed"
        );
        Ok(Self {
            key,
            data,
            burst_size,
            // Bounded by MAX_BURSTS_PER_PACKET above.
            burst_count: count as u16,
        })
    }

    /// Packet key.
    #[must_use]
    pub const fn key(&self) -> PacketKey {
        self.key
    }

    /// Number of data bursts.
    #[must_use]
    pub const fn burst_count(&self) -> u16 {
        self.burst_count
    }

    /// Index of the terminal burst (`burst_count + 1`).
    #[must_use]
    pub const fn terminal_index(&self) -> u16 {
        self.burst_count + 1
    }

    /// Serialized packet length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an empty packet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Burst at `index` in `0..=burst_count + 1`.
    #[must_use]
    pub fn burst(&self, index: u16) -> Option<Burst> {
        let kind = match index {
            0 => BurstKind::Announce {
                burst_count: self.burst_count,
            },
            i if i <= self.burst_count => {
                let start = usize::from(i - 1) * self.burst_size;
                let end = (start + self.burst_size).min(self.data.len());
                BurstKind::Data {
                    index: i,
                    payload: self.data.slice(start..end),
                }
            }
            i if i == self.terminal_index() => BurstKind::Terminal,
            _ => return None,
        };
        Some(Burst {
            key: self.key,
            kind,
        })
    }

    /// On-wire bytes of the burst at `index`.
    #[must_use]
    pub fn render(&self, index: u16) -> Option<Vec<u8>> {
        self.burst(index).map(|burst| burst.to_wire())
    }
}

/// Scans an inbound byte stream for valid bursts.
///
/// Corrupt units are skipped by advancing past the magic and rescanning, so a
/// damaged burst never hides the one behind it.
#[derive(Debug)]
pub struct BurstReader {
    buf: BytesMut,
    max_payload: usize,
    rejected: u64,
}

impl Default for BurstReader {
    fn default() -> Self {
        Self::new(MAX_BURST_SIZE)
    }
}

impl BurstReader {
    /// Reader accepting data bursts up to `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(BURST_OVERHEAD + max_payload),
            max_payload,
            rejected: 0,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Units discarded because they failed to parse or verify.
    #[must_use]
    pub const fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Next valid burst, or `None` until more bytes arrive.
    pub fn next_burst(&mut self) -> Option<Burst> {
        loop {
            let Some(start) = find_magic(&self.buf) else {
                let keep = (BURST_MAGIC.len() - 1).min(self.buf.len());
                let skip = self.buf.len() - keep;
                self.buf.advance(skip);
                return None;
            };
            self.buf.advance(start);

            match Burst::parse(&self.buf, self.max_payload) {
                Ok(Some((burst, used))) => {
                    self.buf.advance(used);
                    return Some(burst);
                }
                Ok(None) => return None,
                Err(err) => {
                    self.rejected += 1;
                    if matches!(err, Error::ChecksumMismatch { .. }) {
                        Metrics::record_crc_failure();
                    }
                    debug!(error = %err, "discarding corrupt burst");
                    self.buf.advance(BURST_MAGIC.len());
                }
            }
        }
    }
}

impl BurstReader {
    /// Give up on the partial unit at the front of the buffer.
    ///
    /// A header whose size field was corrupted upward reads as a burst still
    /// arriving and holds back every burst queued behind it until enough
    /// bytes turn up to fail its CRC. Call this once the link has gone quiet;
    /// returns whether anything was skipped.
    pub fn skip_stalled(&mut self) -> bool {
        if !self.buf.starts_with(&BURST_MAGIC[..]) {
            return false;
        }
        self.rejected += 1;
        debug!(buffered = self.buf.len(), "skipping stalled partial burst");
        self.buf.advance(BURST_MAGIC.len());
        true
    }
}

fn find_magic(buf: &[u8]) -> Option<usize> {
    buf.windows(BURST_MAGIC.len())
        .position(|window| window == BURST_MAGIC)
}
