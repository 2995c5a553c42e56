//! Control lines sent from the shore station back to the profiler
//!
//! ```text
//! RXED,0770,12345,0001,999,1A2B3C4D\r\n    packet confirmed
//! RSND,0770,12345,0001,002,1A2B3C4D\r\n    resend burst 2 (999: whole packet)
//! ALIF\r\n                                 heartbeat, no CRC
//! ```
//!
//! Fields are fixed width. The CRC covers the comma-terminated prefix that
//! precedes it.

use std::fmt;

use bytes::BytesMut;
use tracing::debug;

use super::burst::PacketKey;
use super::metrics::Metrics;
use super::{
    CRC_HEX_SIZE, Error, Result, WHOLE_PACKET, crc_hex, crc32, parse_crc_hex, parse_digits,
    push_digits,
};

/// Heartbeat line body.
pub const HEARTBEAT: &[u8] = b"ALIF";

const PREFIX_LEN: usize = 25;
const LINE_LEN: usize = PREFIX_LEN + CRC_HEX_SIZE;
const MAX_PENDING_LINE: usize = 256;

/// Field widths after the 4-byte tag, each followed by a comma.
const FIELDS: [(&str, usize); 4] = [("serial", 4), ("profile", 5), ("packet", 4), ("burst", 3)];

/// Kind of control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKind {
    /// `RXED`: received.
    Received,
    /// `RSND`: resend requested.
    Resend,
}

impl ControlKind {
    /// Four-letter tag on the wire.
    #[must_use]
    pub const fn tag(self) -> &'static [u8; 4] {
        match self {
            Self::Received => b"RXED",
            Self::Resend => b"RSND",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"RXED" => Some(Self::Received),
            b"RSND" => Some(Self::Resend),
            _ => None,
        }
    }
}

/// One `RXED` or `RSND` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlLine {
    /// Line kind.
    pub kind: ControlKind,
    /// Packet the line refers to.
    pub key: PacketKey,
    /// Burst number, or [`WHOLE_PACKET`].
    pub burst: u16,
}

impl ControlLine {
    /// Whole-packet acknowledgement.
    #[must_use]
    pub const fn received(key: PacketKey) -> Self {
        Self {
            kind: ControlKind::Received,
            key,
            burst: WHOLE_PACKET,
        }
    }

    /// Request for one burst.
    #[must_use]
    pub const fn resend_burst(key: PacketKey, burst: u16) -> Self {
        Self {
            kind: ControlKind::Resend,
            key,
            burst,
        }
    }

    /// Request for the whole packet.
    #[must_use]
    pub const fn resend_packet(key: PacketKey) -> Self {
        Self::resend_burst(key, WHOLE_PACKET)
    }

    /// Whether the burst field carries the whole-packet sentinel.
    #[must_use]
    pub const fn is_whole_packet(&self) -> bool {
        self.burst == WHOLE_PACKET
    }

    fn prefix(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LINE_LEN + 2);
        out.extend_from_slice(self.kind.tag());
        out.push(b',');
        push_digits(&mut out, u32::from(self.key.profiler_serial), 4);
        out.push(b',');
        push_digits(&mut out, u32::from(self.key.profile_id), 5);
        out.push(b',');
        push_digits(&mut out, u32::from(self.key.packet_number), 4);
        out.push(b',');
        push_digits(&mut out, u32::from(self.burst), 3);
        out.push(b',');
        out
    }

    /// The line as written to the link, `\r\n` included.
    #[must_use]
    pub fn to_line(&self) -> Vec<u8> {
        let mut out = self.prefix();
        let crc = crc32(&[out.as_slice()]);
        out.extend_from_slice(&crc_hex(crc));
        out.extend_from_slice(b"\r\n");
        out
    }

    /// Parse a line without its terminator.
    pub fn parse(line: &[u8]) -> Result<Self> {
        if line.len() != LINE_LEN {
            return Err(Error::Truncated {
                needed: LINE_LEN,
                got: line.len(),
            });
        }
        let kind = ControlKind::from_tag(&line[..4]).ok_or(Error::MalformedField { field: "tag" })?;

        let mut values = [0u32; 4];
        let mut offset = 4;
        for (&(name, width), value) in FIELDS.iter().zip(values.iter_mut()) {
            if line[offset] != b',' {
                return Err(Error::MalformedField { field: name });
            }
            *value = parse_digits(&line[offset + 1..offset + 1 + width], name)?;
            offset += 1 + width;
        }
        if line[offset] != b',' {
            return Err(Error::MalformedField { field: "crc" });
        }

        let found = parse_crc_hex(&line[PREFIX_LEN..])?;
        let expected = crc32(&[&line[..PREFIX_LEN]]);
        if found != expected {
            return Err(Error::ChecksumMismatch { expected, found });
        }

        let [serial, profile, packet, burst] = values;
        // Field widths bound serial and packet below 10^4, burst below 10^3.
        let profile_id =
            u16::try_from(profile).map_err(|_| Error::MalformedField { field: "profile" })?;
        Ok(Self {
            kind,
            key: PacketKey::new(serial as u16, profile_id, packet as u16),
            burst: burst as u16,
        })
    }
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.to_line();
        let text = String::from_utf8_lossy(&line[..LINE_LEN]);
        f.write_str(&text)
    }
}

/// A line read from the shore station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// `RXED` or `RSND`.
    Control(ControlLine),
    /// `ALIF`.
    Heartbeat,
}

/// Splits an inbound byte stream into control lines.
///
/// Lines end in `\n` (a preceding `\r` is dropped). Modem chatter before a
/// tag on the same line is skipped, and a run of bytes that grows past any
/// valid line length without a terminator is discarded.
#[derive(Debug, Default)]
pub struct LineReader {
    buf: BytesMut,
}

impl LineReader {
    /// Empty reader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Next complete line, `None` until a terminator arrives.
    ///
    /// Invalid lines are reported once and then skipped.
    pub fn next_line(&mut self) -> Option<Result<Inbound>> {
        loop {
            let Some(end) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_PENDING_LINE {
                    debug!(len = self.buf.len(), "discarding unterminated input");
                    self.buf.clear();
                }
                return None;
            };
            let raw = self.buf.split_to(end + 1);
            let line = trim_line(&raw);
            if line.is_empty() {
                continue;
            }
            return Some(classify(line));
        }
    }
}

fn trim_line(raw: &[u8]) -> &[u8] {
    let mut line = &raw[..raw.len() - 1];
    while let [rest @ .., b'\r' | b' '] = line {
        line = rest;
    }
    line
}

fn classify(line: &[u8]) -> Result<Inbound> {
    if line.ends_with(HEARTBEAT) && line.len() < LINE_LEN {
        return Ok(Inbound::Heartbeat);
    }
    let start = line
        .windows(4)
        .rposition(|window| ControlKind::from_tag(window).is_some())
        .ok_or(Error::MalformedField { field: "tag" })?;
    match ControlLine::parse(&line[start..]) {
        Ok(control) => {
            Metrics::record_control_received();
            Ok(Inbound::Control(control))
        }
        Err(err) => {
            if matches!(err, Error::ChecksumMismatch { .. }) {
                Metrics::record_crc_failure();
            }
            Err(err)
        }
    }
}
