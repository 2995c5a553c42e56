//! Wire formats for profile transfer
//!
//! This module provides the packet model, the reversible encoding pipeline,
//! burst framing, and the text control lines exchanged with the shore station.

pub mod burst;
pub mod control;
mod error;
mod instructions;
pub(crate) mod metrics;
mod packet;
pub mod pipeline;
mod profile;
mod types;

pub use burst::{Burst, BurstKind, BurstReader, FramedPacket, PacketKey};
pub use control::{ControlKind, ControlLine, Inbound, LineReader, HEARTBEAT};
pub use error::{Error, Result};
pub use instructions::TransmitInstructions;
pub use metrics::{MetricsSnapshot, snapshot as metrics_snapshot};
pub use packet::{DataPacket, DataPacketHeader, InfoPacket, Packet, SENSOR_ID_LEN, sensor_id};
pub use profile::{
    ClassCounts, FinalizedProfile, PackagedProfile, PacketDefinition, ProfileBuilder,
    package_profile,
};
pub use types::{AsciiEncoding, Compression, NoiseBits, Representation, SensorType};

/// Burst magic: "BRST" in ASCII
pub const BURST_MAGIC: &[u8; 4] = b"BRST";

/// Burst header size in bytes (ASCII, fixed width)
pub const BURST_HEADER_SIZE: usize = 24;

/// Hex-encoded CRC32 size in bytes
pub const CRC_HEX_SIZE: usize = 8;

/// Framing overhead of every burst (header + CRC)
pub const BURST_OVERHEAD: usize = BURST_HEADER_SIZE + CRC_HEX_SIZE;

/// Smallest permitted burst payload size
pub const MIN_BURST_SIZE: usize = 128;

/// Largest permitted burst payload size
pub const MAX_BURST_SIZE: usize = 8192;

/// Largest number of data bursts per packet; 999 in the 3-digit burst field
/// is reserved for "whole packet" in control lines
pub const MAX_BURSTS_PER_PACKET: usize = 998;

/// Burst-number sentinel meaning "the whole packet" in control lines
pub const WHOLE_PACKET: u16 = 999;

/// Data Packet header size in bytes
pub const DATA_HEADER_SIZE: usize = 38;

/// Info Packet size in bytes (header + reserved metadata block)
pub const INFO_PACKET_SIZE: usize = 64;

/// Size of the per-sample auxiliary block shared by every sensor class
pub const AUX_BLOCK_SIZE: usize = 16;

/// Computes the CRC32 used by bursts and control lines.
#[must_use]
pub fn crc32(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Writes `value % 10^width` as zero-padded ASCII digits.
pub(crate) fn push_digits(out: &mut Vec<u8>, value: u32, width: usize) {
    let modulus = 10u32.pow(width as u32);
    let value = value % modulus;
    out.extend_from_slice(format!("{value:0width$}").as_bytes());
}

/// Parses a fixed-width field of ASCII digits.
pub(crate) fn parse_digits(field: &[u8], name: &'static str) -> Result<u32> {
    if field.is_empty() || !field.iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedField { field: name });
    }
    Ok(field
        .iter()
        .fold(0u32, |acc, digit| acc * 10 + u32::from(digit - b'0')))
}

/// Parses 8 hex digits (either case) into a CRC32 value.
pub(crate) fn parse_crc_hex(field: &[u8]) -> Result<u32> {
    if field.len() != CRC_HEX_SIZE || !field.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::MalformedField { field: "crc" });
    }
    let text = std::str::from_utf8(field).map_err(|_| Error::MalformedField { field: "crc" })?;
    u32::from_str_radix(text, 16).map_err(|_| Error::MalformedField { field: "crc" })
}

/// Formats a CRC32 value as 8 uppercase hex digits.
pub(crate) fn crc_hex(crc: u32) -> [u8; CRC_HEX_SIZE] {
    let mut out = [0u8; CRC_HEX_SIZE];
    out.copy_from_slice(format!("{crc:08X}").as_bytes());
    out
}
