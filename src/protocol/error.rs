//! Wire-level error types

use thiserror::Error;

/// Errors raised while building, encoding, framing, or parsing packets
#[derive(Error, Debug)]
pub enum Error {
    /// Burst does not start with the "BRST" magic
    #[error("invalid burst magic: {found:?}")]
    InvalidMagic {
        /// Bytes found where the magic was expected
        found: [u8; 4],
    },

    /// A fixed-width field held something other than its expected characters
    #[error("malformed {field} field")]
    MalformedField {
        /// Name of the offending field
        field: &'static str,
    },

    /// CRC32 carried on the wire does not match the computed value
    #[error("checksum mismatch: expected {expected:#010x}, got {found:#010x}")]
    ChecksumMismatch {
        /// Computed checksum
        expected: u32,
        /// Checksum found on the wire
        found: u32,
    },

    /// Burst size is not a power of two in the permitted range
    #[error("invalid burst size {size} (power of two in 128..=8192 required)")]
    InvalidBurstSize {
        /// Rejected burst size
        size: usize,
    },

    /// Packet needs more bursts than the 3-digit burst field can address
    #[error("packet of {len} bytes needs {count} bursts (max {max})")]
    TooManyBursts {
        /// Serialized packet length
        len: usize,
        /// Bursts required
        count: usize,
        /// Maximum addressable bursts
        max: usize,
    },

    /// Buffer ended before a complete structure was read
    #[error("truncated input: need {needed} bytes, got {got}")]
    Truncated {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// Unknown sensor type character
    #[error("unknown sensor type {0:?}")]
    UnknownSensor(char),

    /// Unknown pipeline stage code in a Data Packet header
    #[error("unknown {stage} code {code:?}")]
    UnknownStage {
        /// Stage name
        stage: &'static str,
        /// Offending code character
        code: char,
    },

    /// Byte count is not a whole number of sensor items
    #[error("{len} bytes is not a whole number of {sensor} items ({item_size} bytes each)")]
    PartialItem {
        /// Sensor class
        sensor: &'static str,
        /// Offending byte count
        len: usize,
        /// Size of one item
        item_size: usize,
    },

    /// A count exceeds the width of its ASCII field
    #[error("{field} value {value} does not fit its field")]
    FieldOverflow {
        /// Name of the field
        field: &'static str,
        /// Rejected value
        value: usize,
    },

    /// Transmit instructions are inconsistent
    #[error("invalid transmit instructions: {0}")]
    InvalidInstructions(&'static str),

    /// An encoding pipeline stage could not invert its input
    #[error("{stage} stage failed: {reason}")]
    Pipeline {
        /// Stage name
        stage: &'static str,
        /// Failure description
        reason: String,
    },

    /// IO error while reading sample sources or running a stream codec
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn pipeline(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::Pipeline {
            stage,
            reason: reason.into(),
        }
    }
}
