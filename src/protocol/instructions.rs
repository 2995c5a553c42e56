//! Transmit instructions supplied by the surrounding firmware.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::pipeline::StageFlags;
use super::types::MAX_NOISE_BITS;
use super::{
    AsciiEncoding, Compression, Error, MAX_BURST_SIZE, MIN_BURST_SIZE, NoiseBits, Representation,
    Result,
};

/// How a profile's Data Packets are encoded and framed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransmitInstructions {
    /// Gray-code samples before transposition.
    pub representation: Representation,
    /// Apply bit-plane transposition.
    pub use_bitplanes: bool,
    /// Low bits dropped before transposition (ignored without bit-planes).
    pub noise_bits_remove: u8,
    /// Whole-payload compression.
    pub compression: Compression,
    /// ASCII-safe body encoding for links that are not 8-bit clean.
    pub encoding: AsciiEncoding,
    /// Burst payload size in bytes (power of two, 128..=8192).
    pub burst_size: usize,
}

impl Default for TransmitInstructions {
    fn default() -> Self {
        Self {
            representation: Representation::Gray,
            use_bitplanes: true,
            noise_bits_remove: 0,
            compression: Compression::Deflate,
            encoding: AsciiEncoding::None,
            burst_size: 1024,
        }
    }
}

impl TransmitInstructions {
    /// Instructions that leave payloads untouched.
    #[must_use]
    pub fn identity(burst_size: usize) -> Self {
        Self {
            representation: Representation::Binary,
            use_bitplanes: false,
            noise_bits_remove: 0,
            compression: Compression::None,
            encoding: AsciiEncoding::None,
            burst_size,
        }
    }

    /// Check the burst size and noise-bit count.
    pub fn validate(&self) -> Result<()> {
        validate_burst_size(self.burst_size)?;
        if self.noise_bits_remove > MAX_NOISE_BITS {
            return Err(Error::InvalidInstructions("noise_bits_remove must be in 0..=7"));
        }
        if !self.use_bitplanes && self.noise_bits_remove > 0 {
            return Err(Error::InvalidInstructions(
                "noise bits can only be removed together with bit-planes",
            ));
        }
        Ok(())
    }

    /// Transposition stage recorded in the Data Packet header.
    #[must_use]
    pub const fn noise_bits(&self) -> NoiseBits {
        if self.use_bitplanes {
            NoiseBits::Removed(self.noise_bits_remove)
        } else {
            NoiseBits::NotTransposed
        }
    }

    /// Stage flags applied to every Data Packet.
    #[must_use]
    pub const fn stage_flags(&self) -> StageFlags {
        StageFlags {
            representation: self.representation,
            noise_bits: self.noise_bits(),
            compression: self.compression,
            encoding: self.encoding,
        }
    }
}

/// Check that `size` is a power of two within the permitted burst range.
pub(crate) fn validate_burst_size(size: usize) -> Result<()> {
    if size.is_power_of_two() && (MIN_BURST_SIZE..=MAX_BURST_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(Error::InvalidBurstSize { size })
    }
}
