//! Sensor classes and pipeline stage codes

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{AUX_BLOCK_SIZE, Error, Result};

/// Sensor classes carried by a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorType {
    /// Starboard hyperspectral radiometer
    Starboard,
    /// Port hyperspectral radiometer
    Port,
    /// Multispectral OCR radiometer
    Ocr,
    /// MCOMS chlorophyll/backscatter/CDOM sensor
    Mcoms,
}

/// Binned spectrum counts per radiometer item
pub const RADIOMETER_PIXELS: usize = 32;

/// Channels per OCR item
pub const OCR_CHANNELS: usize = 4;

/// Channels per MCOMS item
pub const MCOMS_CHANNELS: usize = 3;

impl SensorType {
    /// Sensor classes in packet-numbering order
    pub const ALL: [Self; 4] = [Self::Starboard, Self::Port, Self::Ocr, Self::Mcoms];

    /// Convert from the header character
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'S' => Ok(Self::Starboard),
            b'P' => Ok(Self::Port),
            b'O' => Ok(Self::Ocr),
            b'M' => Ok(Self::Mcoms),
            other => Err(Error::UnknownSensor(char::from(other))),
        }
    }

    /// Convert to the header character
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::Starboard => b'S',
            Self::Port => b'P',
            Self::Ocr => b'O',
            Self::Mcoms => b'M',
        }
    }

    /// Position in [`SensorType::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Starboard => 0,
            Self::Port => 1,
            Self::Ocr => 2,
            Self::Mcoms => 3,
        }
    }

    /// Serialized size of one item (channels + aux block)
    ///
    /// ```text
    /// radiometer: 32 x u16 spectrum            + aux = 80
    /// OCR:        4 x u32                       + aux = 32
    /// MCOMS:      3 x (2 x u16 + u32)           + aux = 40
    /// ```
    #[must_use]
    pub const fn item_size(self) -> usize {
        let channels = match self {
            Self::Starboard | Self::Port => RADIOMETER_PIXELS * 2,
            Self::Ocr => OCR_CHANNELS * 4,
            Self::Mcoms => MCOMS_CHANNELS * (2 * 2 + 4),
        };
        channels + AUX_BLOCK_SIZE
    }

    /// Fixed number of items packed into one Data Packet
    #[must_use]
    pub const fn items_per_packet(self) -> u16 {
        match self {
            Self::Starboard | Self::Port => 100,
            Self::Ocr => 250,
            Self::Mcoms => 200,
        }
    }

    /// Human-readable class name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Starboard => "starboard",
            Self::Port => "port",
            Self::Ocr => "ocr",
            Self::Mcoms => "mcoms",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample representation before transposition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Representation {
    /// Samples are Gray-coded
    #[default]
    Gray,
    /// Samples are left in plain binary
    Binary,
}

impl Representation {
    /// Convert from the header character
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'G' => Ok(Self::Gray),
            b'B' => Ok(Self::Binary),
            other => Err(Error::UnknownStage {
                stage: "representation",
                code: char::from(other),
            }),
        }
    }

    /// Convert to the header character
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::Gray => b'G',
            Self::Binary => b'B',
        }
    }
}

/// Bit-plane transposition stage, with the number of low bits dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NoiseBits {
    /// Samples are not transposed (`'N'`)
    NotTransposed,
    /// Samples are transposed after dropping this many low bits (`'0'..='7'`)
    Removed(u8),
}

/// Largest number of low bits that may be dropped
pub const MAX_NOISE_BITS: u8 = 7;

impl NoiseBits {
    /// Convert from the header character
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'N' => Ok(Self::NotTransposed),
            b'0'..=b'7' => Ok(Self::Removed(code - b'0')),
            other => Err(Error::UnknownStage {
                stage: "noise-bits",
                code: char::from(other),
            }),
        }
    }

    /// Convert to the header character
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::NotTransposed => b'N',
            Self::Removed(bits) => b'0' + bits,
        }
    }

    /// Low bits dropped before transposition (0 when not transposed)
    #[must_use]
    pub const fn removed(self) -> u8 {
        match self {
            Self::NotTransposed => 0,
            Self::Removed(bits) => bits,
        }
    }
}

/// Compression stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Compression {
    /// No compression (`'0'`)
    #[default]
    None,
    /// Raw DEFLATE (`'G'`)
    Deflate,
}

impl Compression {
    /// Convert from the header character
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'0' => Ok(Self::None),
            b'G' => Ok(Self::Deflate),
            other => Err(Error::UnknownStage {
                stage: "compression",
                code: char::from(other),
            }),
        }
    }

    /// Convert to the header character
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::None => b'0',
            Self::Deflate => b'G',
        }
    }
}

/// ASCII-safe encoding stage, used when the link is not 8-bit clean
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AsciiEncoding {
    /// Binary body (`'N'`)
    #[default]
    None,
    /// ASCII85 (`'A'`)
    Ascii85,
    /// Base64 (`'B'`)
    Base64,
}

impl AsciiEncoding {
    /// Convert from the header character
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            b'N' => Ok(Self::None),
            b'A' => Ok(Self::Ascii85),
            b'B' => Ok(Self::Base64),
            other => Err(Error::UnknownStage {
                stage: "ascii-encoding",
                code: char::from(other),
            }),
        }
    }

    /// Convert to the header character
    #[must_use]
    pub const fn as_code(self) -> u8 {
        match self {
            Self::None => b'N',
            Self::Ascii85 => b'A',
            Self::Base64 => b'B',
        }
    }
}
