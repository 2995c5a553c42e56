//! castlink - profile transfer between an ocean profiler and its shore station
//!
//! A finalized profile is split into an Info Packet and Data Packets, each
//! Data Packet is run through a reversible encoding pipeline, and every
//! packet is cut into CRC-checked bursts. The receiver acknowledges whole
//! packets (`RXED`) and asks for what it is missing (`RSND`) until the
//! profile is complete.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use castlink::{MemoryLink, ProfileBuilder, SenderConfig, SensorType, TransmitInstructions};
//!
//! let mut builder = ProfileBuilder::new(770, 12_345);
//! builder.append_samples(SensorType::Starboard, &[0u8; 5 * 80])?;
//! let profile = builder.finalize();
//!
//! let (mut link, _shore) = MemoryLink::pair();
//! let status = castlink::transmit_profile(
//!     &mut link,
//!     &profile,
//!     &TransmitInstructions::default(),
//!     &SenderConfig::default(),
//!     &AtomicBool::new(false),
//! );
//! println!("transfer finished: {status}");
//! # Ok::<(), castlink::Error>(())
//! ```
//!
//! # Features
//!
//! - **Reversible encoding** - Gray code, bit-plane transposition, DEFLATE, ASCII85/Base64
//! - **Selective repeat** - single bursts are resent, not whole packets
//! - **Sans-I/O state machines** - `Sender` and `Receiver` take time as a parameter
//! - **Capture** - pcap recording of link traffic behind the `debug-tools` feature

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod protocol;
pub mod transport;

pub use protocol::{
    Error, FinalizedProfile, PackagedProfile, ProfileBuilder, Result, SensorType,
    TransmitInstructions, metrics_snapshot, package_profile,
};
pub use transport::{
    Link, MemoryLink, ReceiveOutcome, ReceiverConfig, SenderConfig, TcpLink, TransferStatus,
    profile_channel, receive_session, transmit_profile,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
