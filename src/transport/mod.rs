//! Links and the ARQ state machines that move profiles across them

#[cfg(feature = "debug-tools")]
mod debug;
mod driver;
mod error;
mod handoff;
mod link;
mod receiver;
mod sender;
mod socket;
mod status;

#[cfg(feature = "debug-tools")]
pub use debug::{CaptureLink, Direction, PcapRecorder};
pub use driver::{receive_session, transmit_profile};
pub use error::TransportError;
pub use handoff::{ProfileReceiver, ProfileSender, profile_channel};
pub use link::{Link, MemoryLink};
pub use receiver::{ReceiveOutcome, ReceivedProfile, Receiver, ReceiverConfig};
pub use sender::{Sender, SenderConfig, TransferStatus};
pub use socket::TcpLink;
pub use status::{BurstStatus, BurstTable, PacketStatus};
