//! Sender state machine for one packaged profile.
//!
//! The sender never touches the link. Callers feed it inbound bytes and the
//! current time, and write out whatever bursts it hands back.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::protocol::metrics::Metrics;
use crate::protocol::{
    ControlKind, ControlLine, FramedPacket, Inbound, LineReader, PackagedProfile, PacketKey,
    Result,
};

use super::status::{BurstStatus, BurstTable, PacketStatus};

/// Sender timing and I/O parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SenderConfig {
    /// Give up when no input arrives for this long.
    pub quiescence_timeout: Duration,
    /// Re-send terminal bursts when idle and unacknowledged for this long.
    pub solicit_interval: Duration,
    /// Deadline for writing one burst.
    pub write_timeout: Duration,
    /// Bytes read from the link per poll.
    pub read_chunk: usize,
    /// Sleep between polls when nothing happened.
    pub poll_interval: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            quiescence_timeout: Duration::from_secs(120),
            solicit_interval: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
            read_chunk: 1024,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Coarse outcome of a profile transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransferStatus {
    /// Every packet was acknowledged.
    Success,
    /// The link failed or went quiet.
    ModemFail,
    /// The profile could not be packaged; nothing was sent.
    PackageFail,
    /// The caller abandoned the transfer.
    Cancelled,
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::ModemFail => "modem failure",
            Self::PackageFail => "package failure",
            Self::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug)]
struct OutboundPacket {
    framed: FramedPacket,
    status: PacketStatus,
    bursts: BurstTable,
}

impl OutboundPacket {
    fn new(framed: FramedPacket) -> Self {
        let bursts = BurstTable::new(framed.burst_count());
        Self {
            framed,
            status: PacketStatus::Unsent,
            bursts,
        }
    }
}

/// Drives the bursts of one profile until every packet is acknowledged.
#[derive(Debug)]
pub struct Sender {
    config: SenderConfig,
    profile: (u16, u16),
    packets: Vec<OutboundPacket>,
    lines: LineReader,
    last_input: Instant,
    last_control: Instant,
}

impl Sender {
    /// Encode and frame every packet of `profile`.
    ///
    /// Fails before anything is marked sent when a packet cannot be encoded
    /// or framed.
    pub fn new(profile: &PackagedProfile, config: SenderConfig, now: Instant) -> Result<Self> {
        let serial = profile.profiler_serial();
        let profile_id = profile.profile_id();

        let mut packets = Vec::with_capacity(profile.packet_count());
        let info = Bytes::from(profile.info.to_bytes());
        packets.push(OutboundPacket::new(FramedPacket::frame(
            PacketKey::new(serial, profile_id, 0),
            info,
            profile.burst_size,
        )?));
        for packet in &profile.data {
            let bytes = packet.encode(&profile.flags)?;
            let key = PacketKey::new(serial, profile_id, packet.packet_number());
            packets.push(OutboundPacket::new(FramedPacket::frame(
                key,
                bytes,
                profile.burst_size,
            )?));
        }

        debug!(
            profiler_serial = serial,
            profile_id,
            packets = packets.len(),
            bursts = packets.iter().map(|p| p.bursts.len()).sum::<usize>(),
            "sender ready"
        );
        Ok(Self {
            config,
            profile: (serial, profile_id),
            packets,
            lines: LineReader::new(),
            last_input: now,
            last_control: now,
        })
    }

    /// Sender configuration.
    #[must_use]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Next burst to write, lowest packet first and ascending within a packet.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        for (number, packet) in self.packets.iter_mut().enumerate() {
            if packet.status != PacketStatus::Unsent {
                continue;
            }
            let Some(index) = packet.bursts.next_unsent() else {
                // Packet 0 stays unsent until the receiver acknowledges it.
                if number != 0 {
                    packet.status = PacketStatus::Sent;
                }
                continue;
            };
            let Some(wire) = packet.framed.render(index) else {
                continue;
            };
            let resent = packet.bursts.mark_sent(index);
            Metrics::record_burst_sent(wire.len(), resent);
            if number != 0 && packet.bursts.all_sent() {
                packet.status = PacketStatus::Sent;
            }
            trace!(packet = number, burst = index, resent, "burst queued");
            return Some(wire);
        }
        None
    }

    /// Feed bytes read from the link.
    pub fn handle_input(&mut self, bytes: &[u8], now: Instant) {
        self.lines.push(bytes);
        while let Some(line) = self.lines.next_line() {
            match line {
                Ok(Inbound::Heartbeat) => {
                    trace!("heartbeat");
                    self.last_input = now;
                }
                Ok(Inbound::Control(control)) => {
                    self.last_input = now;
                    self.handle_control(control, now);
                }
                Err(err) => debug!(error = %err, "discarding control line"),
            }
        }
    }

    /// Apply one verified control line.
    pub fn handle_control(&mut self, line: ControlLine, now: Instant) {
        if line.key.profile() != self.profile {
            debug!(%line, "control line for another profile");
            return;
        }
        self.last_control = now;
        let number = line.key.packet_number;
        let Some(packet) = self.packets.get_mut(usize::from(number)) else {
            debug!(%line, "control line for unknown packet");
            return;
        };

        match line.kind {
            ControlKind::Received if line.is_whole_packet() => {
                if packet.status != PacketStatus::Confirmed {
                    packet.status = PacketStatus::Confirmed;
                    packet.bursts.confirm_all();
                    Metrics::record_packet_confirmed();
                    info!(packet = number, "packet confirmed");
                }
            }
            ControlKind::Received => {
                trace!(packet = number, burst = line.burst, "ignoring per-burst acknowledgement");
            }
            // A resend request reopens a packet even after it was confirmed.
            ControlKind::Resend if line.is_whole_packet() => {
                let was = packet.status;
                packet.bursts.reset();
                packet.status = PacketStatus::Unsent;
                debug!(packet = number, ?was, "whole packet resend requested");
            }
            ControlKind::Resend => {
                let was = packet.status;
                if packet.bursts.mark_unsent(line.burst) {
                    packet.status = PacketStatus::Unsent;
                    debug!(packet = number, burst = line.burst, ?was, "burst resend requested");
                } else {
                    debug!(packet = number, burst = line.burst, "resend for unknown burst");
                }
            }
        }
    }

    /// Check timers; `Some` once the transfer is over.
    pub fn poll_status(&mut self, now: Instant) -> Option<TransferStatus> {
        if self.is_complete() {
            return Some(TransferStatus::Success);
        }
        let quiet = now.saturating_duration_since(self.last_input);
        if quiet >= self.config.quiescence_timeout {
            warn!(
                quiet_secs = quiet.as_secs(),
                unconfirmed = self.unconfirmed().count(),
                "no input from shore; giving up"
            );
            return Some(TransferStatus::ModemFail);
        }
        if self.is_idle()
            && now.saturating_duration_since(self.last_control) >= self.config.solicit_interval
        {
            self.solicit();
            self.last_control = now;
        }
        None
    }

    /// True when every packet is confirmed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.packets
            .iter()
            .all(|packet| packet.status == PacketStatus::Confirmed)
    }

    /// True when no burst waits to be written.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.packets.iter().all(|packet| packet.bursts.all_sent())
    }

    /// Packets in the profile, packet 0 included.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    /// Data bursts of one packet.
    #[must_use]
    pub fn burst_count(&self, packet: u16) -> Option<u16> {
        self.packets
            .get(usize::from(packet))
            .map(|p| p.framed.burst_count())
    }

    /// Status of one packet.
    #[must_use]
    pub fn packet_status(&self, packet: u16) -> Option<PacketStatus> {
        self.packets.get(usize::from(packet)).map(|p| p.status)
    }

    /// Status of one burst.
    #[must_use]
    pub fn burst_status(&self, packet: u16, burst: u16) -> Option<BurstStatus> {
        self.packets
            .get(usize::from(packet))
            .and_then(|p| p.bursts.get(burst))
    }

    /// Times a burst was written.
    #[must_use]
    pub fn attempts(&self, packet: u16, burst: u16) -> u32 {
        self.packets
            .get(usize::from(packet))
            .map_or(0, |p| p.bursts.attempts(burst))
    }

    fn unconfirmed(&self) -> impl Iterator<Item = &OutboundPacket> {
        self.packets
            .iter()
            .filter(|packet| packet.status != PacketStatus::Confirmed)
    }

    fn solicit(&mut self) {
        let mut solicited = 0;
        for packet in &mut self.packets {
            if packet.status == PacketStatus::Confirmed {
                continue;
            }
            let terminal = packet.framed.terminal_index();
            packet.bursts.mark_unsent(terminal);
            packet.status = PacketStatus::Unsent;
            solicited += 1;
        }
        debug!(packets = solicited, "soliciting acknowledgements");
    }
}
