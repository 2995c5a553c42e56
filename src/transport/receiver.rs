//! Receiver state machine: rebuilds profiles from bursts and answers with
//! control lines.
//!
//! Assembly state is keyed by `(profiler serial, profile id)`, so bursts of
//! different profiles never merge. A packet is rebuilt once its terminal
//! burst has been seen and every announced data burst is present.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::protocol::metrics::Metrics;
use crate::protocol::{
    Burst, BurstKind, BurstReader, ControlLine, DataPacket, HEARTBEAT, InfoPacket,
    MAX_BURST_SIZE, Packet, PacketKey,
};

/// Receiver timing and resource limits.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReceiverConfig {
    /// Silence after which missing bursts and packets are requested.
    pub resend_timeout: Duration,
    /// Interval between `ALIF` heartbeats.
    pub heartbeat_interval: Duration,
    /// Silence after which the session is abandoned.
    pub session_timeout: Duration,
    /// Deadline for writing one control line.
    pub write_timeout: Duration,
    /// Bytes read from the link per poll.
    pub read_chunk: usize,
    /// Largest data burst payload accepted.
    pub max_burst_size: usize,
    /// Burst bytes held for incomplete packets before new bursts are dropped.
    pub max_buffered_bytes: usize,
    /// Sleep between polls when nothing happened.
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            resend_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(10),
            session_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
            read_chunk: 4096,
            max_burst_size: MAX_BURST_SIZE,
            max_buffered_bytes: 16 * 1024 * 1024,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// A profile as rebuilt by the receiver, possibly incomplete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedProfile {
    profiler_serial: u16,
    profile_id: u16,
    info: Option<InfoPacket>,
    data: BTreeMap<u16, DataPacket>,
}

impl ReceivedProfile {
    fn new((profiler_serial, profile_id): (u16, u16)) -> Self {
        Self {
            profiler_serial,
            profile_id,
            info: None,
            data: BTreeMap::new(),
        }
    }

    /// Profiler serial number.
    #[must_use]
    pub const fn profiler_serial(&self) -> u16 {
        self.profiler_serial
    }

    /// Profile id.
    #[must_use]
    pub const fn profile_id(&self) -> u16 {
        self.profile_id
    }

    /// Packet 0, once rebuilt.
    #[must_use]
    pub fn info(&self) -> Option<&InfoPacket> {
        self.info.as_ref()
    }

    /// One rebuilt Data Packet.
    #[must_use]
    pub fn data_packet(&self, packet_number: u16) -> Option<&DataPacket> {
        self.data.get(&packet_number)
    }

    /// Rebuilt Data Packets in packet-number order.
    pub fn data_packets(&self) -> impl Iterator<Item = &DataPacket> {
        self.data.values()
    }

    /// Data Packets announced by packet 0.
    #[must_use]
    pub fn expected_packets(&self) -> Option<u32> {
        self.info.as_ref().map(|info| info.definition.total_packets())
    }

    /// Announced Data Packets not rebuilt yet; empty until packet 0 arrives.
    #[must_use]
    pub fn missing_packets(&self) -> Vec<u16> {
        let Some(total) = self.expected_packets() else {
            return Vec::new();
        };
        (1..=total)
            .filter_map(|n| u16::try_from(n).ok())
            .filter(|n| !self.data.contains_key(n))
            .collect()
    }

    /// Packet 0 and every announced Data Packet are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.info.is_some() && self.missing_packets().is_empty()
    }
}

/// How a receive session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Every profile seen on the link was rebuilt.
    Complete(Vec<ReceivedProfile>),
    /// The link went quiet first.
    TimedOut {
        /// Whatever was rebuilt.
        partial: Vec<ReceivedProfile>,
    },
    /// The link failed.
    Disconnected {
        /// Whatever was rebuilt.
        partial: Vec<ReceivedProfile>,
    },
    /// The caller abandoned the session.
    Cancelled {
        /// Whatever was rebuilt.
        partial: Vec<ReceivedProfile>,
    },
}

impl ReceiveOutcome {
    /// Profiles carried by the outcome.
    #[must_use]
    pub fn profiles(&self) -> &[ReceivedProfile] {
        match self {
            Self::Complete(profiles)
            | Self::TimedOut { partial: profiles }
            | Self::Disconnected { partial: profiles }
            | Self::Cancelled { partial: profiles } => profiles,
        }
    }

    /// True for [`ReceiveOutcome::Complete`].
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

#[derive(Debug, Default)]
struct PacketAssembly {
    needed: Option<u16>,
    bursts: BTreeMap<u16, Bytes>,
    terminal_seen: bool,
    have: bool,
}

impl PacketAssembly {
    fn has_all_bursts(&self) -> bool {
        self.needed
            .is_some_and(|needed| (1..=needed).all(|index| self.bursts.contains_key(&index)))
    }

    fn ready(&self) -> bool {
        !self.have && self.terminal_seen && self.has_all_bursts()
    }

    fn missing(&self) -> impl Iterator<Item = u16> + '_ {
        let needed = self.needed.unwrap_or(0);
        (1..=needed).filter(|index| !self.bursts.contains_key(index))
    }

    fn buffered(&self) -> usize {
        self.bursts.values().map(Bytes::len).sum()
    }

    fn restart(&mut self) {
        self.needed = None;
        self.bursts.clear();
        self.terminal_seen = false;
    }
}

#[derive(Debug, Default)]
struct Outbox {
    lines: VecDeque<Vec<u8>>,
}

impl Outbox {
    fn control(&mut self, line: ControlLine) {
        debug!(%line, "control line queued");
        Metrics::record_control_sent();
        self.lines.push_back(line.to_line());
    }

    fn heartbeat(&mut self) {
        let mut line = HEARTBEAT.to_vec();
        line.extend_from_slice(b"\r\n");
        self.lines.push_back(line);
    }
}

#[derive(Debug)]
struct ProfileAssembly {
    packets: BTreeMap<u16, PacketAssembly>,
    received: ReceivedProfile,
}

impl ProfileAssembly {
    fn new(profile: (u16, u16)) -> Self {
        Self {
            packets: BTreeMap::new(),
            received: ReceivedProfile::new(profile),
        }
    }

    fn key(&self, packet_number: u16) -> PacketKey {
        PacketKey::new(
            self.received.profiler_serial,
            self.received.profile_id,
            packet_number,
        )
    }

    fn on_announce(&mut self, number: u16, burst_count: u16, out: &mut Outbox) {
        let packet = self.packets.entry(number).or_default();
        if packet.have {
            trace!(packet = number, "announce for rebuilt packet");
            return;
        }
        if packet.needed.is_some_and(|needed| needed != burst_count) {
            debug!(packet = number, burst_count, "burst count changed; restarting packet");
            packet.restart();
        }
        packet.needed = Some(burst_count);
        packet.bursts.retain(|index, _| *index <= burst_count);
        if packet.ready() {
            self.reassemble(number, out);
        }
    }

    fn on_data(&mut self, number: u16, index: u16, payload: Bytes, out: &mut Outbox) {
        let packet = self.packets.entry(number).or_default();
        if packet.have {
            trace!(packet = number, burst = index, "duplicate burst for rebuilt packet");
            return;
        }
        if packet.needed.is_some_and(|needed| index > needed) {
            debug!(packet = number, burst = index, "burst beyond announced count");
            return;
        }
        packet.bursts.insert(index, payload);
        if packet.ready() {
            self.reassemble(number, out);
        }
    }

    fn on_terminal(&mut self, number: u16, out: &mut Outbox) {
        let packet = self.packets.entry(number).or_default();
        if packet.have {
            // The sender missed our acknowledgement.
            out.control(ControlLine::received(self.key(number)));
            return;
        }
        packet.terminal_seen = true;
        if packet.has_all_bursts() {
            self.reassemble(number, out);
        } else {
            self.request(number, out);
        }
    }

    /// Ask for whatever `number` still lacks.
    fn request(&self, number: u16, out: &mut Outbox) {
        let key = self.key(number);
        match self.packets.get(&number) {
            Some(packet) if packet.have => {}
            Some(packet) if packet.needed.is_some() => {
                for index in packet.missing() {
                    out.control(ControlLine::resend_burst(key, index));
                }
            }
            _ => out.control(ControlLine::resend_packet(key)),
        }
    }

    /// Requests issued when the link has gone quiet.
    fn request_outstanding(&mut self, out: &mut Outbox) {
        let mut wanted: Vec<u16> = self
            .packets
            .iter()
            .filter(|(_, packet)| !packet.have)
            .map(|(number, _)| *number)
            .collect();
        if !self.packets.contains_key(&0) {
            wanted.insert(0, 0);
        }
        wanted.extend(
            self.received
                .missing_packets()
                .into_iter()
                .filter(|number| !self.packets.contains_key(number)),
        );

        for number in wanted {
            let lost_terminal = self
                .packets
                .get(&number)
                .is_some_and(|packet| !packet.have && packet.has_all_bursts());
            if lost_terminal {
                self.reassemble(number, out);
            } else {
                self.request(number, out);
            }
        }
    }

    fn reassemble(&mut self, number: u16, out: &mut Outbox) {
        let key = self.key(number);
        let Some(packet) = self.packets.get_mut(&number) else {
            return;
        };
        let mut bytes = BytesMut::with_capacity(packet.buffered());
        for payload in packet.bursts.values() {
            bytes.extend_from_slice(payload);
        }

        match Packet::decode(&bytes) {
            Ok(decoded) if belongs_to(&decoded, key) => {
                packet.have = true;
                packet.bursts.clear();
                match decoded {
                    Packet::Info(info) => {
                        info!(
                            profile_id = key.profile_id,
                            data_packets = info.definition.total_packets(),
                            "info packet rebuilt"
                        );
                        self.received.info = Some(info);
                    }
                    Packet::Data(data) => {
                        info!(
                            profile_id = key.profile_id,
                            packet = number,
                            items = data.header().item_count,
                            "data packet rebuilt"
                        );
                        self.received.data.insert(number, data);
                    }
                }
                Metrics::record_packet_reassembled();
                out.control(ControlLine::received(key));
                self.sweep(out);
            }
            Ok(_) => {
                warn!(packet = number, "rebuilt packet names another packet; requesting resend");
                packet.restart();
                out.control(ControlLine::resend_packet(key));
            }
            Err(err) => {
                warn!(packet = number, error = %err, "rebuilt packet failed to decode; requesting resend");
                packet.restart();
                out.control(ControlLine::resend_packet(key));
            }
        }
    }

    /// Rebuild any other packet whose bursts have meanwhile completed.
    fn sweep(&mut self, out: &mut Outbox) {
        while let Some(number) = self
            .packets
            .iter()
            .find(|(_, packet)| packet.ready())
            .map(|(number, _)| *number)
        {
            self.reassemble(number, out);
        }
    }

    fn is_settled(&self) -> bool {
        self.received.is_complete()
    }

    fn buffered(&self) -> usize {
        self.packets.values().map(PacketAssembly::buffered).sum()
    }
}

fn belongs_to(packet: &Packet, key: PacketKey) -> bool {
    match packet {
        Packet::Info(info) => {
            key.packet_number == 0
                && info.profiler_serial == key.profiler_serial
                && info.profile_id == key.profile_id
        }
        Packet::Data(data) => {
            let header = data.header();
            header.packet_number == key.packet_number
                && header.profiler_serial == key.profiler_serial
                && header.profile_id == key.profile_id
        }
    }
}

/// Rebuilds profiles from an inbound burst stream.
#[derive(Debug)]
pub struct Receiver {
    config: ReceiverConfig,
    reader: BurstReader,
    profiles: BTreeMap<(u16, u16), ProfileAssembly>,
    outbox: Outbox,
    last_burst: Instant,
    last_resend: Instant,
    last_heartbeat: Instant,
}

impl Receiver {
    /// Receiver whose timers start at `now`.
    #[must_use]
    pub fn new(config: ReceiverConfig, now: Instant) -> Self {
        let reader = BurstReader::new(config.max_burst_size);
        Self {
            config,
            reader,
            profiles: BTreeMap::new(),
            outbox: Outbox::default(),
            last_burst: now,
            last_resend: now,
            last_heartbeat: now,
        }
    }

    /// Receiver configuration.
    #[must_use]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Feed bytes read from the link.
    pub fn handle_input(&mut self, bytes: &[u8], now: Instant) {
        self.reader.push(bytes);
        while let Some(burst) = self.reader.next_burst() {
            self.handle_burst(burst, now);
        }
    }

    /// Apply one verified burst.
    pub fn handle_burst(&mut self, burst: Burst, now: Instant) {
        Metrics::record_burst_received();
        self.last_burst = now;

        let Burst { key, kind } = burst;
        if let BurstKind::Data { index, payload } = &kind {
            if self.buffered_bytes() + payload.len() > self.config.max_buffered_bytes {
                warn!(
                    packet = key.packet_number,
                    burst = index,
                    "burst buffer limit reached; dropping burst"
                );
                return;
            }
        }

        let profile = self
            .profiles
            .entry(key.profile())
            .or_insert_with(|| {
                info!(
                    profiler_serial = key.profiler_serial,
                    profile_id = key.profile_id,
                    "new profile on link"
                );
                ProfileAssembly::new(key.profile())
            });
        let number = key.packet_number;
        match kind {
            BurstKind::Announce { burst_count } => {
                trace!(packet = number, burst_count, "announce");
                profile.on_announce(number, burst_count, &mut self.outbox);
            }
            BurstKind::Data { index, payload } => {
                trace!(packet = number, burst = index, len = payload.len(), "data burst");
                profile.on_data(number, index, payload, &mut self.outbox);
            }
            BurstKind::Terminal => {
                trace!(packet = number, "terminal");
                profile.on_terminal(number, &mut self.outbox);
            }
        }
    }

    /// Run the heartbeat and resend timers.
    pub fn poll_timers(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_heartbeat) >= self.config.heartbeat_interval {
            self.outbox.heartbeat();
            self.last_heartbeat = now;
        }

        let quiet_since = self.last_burst.max(self.last_resend);
        if now.saturating_duration_since(quiet_since) < self.config.resend_timeout {
            return;
        }
        if self.reader.skip_stalled() {
            while let Some(burst) = self.reader.next_burst() {
                self.handle_burst(burst, now);
            }
        }
        if !self.is_complete() {
            debug!(
                profiles = self.profiles.len(),
                "link quiet; requesting outstanding packets"
            );
            for profile in self.profiles.values_mut() {
                if !profile.is_settled() {
                    profile.request_outstanding(&mut self.outbox);
                }
            }
            self.last_resend = now;
        }
    }

    /// Next control or heartbeat line to write.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outbox.lines.pop_front()
    }

    /// True once no burst has arrived for the session timeout.
    #[must_use]
    pub fn is_timed_out(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_burst) >= self.config.session_timeout
    }

    /// True when at least one profile was seen and every one is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.profiles.is_empty() && self.profiles.values().all(ProfileAssembly::is_settled)
    }

    /// Profiles seen so far.
    pub fn profiles(&self) -> impl Iterator<Item = &ReceivedProfile> {
        self.profiles.values().map(|profile| &profile.received)
    }

    /// One profile.
    #[must_use]
    pub fn profile(&self, profiler_serial: u16, profile_id: u16) -> Option<&ReceivedProfile> {
        self.profiles
            .get(&(profiler_serial, profile_id))
            .map(|profile| &profile.received)
    }

    /// Consume the receiver, keeping what was rebuilt.
    #[must_use]
    pub fn into_profiles(self) -> Vec<ReceivedProfile> {
        self.profiles
            .into_values()
            .map(|profile| profile.received)
            .collect()
    }

    /// Corrupt units skipped in the inbound stream.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.reader.rejected()
    }

    fn buffered_bytes(&self) -> usize {
        self.profiles.values().map(ProfileAssembly::buffered).sum()
    }
}
