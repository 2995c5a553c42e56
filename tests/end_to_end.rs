use std::time::{Duration, Instant};

use bytes::Bytes;
use castlink::protocol::pipeline::{self, SampleLayout};
use castlink::protocol::{DATA_HEADER_SIZE, FramedPacket, PacketKey};
use castlink::transport::{BurstStatus, Receiver, ReceiverConfig, Sender};
use castlink::{
    PackagedProfile, ProfileBuilder, SenderConfig, SensorType, TransferStatus,
    TransmitInstructions, package_profile,
};

const SERIAL: u16 = 770;
const PROFILE: u16 = 12_345;

/// Five radiometer items with a smooth spectrum and a fixed aux block.
fn radiometer_items(count: usize) -> Vec<u8> {
    let mut items = Vec::with_capacity(count * 80);
    for item in 0..count {
        for pixel in 0..32u16 {
            let counts = 20_000 + pixel * 150 + item as u16 * 7;
            items.extend_from_slice(&counts.to_le_bytes());
        }
        items.extend_from_slice(&(1_700_000_000u32 + item as u32).to_le_bytes());
        items.extend_from_slice(&(150_000i32 - item as i32 * 250).to_le_bytes());
        items.extend_from_slice(&1_234i16.to_le_bytes());
        items.extend_from_slice(&(-15i16).to_le_bytes());
        items.extend_from_slice(&512u16.to_le_bytes());
        items.extend_from_slice(&0u16.to_le_bytes());
    }
    items
}

fn package(instructions: &TransmitInstructions) -> (Vec<u8>, PackagedProfile) {
    let source = radiometer_items(5);
    let mut builder = ProfileBuilder::new(SERIAL, PROFILE);
    builder
        .append_samples(SensorType::Starboard, &source)
        .unwrap();
    let packaged = package_profile(&builder.finalize(), instructions).unwrap();
    (source, packaged)
}

/// Sender and receiver joined by a lossless pipe, with a drop filter on the
/// burst direction and a fake clock.
struct Session {
    sender: Sender,
    receiver: Receiver,
    now: Instant,
    bursts: Vec<Vec<u8>>,
    lines: Vec<String>,
}

impl Session {
    fn new(packaged: &PackagedProfile) -> Self {
        let now = Instant::now();
        Self {
            sender: Sender::new(packaged, SenderConfig::default(), now).unwrap(),
            receiver: Receiver::new(ReceiverConfig::default(), now),
            now,
            bursts: Vec::new(),
            lines: Vec::new(),
        }
    }

    /// One poll of each side; returns the sender's status if it finished.
    fn step(&mut self, mut drop: impl FnMut(&[u8]) -> bool) -> Option<TransferStatus> {
        while let Some(burst) = self.sender.poll_transmit() {
            self.bursts.push(burst.clone());
            if !drop(&burst) {
                self.receiver.handle_input(&burst, self.now);
            }
        }
        self.receiver.poll_timers(self.now);
        while let Some(line) = self.receiver.poll_transmit() {
            self.lines.push(String::from_utf8(line.clone()).unwrap());
            self.sender.handle_input(&line, self.now);
        }
        self.sender.poll_status(self.now)
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    fn lines_starting_with(&self, prefix: &str) -> usize {
        self.lines.iter().filter(|line| line.starts_with(prefix)).count()
    }
}

fn burst_id(wire: &[u8]) -> &[u8] {
    &wire[13..20]
}

#[test]
fn lossless_transfer_of_five_radiometer_items() {
    let (source, packaged) = package(&TransmitInstructions::identity(128));

    let serialized = packaged.data[0].encode(&packaged.flags).unwrap();
    let len = serialized.len();
    assert_eq!(len, DATA_HEADER_SIZE + 5 * 80);
    let framed = FramedPacket::frame(PacketKey::new(SERIAL, PROFILE, 1), serialized, 128).unwrap();
    assert_eq!(usize::from(framed.burst_count()), len.div_ceil(128));
    assert_eq!(framed.burst_count(), 4);

    let mut session = Session::new(&packaged);
    let status = session.step(|_| false);
    assert_eq!(status, Some(TransferStatus::Success));

    // Packet 0: 3 bursts. Packet 1: announce + 4 data + terminal.
    assert_eq!(session.bursts.len(), 3 + 6);
    assert_eq!(session.lines_starting_with("RXED,0770,12345,0001,999,"), 1);
    assert_eq!(session.lines_starting_with("RSND"), 0);

    let rebuilt = session.receiver.profile(SERIAL, PROFILE).unwrap();
    assert!(rebuilt.is_complete());
    assert_eq!(rebuilt.data_packet(1).unwrap().payload().as_ref(), &source[..]);
}

#[test]
fn lost_burst_is_requested_and_resent_alone() {
    let (source, packaged) = package(&TransmitInstructions::identity(128));
    let mut session = Session::new(&packaged);

    let mut dropped = false;
    let mut status = session.step(|wire| {
        if !dropped && burst_id(wire) == b"0001002" {
            dropped = true;
            return true;
        }
        false
    });
    assert!(dropped);
    assert_eq!(session.lines_starting_with("RSND,0770,12345,0001,002,"), 1);
    assert_eq!(session.lines_starting_with("RSND"), 1);

    let mut waited = Duration::ZERO;
    while status.is_none() && waited < Duration::from_secs(15) {
        session.advance(Duration::from_secs(1));
        waited += Duration::from_secs(1);
        status = session.step(|_| false);
    }
    assert_eq!(status, Some(TransferStatus::Success));

    let resent: Vec<&[u8]> = session.bursts[9..].iter().map(|w| burst_id(w)).collect();
    assert_eq!(resent, [b"0001002".as_slice()]);
    assert_eq!(session.sender.attempts(1, 2), 2);
    assert_eq!(session.sender.attempts(1, 1), 1);
    assert_eq!(session.sender.attempts(1, 3), 1);
    assert_eq!(session.lines_starting_with("RXED,0770,12345,0001,999,"), 1);

    let rebuilt = session.receiver.profile(SERIAL, PROFILE).unwrap();
    assert_eq!(rebuilt.data_packet(1).unwrap().payload().as_ref(), &source[..]);
}

#[test]
fn lost_announce_resends_whole_packet_from_burst_zero() {
    let (_, packaged) = package(&TransmitInstructions::identity(128));
    let mut session = Session::new(&packaged);

    let mut dropped = false;
    let status = session.step(|wire| {
        if !dropped && burst_id(wire) == b"0001000" {
            dropped = true;
            return true;
        }
        false
    });
    assert_eq!(status, None);
    assert_eq!(session.lines_starting_with("RSND,0770,12345,0001,999,"), 1);

    let first_pass = 9;
    let status = session.step(|_| false);
    assert_eq!(status, Some(TransferStatus::Success));
    let resent: Vec<&[u8]> = session.bursts[first_pass..]
        .iter()
        .map(|w| burst_id(w))
        .collect();
    assert_eq!(
        resent,
        [
            b"0001000".as_slice(),
            b"0001001",
            b"0001002",
            b"0001003",
            b"0001004",
            b"0001ZZZ",
        ]
    );
    assert_eq!(session.sender.burst_status(1, 0), Some(BurstStatus::Confirmed));
}

#[test]
fn lost_terminal_and_acknowledgement_recover_by_timers() {
    let (_, packaged) = package(&TransmitInstructions::default());
    let mut session = Session::new(&packaged);

    let status = session.step(|wire| burst_id(wire) == b"0001ZZZ");
    assert_eq!(status, None);
    assert_eq!(session.lines_starting_with("RXED,0770,12345,0001,"), 0);

    // The receiver notices the missing terminal once the link has been quiet.
    let mut status = None;
    for _ in 0..15 {
        session.advance(Duration::from_secs(1));
        status = session.step(|_| false);
    }
    assert_eq!(status, Some(TransferStatus::Success));
    assert_eq!(session.lines_starting_with("RXED,0770,12345,0001,999,"), 1);
    assert!(session.lines.iter().any(|line| line == "ALIF\r\n"));
}

#[test]
fn encoded_transfer_reproduces_rounded_payload() {
    let instructions = TransmitInstructions {
        noise_bits_remove: 3,
        burst_size: 256,
        ..TransmitInstructions::default()
    };
    let (source, packaged) = package(&instructions);
    let mut session = Session::new(&packaged);
    assert_eq!(session.step(|_| false), Some(TransferStatus::Success));

    let rebuilt = session.receiver.profile(SERIAL, PROFILE).unwrap();
    let packet = rebuilt.data_packet(1).unwrap();
    assert_eq!(packet.header().flags, instructions.stage_flags());
    let expected = pipeline::rounded(
        &source,
        SampleLayout::for_sensor(SensorType::Starboard),
        instructions.noise_bits(),
    );
    assert_eq!(packet.payload(), &Bytes::from(expected));

    // Checked field by field against the item layout, not through the pipeline.
    let tolerance = 1i32 << (3 - 1);
    for (before, after) in source.chunks_exact(80).zip(packet.payload().chunks_exact(80)) {
        for (a, b) in before[..64].chunks_exact(2).zip(after[..64].chunks_exact(2)) {
            let a = i32::from(u16::from_le_bytes([a[0], a[1]]));
            let b = i32::from(u16::from_le_bytes([b[0], b[1]]));
            assert!((a - b).abs() <= tolerance, "count {a} -> {b}");
        }
        assert_eq!(&after[64..], &before[64..], "aux block changed");
    }
}

#[test]
fn silent_shore_ends_in_modem_fail() {
    let (_, packaged) = package(&TransmitInstructions::default());
    let mut session = Session::new(&packaged);
    // Nothing reaches the receiver, and nothing comes back.
    assert_eq!(session.step(|_| true), None);
    let mut status = None;
    for _ in 0..120 {
        session.advance(Duration::from_secs(1));
        while session.sender.poll_transmit().is_some() {}
        status = session.sender.poll_status(session.now);
        if status.is_some() {
            break;
        }
    }
    assert_eq!(status, Some(TransferStatus::ModemFail));
}
