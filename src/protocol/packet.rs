//! Info and Data Packet layouts
//!
//! # Data Packet
//!
//! ```text
//! offset  size  field
//!      0     2  profiler serial (u16 LE)
//!      2     2  profile id (u16 LE)
//!      4     2  packet number (u16 LE, >= 1)
//!      6     1  sensor type  'S' | 'P' | 'O' | 'M'
//!      7     1  filler ' '
//!      8    10  sensor id (ASCII, space padded)
//!     18     4  item count (ASCII digits)
//!     22     1  representation 'G' | 'B'
//!     23     1  noise bits removed '0'..'7' | 'N'
//!     24     1  compression '0' | 'G'
//!     25     1  ascii encoding 'N' | 'A' | 'B'
//!     26     6  compressed size (ASCII digits)
//!     32     6  encoded size (ASCII digits)
//!     38     -  body (encoded_size bytes)
//! ```
//!
//! # Info Packet
//!
//! ```text
//!      0     2  profiler serial (u16 LE)
//!      2     2  profile id (u16 LE)
//!      4     2  packet number (= 0)
//!      6    32  per class S, P, O, M: numData (4 digits) numPackets (4 digits)
//!     38    26  reserved metadata block
//! ```

use bytes::Bytes;

use super::pipeline::{self, SampleLayout, StageFlags};
use super::profile::{ClassCounts, PacketDefinition};
use super::{
    AsciiEncoding, Compression, DATA_HEADER_SIZE, Error, INFO_PACKET_SIZE, NoiseBits,
    Representation, Result, SensorType, parse_digits, push_digits,
};

/// Length of the sensor id field.
pub const SENSOR_ID_LEN: usize = 10;

const INFO_COUNTS_OFFSET: usize = 6;
const MAX_ITEM_COUNT: usize = 9_999;
const MAX_STAGE_SIZE: usize = 999_999;

/// Packet 0: the profile's packet definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPacket {
    /// Profiler serial number.
    pub profiler_serial: u16,
    /// Profile id (YYDDD).
    pub profile_id: u16,
    /// Per-class item and packet counts.
    pub definition: PacketDefinition,
}

impl InfoPacket {
    /// Build the Info Packet for a profile.
    #[must_use]
    pub fn new(profiler_serial: u16, profile_id: u16, definition: PacketDefinition) -> Self {
        Self {
            profiler_serial,
            profile_id,
            definition,
        }
    }

    /// Serialize to the fixed 64-byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(INFO_PACKET_SIZE);
        out.extend_from_slice(&self.profiler_serial.to_le_bytes());
        out.extend_from_slice(&self.profile_id.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        for counts in self.definition.classes() {
            push_digits(&mut out, counts.num_data(), 4);
            push_digits(&mut out, counts.num_packets(), 4);
        }
        out.resize(INFO_PACKET_SIZE, 0);
        out
    }

    /// Parse and check that every class's packet count matches its item count.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INFO_PACKET_SIZE {
            return Err(Error::Truncated {
                needed: INFO_PACKET_SIZE,
                got: bytes.len(),
            });
        }
        let (profiler_serial, profile_id, packet_number) = read_ids(bytes);
        if packet_number != 0 {
            return Err(Error::MalformedField {
                field: "info packet number",
            });
        }

        let mut definition = PacketDefinition::empty();
        for sensor in SensorType::ALL {
            let offset = INFO_COUNTS_OFFSET + sensor.index() * 8;
            let num_data = parse_digits(&bytes[offset..offset + 4], "numData")?;
            let num_packets = parse_digits(&bytes[offset + 4..offset + 8], "numPackets")?;
            let counts = ClassCounts::new(sensor, num_data);
            if counts.num_packets() != num_packets {
                return Err(Error::MalformedField {
                    field: "numPackets",
                });
            }
            definition.set(counts);
        }

        Ok(Self {
            profiler_serial,
            profile_id,
            definition,
        })
    }
}

/// Fixed header of a Data Packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacketHeader {
    /// Profiler serial number.
    pub profiler_serial: u16,
    /// Profile id (YYDDD).
    pub profile_id: u16,
    /// Packet number within the profile (>= 1).
    pub packet_number: u16,
    /// Sensor class of every item in the packet.
    pub sensor: SensorType,
    /// Sensor identifier, space padded.
    pub sensor_id: [u8; SENSOR_ID_LEN],
    /// Number of items carried.
    pub item_count: u16,
    /// Pipeline stages applied to the payload.
    pub flags: StageFlags,
    /// Length after the compression stage.
    pub compressed_size: u32,
    /// Length of the body that follows the header.
    pub encoded_size: u32,
}

impl DataPacketHeader {
    /// Serialized payload size before encoding: `item_count × item_size`.
    #[must_use]
    pub const fn payload_size(&self) -> usize {
        self.item_count as usize * self.sensor.item_size()
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DATA_HEADER_SIZE] {
        let mut out = Vec::with_capacity(DATA_HEADER_SIZE);
        out.extend_from_slice(&self.profiler_serial.to_le_bytes());
        out.extend_from_slice(&self.profile_id.to_le_bytes());
        out.extend_from_slice(&self.packet_number.to_le_bytes());
        out.push(self.sensor.as_code());
        out.push(b' ');
        out.extend_from_slice(&self.sensor_id);
        push_digits(&mut out, u32::from(self.item_count), 4);
        out.push(self.flags.representation.as_code());
        out.push(self.flags.noise_bits.as_code());
        out.push(self.flags.compression.as_code());
        out.push(self.flags.encoding.as_code());
        push_digits(&mut out, self.compressed_size, 6);
        push_digits(&mut out, self.encoded_size, 6);

        let mut header = [0u8; DATA_HEADER_SIZE];
        header.copy_from_slice(&out);
        header
    }

    /// Parse a header from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(Error::Truncated {
                needed: DATA_HEADER_SIZE,
                got: bytes.len(),
            });
        }
        let (profiler_serial, profile_id, packet_number) = read_ids(bytes);
        if packet_number == 0 {
            return Err(Error::MalformedField {
                field: "data packet number",
            });
        }
        let sensor = SensorType::from_code(bytes[6])?;
        let mut sensor_id = [0u8; SENSOR_ID_LEN];
        sensor_id.copy_from_slice(&bytes[8..18]);
        // Four digits always fit a u16.
        let item_count = parse_digits(&bytes[18..22], "item count")? as u16;
        let flags = StageFlags {
            representation: Representation::from_code(bytes[22])?,
            noise_bits: NoiseBits::from_code(bytes[23])?,
            compression: Compression::from_code(bytes[24])?,
            encoding: AsciiEncoding::from_code(bytes[25])?,
        };

        Ok(Self {
            profiler_serial,
            profile_id,
            packet_number,
            sensor,
            sensor_id,
            item_count,
            flags,
            compressed_size: parse_digits(&bytes[26..32], "compressed size")?,
            encoded_size: parse_digits(&bytes[32..38], "encoded size")?,
        })
    }
}

/// A Data Packet holding raw (unencoded) sensor items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    header: DataPacketHeader,
    payload: Bytes,
}

impl DataPacket {
    /// Wrap `payload`, which must hold a whole number of `sensor` items.
    pub fn new(
        profiler_serial: u16,
        profile_id: u16,
        packet_number: u16,
        sensor: SensorType,
        sensor_id: [u8; SENSOR_ID_LEN],
        payload: Bytes,
    ) -> Result<Self> {
        let item_size = sensor.item_size();
        if payload.len() % item_size != 0 {
            return Err(Error::PartialItem {
                sensor: sensor.name(),
                len: payload.len(),
                item_size,
            });
        }
        let items = payload.len() / item_size;
        if items > MAX_ITEM_COUNT {
            return Err(Error::FieldOverflow {
                field: "item count",
                value: items,
            });
        }

        let header = DataPacketHeader {
            profiler_serial,
            profile_id,
            packet_number,
            sensor,
            sensor_id,
            // Bounded by MAX_ITEM_COUNT above.
            item_count: items as u16,
            flags: StageFlags::IDENTITY,
            compressed_size: 0,
            encoded_size: 0,
        };
        Ok(Self { header, payload })
    }

    /// Header (stage flags and sizes reflect the last decode, identity otherwise).
    #[must_use]
    pub const fn header(&self) -> &DataPacketHeader {
        &self.header
    }

    /// Raw item bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Packet number accessor.
    #[must_use]
    pub const fn packet_number(&self) -> u16 {
        self.header.packet_number
    }

    /// Run the pipeline and serialize header + body.
    pub fn encode(&self, flags: &StageFlags) -> Result<Bytes> {
        let encoded = pipeline::encode(
            &self.payload,
            SampleLayout::for_sensor(self.header.sensor),
            flags,
        )?;
        let mut header = self.header.clone();
        header.flags = *flags;
        header.compressed_size = stage_size("compressed size", encoded.compressed_size)?;
        header.encoded_size = stage_size("encoded size", encoded.body.len())?;

        let mut out = Vec::with_capacity(DATA_HEADER_SIZE + encoded.body.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&encoded.body);
        Ok(Bytes::from(out))
    }

    /// Parse a serialized Data Packet and invert its pipeline.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = DataPacketHeader::from_bytes(bytes)?;
        let body_len = header.encoded_size as usize;
        let needed = DATA_HEADER_SIZE + body_len;
        if bytes.len() < needed {
            return Err(Error::Truncated {
                needed,
                got: bytes.len(),
            });
        }
        let body = &bytes[DATA_HEADER_SIZE..needed];
        let payload = pipeline::decode(
            body,
            SampleLayout::for_sensor(header.sensor),
            &header.flags,
            header.payload_size(),
        )?;
        Ok(Self {
            header,
            payload: Bytes::from(payload),
        })
    }
}

/// A reassembled packet of either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Packet 0.
    Info(InfoPacket),
    /// Packets 1..N.
    Data(DataPacket),
}

impl Packet {
    /// Decode serialized packet bytes, dispatching on the packet number.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(Error::Truncated {
                needed: 6,
                got: bytes.len(),
            });
        }
        match read_ids(bytes).2 {
            0 => InfoPacket::from_bytes(bytes).map(Self::Info),
            _ => DataPacket::decode(bytes).map(Self::Data),
        }
    }
}

/// Pad or truncate a sensor id to the fixed field width.
#[must_use]
pub fn sensor_id(text: &str) -> [u8; SENSOR_ID_LEN] {
    let mut id = [b' '; SENSOR_ID_LEN];
    for (slot, byte) in id.iter_mut().zip(text.bytes()) {
        *slot = byte;
    }
    id
}

fn read_ids(bytes: &[u8]) -> (u16, u16, u16) {
    (
        u16::from_le_bytes([bytes[0], bytes[1]]),
        u16::from_le_bytes([bytes[2], bytes[3]]),
        u16::from_le_bytes([bytes[4], bytes[5]]),
    )
}

fn stage_size(field: &'static str, len: usize) -> Result<u32> {
    if len > MAX_STAGE_SIZE {
        return Err(Error::FieldOverflow { field, value: len });
    }
    // Bounded by MAX_STAGE_SIZE above.
    Ok(len as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radiometer_payload(items: usize) -> Bytes {
        let len = items * SensorType::Starboard.item_size();
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn info_packet_roundtrip() {
        let mut definition = PacketDefinition::empty();
        definition.set(ClassCounts::new(SensorType::Starboard, 250));
        definition.set(ClassCounts::new(SensorType::Mcoms, 7));
        let info = InfoPacket::new(770, 25_123, definition);
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), INFO_PACKET_SIZE);
        assert_eq!(&bytes[6..14], b"02500003");
        let parsed = InfoPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.definition.total_packets(), 4);
    }

    #[test]
    fn info_packet_rejects_inconsistent_counts() {
        let info = InfoPacket::new(1, 2, PacketDefinition::empty());
        let mut bytes = info.to_bytes();
        bytes[6..14].copy_from_slice(b"00050002");
        assert!(matches!(
            InfoPacket::from_bytes(&bytes),
            Err(Error::MalformedField { field: "numPackets" })
        ));
    }

    #[test]
    fn data_header_layout() {
        let packet = DataPacket::new(
            770,
            12_345,
            1,
            SensorType::Starboard,
            sensor_id("SATHSL0042"),
            radiometer_payload(5),
        )
        .unwrap();
        let bytes = packet.encode(&StageFlags::IDENTITY).unwrap();
        assert_eq!(bytes.len(), DATA_HEADER_SIZE + 400);
        assert_eq!(&bytes[0..2], &770u16.to_le_bytes());
        assert_eq!(bytes[6], b'S');
        assert_eq!(&bytes[8..18], b"SATHSL0042");
        assert_eq!(&bytes[18..22], b"0005");
        assert_eq!(&bytes[22..26], b"BN0N");
        assert_eq!(&bytes[26..38], b"000400000400");
    }

    #[test]
    fn data_packet_encode_decode() {
        let packet = DataPacket::new(
            770,
            12_345,
            3,
            SensorType::Starboard,
            sensor_id("SAT"),
            radiometer_payload(7),
        )
        .unwrap();
        let flags = StageFlags {
            representation: Representation::Gray,
            noise_bits: NoiseBits::Removed(0),
            compression: Compression::Deflate,
            encoding: AsciiEncoding::Ascii85,
        };
        let bytes = packet.encode(&flags).unwrap();
        let decoded = DataPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.payload(), packet.payload());
        assert_eq!(decoded.header().flags, flags);
        assert_eq!(decoded.header().encoded_size as usize, bytes.len() - DATA_HEADER_SIZE);
        assert!(matches!(Packet::decode(&bytes).unwrap(), Packet::Data(_)));
    }

    #[test]
    fn noise_bits_touch_only_radiometer_counts() {
        let mut items = Vec::new();
        for item in 0..3u32 {
            for _ in 0..32 {
                items.extend_from_slice(&20_000u16.to_le_bytes());
            }
            items.extend_from_slice(&(1_700_000_000 + item).to_le_bytes());
            items.extend_from_slice(&150_000i32.to_le_bytes());
            items.extend_from_slice(&[0x3F; 8]);
        }
        let packet = DataPacket::new(
            770,
            12_345,
            1,
            SensorType::Starboard,
            sensor_id("SAT"),
            Bytes::from(items.clone()),
        )
        .unwrap();
        let flags = StageFlags {
            representation: Representation::Gray,
            noise_bits: NoiseBits::Removed(3),
            compression: Compression::Deflate,
            encoding: AsciiEncoding::None,
        };
        let decoded = DataPacket::decode(&packet.encode(&flags).unwrap()).unwrap();
        let decoded = decoded.payload();

        for (before, after) in items.chunks_exact(80).zip(decoded.chunks_exact(80)) {
            assert_eq!(&after[64..], &before[64..], "aux block changed");
            for count in after[..64].chunks_exact(2) {
                assert_eq!(u16::from_le_bytes([count[0], count[1]]), 20_000);
            }
        }
    }

    #[test]
    fn partial_items_rejected() {
        let result = DataPacket::new(
            1,
            1,
            1,
            SensorType::Ocr,
            sensor_id("OCR"),
            Bytes::from(vec![0u8; 33]),
        );
        assert!(matches!(result, Err(Error::PartialItem { .. })));
    }

    #[test]
    fn truncated_body_rejected() {
        let packet = DataPacket::new(1, 1, 1, SensorType::Ocr, sensor_id("OCR"), Bytes::from(vec![0u8; 64]))
            .unwrap();
        let bytes = packet.encode(&StageFlags::IDENTITY).unwrap();
        assert!(matches!(
            DataPacket::decode(&bytes[..bytes.len() - 1]),
            Err(Error::Truncated { .. })
        ));
    }
}
