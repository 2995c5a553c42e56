//! Profiles, packet definitions, and packaging into packets.

use std::io::Read;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info};

use super::packet::{SENSOR_ID_LEN, sensor_id};
use super::pipeline::StageFlags;
use super::{DataPacket, Error, InfoPacket, Result, SensorType, TransmitInstructions};

const MAX_NUM_DATA: u32 = 9_999;
const MAX_PACKET_NUMBER: usize = 9_999;

/// Item and packet counts for one sensor class.
///
/// `num_packets` is derived, so `num_packets == ceil(num_data / items_per_packet)`
/// (and zero exactly when `num_data` is zero) always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassCounts {
    sensor: SensorType,
    num_data: u32,
}

impl ClassCounts {
    /// Counts for `num_data` items of `sensor`.
    #[must_use]
    pub const fn new(sensor: SensorType, num_data: u32) -> Self {
        Self { sensor, num_data }
    }

    /// Sensor class.
    #[must_use]
    pub const fn sensor(&self) -> SensorType {
        self.sensor
    }

    /// Items acquired.
    #[must_use]
    pub const fn num_data(&self) -> u32 {
        self.num_data
    }

    /// Items carried by each Data Packet of this class.
    #[must_use]
    pub const fn items_per_packet(&self) -> u32 {
        self.sensor.items_per_packet() as u32
    }

    /// Data Packets needed for this class.
    #[must_use]
    pub const fn num_packets(&self) -> u32 {
        self.num_data.div_ceil(self.items_per_packet())
    }
}

/// Per-profile counts for every sensor class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDefinition {
    classes: [ClassCounts; 4],
}

impl PacketDefinition {
    /// A definition with no data for any class.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            classes: [
                ClassCounts::new(SensorType::Starboard, 0),
                ClassCounts::new(SensorType::Port, 0),
                ClassCounts::new(SensorType::Ocr, 0),
                ClassCounts::new(SensorType::Mcoms, 0),
            ],
        }
    }

    /// Replace the counts of one class.
    pub fn set(&mut self, counts: ClassCounts) {
        self.classes[counts.sensor().index()] = counts;
    }

    /// Counts of one class.
    #[must_use]
    pub const fn get(&self, sensor: SensorType) -> ClassCounts {
        self.classes[sensor.index()]
    }

    /// Counts of every class in packet-numbering order.
    #[must_use]
    pub fn classes(&self) -> &[ClassCounts; 4] {
        &self.classes
    }

    /// Data Packets in the profile (packet 0 excluded).
    #[must_use]
    pub fn total_packets(&self) -> u32 {
        self.classes.iter().map(ClassCounts::num_packets).sum()
    }
}

impl Default for PacketDefinition {
    fn default() -> Self {
        Self::empty()
    }
}

/// Accumulates one cast's samples while acquisition runs.
#[derive(Debug)]
pub struct ProfileBuilder {
    profiler_serial: u16,
    profile_id: u16,
    sensor_ids: [[u8; SENSOR_ID_LEN]; 4],
    samples: [BytesMut; 4],
}

impl ProfileBuilder {
    /// Start a profile.
    #[must_use]
    pub fn new(profiler_serial: u16, profile_id: u16) -> Self {
        Self {
            profiler_serial,
            profile_id,
            sensor_ids: SensorType::ALL.map(|sensor| sensor_id(sensor.name())),
            samples: Default::default(),
        }
    }

    /// Record the identifier of the instrument behind a sensor class.
    pub fn set_sensor_id(&mut self, sensor: SensorType, id: &str) -> &mut Self {
        self.sensor_ids[sensor.index()] = sensor_id(id);
        self
    }

    /// Append already-serialized items of one class.
    pub fn append_samples(&mut self, sensor: SensorType, items: &[u8]) -> Result<()> {
        let item_size = sensor.item_size();
        if items.len() % item_size != 0 {
            return Err(Error::PartialItem {
                sensor: sensor.name(),
                len: items.len(),
                item_size,
            });
        }
        self.samples[sensor.index()].extend_from_slice(items);
        Ok(())
    }

    /// Read every item of one class from `source` until end of stream.
    pub fn read_samples<R: Read>(&mut self, sensor: SensorType, mut source: R) -> Result<usize> {
        let mut items = Vec::new();
        source.read_to_end(&mut items)?;
        self.append_samples(sensor, &items)?;
        Ok(items.len() / sensor.item_size())
    }

    /// End acquisition; the profile becomes transmittable.
    #[must_use]
    pub fn finalize(self) -> FinalizedProfile {
        info!(
            profiler_serial = self.profiler_serial,
            profile_id = self.profile_id,
            "profile finalized"
        );
        FinalizedProfile {
            profiler_serial: self.profiler_serial,
            profile_id: self.profile_id,
            sensor_ids: self.sensor_ids,
            samples: self.samples.map(BytesMut::freeze),
        }
    }
}

/// An acquired profile, immutable and ready to package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedProfile {
    profiler_serial: u16,
    profile_id: u16,
    sensor_ids: [[u8; SENSOR_ID_LEN]; 4],
    samples: [Bytes; 4],
}

impl FinalizedProfile {
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

    /// Serialized items of one class.
    #[must_use]
    pub fn samples(&self, sensor: SensorType) -> &Bytes {
        &self.samples[sensor.index()]
    }

    /// Counts derived from the acquired items.
    #[must_use]
    pub fn definition(&self) -> PacketDefinition {
        let mut definition = PacketDefinition::empty();
        for sensor in SensorType::ALL {
            let items = self.samples(sensor).len() / sensor.item_size();
            definition.set(ClassCounts::new(
                sensor,
                u32::try_from(items).unwrap_or(u32::MAX),
            ));
        }
        definition
    }
}

/// A profile split into its Info Packet and Data Packets.
#[derive(Debug, Clone)]
pub struct PackagedProfile {
    /// Packet 0.
    pub info: InfoPacket,
    /// Packets 1..N, in packet-number order.
    pub data: Vec<DataPacket>,
    /// Stages applied to every Data Packet.
    pub flags: StageFlags,
    /// Burst payload size.
    pub burst_size: usize,
}

impl PackagedProfile {
    /// Profiler serial number.
    #[must_use]
    pub const fn profiler_serial(&self) -> u16 {
        self.info.profiler_serial
    }

    /// Profile id.
    #[must_use]
    pub const fn profile_id(&self) -> u16 {
        self.info.profile_id
    }

    /// Packets including packet 0.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.data.len() + 1
    }
}

/// Split a finalized profile into packets.
///
/// Nothing is framed or sent here; any failure means the profile cannot be
/// transmitted as instructed.
pub fn package_profile(
    profile: &FinalizedProfile,
    instructions: &TransmitInstructions,
) -> Result<PackagedProfile> {
    instructions.validate()?;
    let definition = profile.definition();
    for counts in definition.classes() {
        if counts.num_data() > MAX_NUM_DATA {
            return Err(Error::FieldOverflow {
                field: "numData",
                value: counts.num_data() as usize,
            });
        }
    }

    let mut data = Vec::with_capacity(definition.total_packets() as usize);
    for sensor in SensorType::ALL {
        let samples = profile.samples(sensor);
        let chunk_len = usize::from(sensor.items_per_packet()) * sensor.item_size();
        let mut offset = 0;
        while offset < samples.len() {
            let end = (offset + chunk_len).min(samples.len());
            let packet_number = data.len() + 1;
            if packet_number > MAX_PACKET_NUMBER {
                return Err(Error::FieldOverflow {
                    field: "packet number",
                    value: packet_number,
                });
            }
            data.push(DataPacket::new(
                profile.profiler_serial,
                profile.profile_id,
                // Bounded by MAX_PACKET_NUMBER above.
                packet_number as u16,
                sensor,
                profile.sensor_ids[sensor.index()],
                samples.slice(offset..end),
            )?);
            offset = end;
        }
    }

    debug!(
        profile_id = profile.profile_id,
        data_packets = data.len(),
        "profile packaged"
    );
    Ok(PackagedProfile {
        info: InfoPacket::new(profile.profiler_serial, profile.profile_id, definition),
        data,
        flags: instructions.stage_flags(),
        burst_size: instructions.burst_size,
    })
}
