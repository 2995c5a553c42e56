//! Where the 16-bit samples sit inside a payload.
//!
//! Only little-endian `u16` counts go through rounding, Gray coding and
//! bit-planes. Every other byte of an item (the aux block, 32-bit channels)
//! is carried unchanged in a separate raw stream, as is a trailing partial
//! item.

use crate::protocol::types::{MCOMS_CHANNELS, RADIOMETER_PIXELS};
use crate::protocol::{Error, Result, SensorType};

static RADIOMETER_OFFSETS: [usize; RADIOMETER_PIXELS] = radiometer_offsets();
static MCOMS_OFFSETS: [usize; MCOMS_CHANNELS * 2] = mcoms_offsets();

const fn radiometer_offsets() -> [usize; RADIOMETER_PIXELS] {
    let mut offsets = [0; RADIOMETER_PIXELS];
    let mut pixel = 0;
    while pixel < RADIOMETER_PIXELS {
        offsets[pixel] = pixel * 2;
        pixel += 1;
    }
    offsets
}

// Each MCOMS channel is two u16 counts followed by a u32.
const fn mcoms_offsets() -> [usize; MCOMS_CHANNELS * 2] {
    let mut offsets = [0; MCOMS_CHANNELS * 2];
    let mut channel = 0;
    while channel < MCOMS_CHANNELS {
        offsets[channel * 2] = channel * 8;
        offsets[channel * 2 + 1] = channel * 8 + 2;
        channel += 1;
    }
    offsets
}

/// Byte offsets of the `u16` samples within one fixed-size item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    item_size: usize,
    sample_offsets: &'static [usize],
}

impl SampleLayout {
    /// Every aligned byte pair is a sample; an odd final byte is raw.
    pub const WORDS: Self = Self {
        item_size: 2,
        sample_offsets: &[0],
    };

    /// Layout of one item of `sensor`.
    #[must_use]
    pub fn for_sensor(sensor: SensorType) -> Self {
        let sample_offsets: &'static [usize] = match sensor {
            SensorType::Starboard | SensorType::Port => &RADIOMETER_OFFSETS,
            SensorType::Ocr => &[],
            SensorType::Mcoms => &MCOMS_OFFSETS,
        };
        Self {
            item_size: sensor.item_size(),
            sample_offsets,
        }
    }

    /// Item size in bytes.
    #[must_use]
    pub const fn item_size(&self) -> usize {
        self.item_size
    }

    /// Samples per item.
    #[must_use]
    pub const fn samples_per_item(&self) -> usize {
        self.sample_offsets.len()
    }

    /// Number of samples in a payload of `payload_len` bytes.
    #[must_use]
    pub const fn sample_count(&self, payload_len: usize) -> usize {
        payload_len / self.item_size * self.sample_offsets.len()
    }

    /// Number of raw bytes in a payload of `payload_len` bytes.
    #[must_use]
    pub const fn raw_len(&self, payload_len: usize) -> usize {
        payload_len - 2 * self.sample_count(payload_len)
    }

    fn mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.item_size];
        for &offset in self.sample_offsets {
            mask[offset] = true;
        }
        mask
    }

    /// Separate `payload` into its samples and its raw bytes, both in order.
    #[must_use]
    pub fn split(&self, payload: &[u8]) -> (Vec<u16>, Vec<u8>) {
        let mask = self.mask();
        let mut samples = Vec::with_capacity(self.sample_count(payload.len()));
        let mut raw = Vec::with_capacity(self.raw_len(payload.len()));
        let items = payload.chunks_exact(self.item_size);
        let tail = items.remainder();
        for item in items {
            let mut at = 0;
            while at < self.item_size {
                if mask[at] {
                    samples.push(u16::from_le_bytes([item[at], item[at + 1]]));
                    at += 2;
                } else {
                    raw.push(item[at]);
                    at += 1;
                }
            }
        }
        raw.extend_from_slice(tail);
        (samples, raw)
    }

    /// Invert [`SampleLayout::split`].
    pub fn join(&self, samples: &[u16], raw: &[u8]) -> Result<Vec<u8>> {
        let per_item = self.sample_offsets.len();
        let items = if per_item == 0 {
            0
        } else {
            samples.len() / per_item
        };
        if items * per_item != samples.len() {
            return Err(Error::pipeline(
                "layout",
                format!("{} samples do not fill whole items", samples.len()),
            ));
        }
        let raw_per_item = self.item_size - 2 * per_item;
        let raw_needed = items * raw_per_item;
        // Whatever follows the whole items is a partial item, so shorter than one.
        let fits = raw
            .len()
            .checked_sub(raw_needed)
            .is_some_and(|extra| per_item == 0 || extra < self.item_size);
        if !fits {
            return Err(Error::pipeline(
                "layout",
                format!("{} raw bytes do not match {items} items", raw.len()),
            ));
        }

        let mask = self.mask();
        let mut out = Vec::with_capacity(samples.len() * 2 + raw.len());
        let mut samples = samples.iter();
        let mut raw = raw.iter();
        for _ in 0..items {
            let mut at = 0;
            while at < self.item_size {
                if mask[at] {
                    if let Some(sample) = samples.next() {
                        out.extend_from_slice(&sample.to_le_bytes());
                    }
                    at += 2;
                } else {
                    if let Some(&byte) = raw.next() {
                        out.push(byte);
                    }
                    at += 1;
                }
            }
        }
        out.extend(raw);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mcoms_item(seed: u8) -> Vec<u8> {
        (0..40).map(|i| seed.wrapping_add(i)).collect()
    }

    #[test]
    fn radiometer_counts_are_little_endian() {
        let layout = SampleLayout::for_sensor(SensorType::Starboard);
        let mut item = Vec::new();
        for pixel in 0..32u16 {
            item.extend_from_slice(&(20_000 + pixel).to_le_bytes());
        }
        item.extend_from_slice(&[0xA5; 16]);

        let (samples, raw) = layout.split(&item);
        assert_eq!(samples.len(), 32);
        assert_eq!(samples[0], 20_000);
        assert_eq!(samples[31], 20_031);
        assert_eq!(raw, [0xA5; 16]);
        assert_eq!(layout.join(&samples, &raw).unwrap(), item);
    }

    #[test]
    fn mcoms_u32_channels_stay_raw() {
        let layout = SampleLayout::for_sensor(SensorType::Mcoms);
        let mut payload = mcoms_item(0);
        payload.extend(mcoms_item(100));

        let (samples, raw) = layout.split(&payload);
        assert_eq!(samples.len(), 12);
        assert_eq!(samples[0], u16::from_le_bytes([0, 1]));
        assert_eq!(samples[1], u16::from_le_bytes([2, 3]));
        assert_eq!(samples[2], u16::from_le_bytes([8, 9]));
        // Per item: three u32 channels plus the aux block.
        assert_eq!(raw.len(), 2 * (3 * 4 + 16));
        assert_eq!(&raw[..4], &[4, 5, 6, 7]);
        assert_eq!(layout.join(&samples, &raw).unwrap(), payload);
    }

    #[test]
    fn ocr_has_no_samples() {
        let layout = SampleLayout::for_sensor(SensorType::Ocr);
        let payload: Vec<u8> = (0..64).collect();
        let (samples, raw) = layout.split(&payload);
        assert!(samples.is_empty());
        assert_eq!(raw, payload);
        assert_eq!(layout.join(&samples, &raw).unwrap(), payload);
    }

    #[test]
    fn words_keep_odd_tail() {
        let payload = [0x34, 0x12, 0x78, 0x56, 0x9A];
        let (samples, raw) = SampleLayout::WORDS.split(&payload);
        assert_eq!(samples, [0x1234, 0x5678]);
        assert_eq!(raw, [0x9A]);
        assert_eq!(SampleLayout::WORDS.join(&samples, &raw).unwrap(), payload);
    }

    #[test]
    fn join_rejects_mismatched_streams() {
        let layout = SampleLayout::for_sensor(SensorType::Starboard);
        assert!(layout.join(&[0u16; 31], &[0u8; 16]).is_err());
        assert!(layout.join(&[0u16; 32], &[0u8; 15]).is_err());
    }
}
