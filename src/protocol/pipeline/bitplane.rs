//! Noise-bit rounding and bit-plane transposition.
//!
//! Samples first lose their `k` lowest bits (rounded to nearest, saturating),
//! leaving `16 - k` significant bits. For each remaining bit plane, most
//! significant first, one byte is emitted per group of 8 consecutive samples:
//!
//! ```text
//! plane p, group g:  bit7 = sample 8g+0 . . . bit0 = sample 8g+7
//! ```
//!
//! A final group shorter than 8 samples is zero-padded; decoding needs the
//! sample count to discard the padding.

use crate::protocol::{Error, Result};

/// Bits per sample before rounding.
pub const SAMPLE_BITS: u8 = 16;

/// Number of significant planes left after dropping `noise_bits`.
#[must_use]
pub const fn planes(noise_bits: u8) -> usize {
    (SAMPLE_BITS - noise_bits) as usize
}

/// Encoded length of `samples` samples with `noise_bits` dropped.
#[must_use]
pub const fn transposed_len(samples: usize, noise_bits: u8) -> usize {
    planes(noise_bits) * samples.div_ceil(8)
}

/// Round a sample to its `16 - noise_bits` most significant bits, shifted down.
#[inline]
#[must_use]
pub fn reduce(sample: u16, noise_bits: u8) -> u16 {
    if noise_bits == 0 {
        return sample;
    }
    let half = 1u32 << (noise_bits - 1);
    let max = u32::from(u16::MAX >> noise_bits);
    // Narrowing is lossless: the value is clamped to `max` first.
    ((u32::from(sample) + half) >> noise_bits).min(max) as u16
}

/// Restore a reduced sample to full scale (the dropped bits read as zero).
#[inline]
#[must_use]
pub const fn expand(reduced: u16, noise_bits: u8) -> u16 {
    reduced << noise_bits
}

/// Rounding as observed after a full encode/decode cycle.
#[inline]
#[must_use]
pub fn round(sample: u16, noise_bits: u8) -> u16 {
    expand(reduce(sample, noise_bits), noise_bits)
}

/// Transpose reduced samples into bit planes.
#[must_use]
pub fn transpose(samples: &[u16], noise_bits: u8) -> Vec<u8> {
    let groups = samples.len().div_ceil(8);
    let mut out = Vec::with_capacity(transposed_len(samples.len(), noise_bits));
    for plane in (0..planes(noise_bits)).rev() {
        for group in 0..groups {
            let start = group * 8;
            let end = (start + 8).min(samples.len());
            let mut byte = 0u8;
            for (slot, sample) in samples[start..end].iter().enumerate() {
                if (sample >> plane) & 1 == 1 {
                    byte |= 0x80 >> slot;
                }
            }
            out.push(byte);
        }
    }
    out
}

/// Rebuild `count` reduced samples from their bit planes.
pub fn untranspose(planes_bytes: &[u8], count: usize, noise_bits: u8) -> Result<Vec<u16>> {
    let expected = transposed_len(count, noise_bits);
    if planes_bytes.len() != expected {
        return Err(Error::pipeline(
            "bit-plane",
            format!("expected {expected} plane bytes, got {}", planes_bytes.len()),
        ));
    }

    let groups = count.div_ceil(8);
    let mut samples = vec![0u16; count];
    for (row, plane) in (0..planes(noise_bits)).rev().enumerate() {
        let row_bytes = &planes_bytes[row * groups..(row + 1) * groups];
        for (index, sample) in samples.iter_mut().enumerate() {
            let byte = row_bytes[index / 8];
            if byte & (0x80 >> (index % 8)) != 0 {
                *sample |= 1 << plane;
            }
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_group_layout() {
        // Sample 0 has only the MSB set, sample 7 only the LSB.
        let mut samples = [0u16; 8];
        samples[0] = 0x8000;
        samples[7] = 0x0001;
        let planes_bytes = transpose(&samples, 0);
        assert_eq!(planes_bytes.len(), 16);
        assert_eq!(planes_bytes[0], 0x80);
        assert_eq!(planes_bytes[15], 0x01);
        assert!(planes_bytes[1..15].iter().all(|&b| b == 0));
    }

    #[test]
    fn short_final_group_is_padded() {
        let samples: Vec<u16> = (0..11).map(|i| 0x1111 * i).collect();
        let planes_bytes = transpose(&samples, 0);
        assert_eq!(planes_bytes.len(), 16 * 2);
        assert_eq!(untranspose(&planes_bytes, 11, 0).unwrap(), samples);
    }

    #[test]
    fn noise_bits_shrink_output() {
        let samples = vec![0xFFFFu16; 16];
        let reduced: Vec<u16> = samples.iter().map(|&s| reduce(s, 3)).collect();
        assert_eq!(transpose(&reduced, 3).len(), 13 * 2);
        assert_eq!(reduced[0], 0x1FFF, "rounding saturates instead of wrapping");
    }

    #[test]
    fn rounding_is_to_nearest_and_idempotent() {
        assert_eq!(round(0b1011, 2), 0b1100);
        assert_eq!(round(0b1001, 2), 0b1000);
        for sample in (0..=u16::MAX).step_by(7) {
            for bits in 0..=7 {
                let once = round(sample, bits);
                assert_eq!(round(once, bits), once);
            }
        }
    }

    #[test]
    fn untranspose_rejects_wrong_length() {
        assert!(matches!(
            untranspose(&[0u8; 5], 8, 0),
            Err(Error::Pipeline { stage: "bit-plane", .. })
        ));
    }

    #[test]
    fn empty_input() {
        assert!(transpose(&[], 0).is_empty());
        assert!(untranspose(&[], 0, 4).unwrap().is_empty());
    }
}
