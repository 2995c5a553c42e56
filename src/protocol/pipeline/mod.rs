//! Reversible payload encoding pipeline
//!
//! ```text
//! payload ─► round ─► gray ─► bit-planes ─► deflate ─► ascii ─► body
//! body    ─► ascii⁻¹ ─► inflate ─► planes⁻¹ ─► gray⁻¹ ─► expand ─► payload'
//! ```
//!
//! A [`SampleLayout`] picks the little-endian 16-bit samples out of each
//! item; every other byte skips the sample stages and follows the bit planes
//! unchanged. Every stage choice is recorded
//! in [`StageFlags`], which travels in the Data Packet header, so the receiver
//! inverts without side information. The only lossy step is the noise-bit
//! rounding, and it is idempotent.

pub mod ascii;
pub mod bitplane;
pub mod compress;
pub mod gray;
mod layout;

pub use layout::SampleLayout;

use tracing::trace;

use super::{AsciiEncoding, Compression, NoiseBits, Representation, Result, Error};

/// Stage selections for one Data Packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFlags {
    /// Gray or plain binary samples.
    pub representation: Representation,
    /// Bit-plane transposition and dropped noise bits.
    pub noise_bits: NoiseBits,
    /// Compression stage.
    pub compression: Compression,
    /// ASCII-safe stage.
    pub encoding: AsciiEncoding,
}

impl StageFlags {
    /// Flags that leave the payload untouched.
    pub const IDENTITY: Self = Self {
        representation: Representation::Binary,
        noise_bits: NoiseBits::NotTransposed,
        compression: Compression::None,
        encoding: AsciiEncoding::None,
    };

    /// True when every stage is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

/// Output of [`encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Length after the compression stage (recorded as `compressed_size`).
    pub compressed_size: usize,
    /// Final body bytes; their length is recorded as `encoded_size`.
    pub body: Vec<u8>,
}

/// Run every stage selected by `flags` over `payload`.
///
/// The samples picked out by `layout` are rounded, Gray-coded and
/// transposed; the remaining bytes follow the planes unchanged.
pub fn encode(payload: &[u8], layout: SampleLayout, flags: &StageFlags) -> Result<Encoded> {
    let (mut samples, raw) = layout.split(payload);
    let noise_bits = flags.noise_bits.removed();

    let staged = match flags.noise_bits {
        NoiseBits::NotTransposed => {
            if flags.representation == Representation::Gray {
                gray::encode_in_place(&mut samples);
            }
            layout.join(&samples, &raw)?
        }
        NoiseBits::Removed(_) => {
            for sample in &mut samples {
                *sample = bitplane::reduce(*sample, noise_bits);
            }
            if flags.representation == Representation::Gray {
                gray::encode_in_place(&mut samples);
            }
            let mut planes = bitplane::transpose(&samples, noise_bits);
            planes.extend_from_slice(&raw);
            planes
        }
    };

    let compressed = match flags.compression {
        Compression::None => staged,
        Compression::Deflate => compress::deflate(&staged)?,
    };
    let compressed_size = compressed.len();
    let body = ascii::encode(flags.encoding, &compressed);

    trace!(
        payload = payload.len(),
        compressed = compressed_size,
        encoded = body.len(),
        "pipeline encoded payload"
    );
    Ok(Encoded {
        compressed_size,
        body,
    })
}

/// Invert [`encode`], producing `payload_len` bytes.
pub fn decode(
    body: &[u8],
    layout: SampleLayout,
    flags: &StageFlags,
    payload_len: usize,
) -> Result<Vec<u8>> {
    let compressed = ascii::decode(flags.encoding, body)?;

    let sample_count = layout.sample_count(payload_len);
    let noise_bits = flags.noise_bits.removed();
    let staged_len = match flags.noise_bits {
        NoiseBits::NotTransposed => payload_len,
        NoiseBits::Removed(_) => {
            bitplane::transposed_len(sample_count, noise_bits) + layout.raw_len(payload_len)
        }
    };

    let staged = match flags.compression {
        Compression::None => compressed,
        Compression::Deflate => compress::inflate(&compressed, staged_len)?,
    };
    if staged.len() != staged_len {
        return Err(Error::pipeline(
            "payload",
            format!("expected {staged_len} staged bytes, got {}", staged.len()),
        ));
    }

    let (mut samples, raw) = match flags.noise_bits {
        NoiseBits::NotTransposed => layout.split(&staged),
        NoiseBits::Removed(_) => {
            let plane_len = bitplane::transposed_len(sample_count, noise_bits);
            let samples = bitplane::untranspose(&staged[..plane_len], sample_count, noise_bits)?;
            (samples, staged[plane_len..].to_vec())
        }
    };

    if flags.representation == Representation::Gray {
        gray::decode_in_place(&mut samples);
    }
    if noise_bits > 0 {
        for sample in &mut samples {
            *sample = bitplane::expand(*sample, noise_bits);
        }
    }
    layout.join(&samples, &raw)
}

/// Apply only the lossy rounding, as the receiver will observe it.
#[must_use]
pub fn rounded(payload: &[u8], layout: SampleLayout, noise_bits: NoiseBits) -> Vec<u8> {
    let bits = noise_bits.removed();
    let (samples, raw) = layout.split(payload);
    let samples: Vec<u16> = samples
        .into_iter()
        .map(|sample| bitplane::round(sample, bits))
        .collect();
    // Split output always rejoins.
    layout.join(&samples, &raw).unwrap_or_else(|_| payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smooth_spectrum(len: usize) -> Vec<u8> {
        (0..len / 2)
            .flat_map(|i| {
                let value = 12_000u16.wrapping_add((i as u16).wrapping_mul(3));
                value.to_le_bytes()
            })
            .collect()
    }

    fn all_flags() -> Vec<StageFlags> {
        let mut flags = Vec::new();
        for representation in [Representation::Gray, Representation::Binary] {
            for noise_bits in [
                NoiseBits::NotTransposed,
                NoiseBits::Removed(0),
                NoiseBits::Removed(3),
                NoiseBits::Removed(7),
            ] {
                for compression in [Compression::None, Compression::Deflate] {
                    for encoding in [
                        AsciiEncoding::None,
                        AsciiEncoding::Ascii85,
                        AsciiEncoding::Base64,
                    ] {
                        flags.push(StageFlags {
                            representation,
                            noise_bits,
                            compression,
                            encoding,
                        });
                    }
                }
            }
        }
        flags
    }

    #[test]
    fn identity_is_a_no_op() {
        let payload = smooth_spectrum(64);
        let encoded = encode(&payload, SampleLayout::WORDS, &StageFlags::IDENTITY).unwrap();
        assert_eq!(encoded.body, payload);
        assert_eq!(encoded.compressed_size, payload.len());
        assert!(StageFlags::IDENTITY.is_identity());
    }

    #[test]
    fn every_stage_combination_inverts() {
        let mut payload = smooth_spectrum(402);
        payload.push(0xAB);
        for flags in all_flags() {
            let encoded = encode(&payload, SampleLayout::WORDS, &flags).unwrap();
            let decoded = decode(&encoded.body, SampleLayout::WORDS, &flags, payload.len()).unwrap();
            assert_eq!(decoded, rounded(&payload, SampleLayout::WORDS, flags.noise_bits), "{flags:?}");
        }
    }

    #[test]
    fn bitplanes_and_gray_help_deflate() {
        let payload = smooth_spectrum(8000);
        let plain = StageFlags {
            compression: Compression::Deflate,
            ..StageFlags::IDENTITY
        };
        let planes = StageFlags {
            representation: Representation::Gray,
            noise_bits: NoiseBits::Removed(0),
            ..plain
        };
        let plain_len = encode(&payload, SampleLayout::WORDS, &plain).unwrap().body.len();
        let planes_len = encode(&payload, SampleLayout::WORDS, &planes).unwrap().body.len();
        assert!(planes_len <= plain_len, "{planes_len} > {plain_len}");
    }

    #[test]
    fn truncated_body_is_rejected() {
        let payload = smooth_spectrum(64);
        let flags = StageFlags {
            noise_bits: NoiseBits::Removed(2),
            ..StageFlags::IDENTITY
        };
        let encoded = encode(&payload, SampleLayout::WORDS, &flags).unwrap();
        let short = &encoded.body[..encoded.body.len() - 1];
        assert!(matches!(
            decode(short, SampleLayout::WORDS, &flags, payload.len()),
            Err(Error::Pipeline { .. })
        ));
    }

    #[test]
    fn empty_payload() {
        for flags in all_flags() {
            let encoded = encode(&[], SampleLayout::WORDS, &flags).unwrap();
            assert!(decode(&encoded.body, SampleLayout::WORDS, &flags, 0).unwrap().is_empty());
        }
    }

    fn default_lossy(bits: u8) -> StageFlags {
        StageFlags {
            representation: Representation::Gray,
            noise_bits: NoiseBits::Removed(bits),
            compression: Compression::Deflate,
            encoding: AsciiEncoding::None,
        }
    }

    #[test]
    fn radiometer_rounding_spares_the_aux_block() {
        let mut item = Vec::new();
        for pixel in 0..32u16 {
            item.extend_from_slice(&(20_000 + pixel * 13).to_le_bytes());
        }
        let aux: Vec<u8> = [
            &1_700_000_003u32.to_le_bytes()[..],
            &150_001i32.to_le_bytes(),
            &1_234i16.to_le_bytes(),
            &(-15i16).to_le_bytes(),
            &513u16.to_le_bytes(),
            &0x8001u16.to_le_bytes(),
        ]
        .concat();
        item.extend_from_slice(&aux);

        let layout = SampleLayout::for_sensor(crate::protocol::SensorType::Starboard);
        let flags = default_lossy(3);
        let encoded = encode(&item, layout, &flags).unwrap();
        let decoded = decode(&encoded.body, layout, &flags, item.len()).unwrap();

        assert_eq!(&decoded[64..], aux.as_slice());
        for (before, after) in item[..64].chunks_exact(2).zip(decoded[..64].chunks_exact(2)) {
            let before = i32::from(u16::from_le_bytes([before[0], before[1]]));
            let after = i32::from(u16::from_le_bytes([after[0], after[1]]));
            assert!((before - after).abs() <= 4, "{before} -> {after}");
            assert_eq!(after % 8, 0);
        }
    }

    #[test]
    fn mcoms_wide_channels_pass_through() {
        let item: Vec<u8> = (0..80u8).map(|i| i.wrapping_mul(37)).collect();
        let layout = SampleLayout::for_sensor(crate::protocol::SensorType::Mcoms);
        let flags = default_lossy(7);
        let encoded = encode(&item, layout, &flags).unwrap();
        let decoded = decode(&encoded.body, layout, &flags, item.len()).unwrap();
        assert_eq!(decoded, rounded(&item, layout, flags.noise_bits));
        for base in [0, 40] {
            for channel in 0..3 {
                let wide = base + channel * 8 + 4;
                assert_eq!(decoded[wide..wide + 4], item[wide..wide + 4]);
            }
            assert_eq!(decoded[base + 24..base + 40], item[base + 24..base + 40]);
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn flags_strategy() -> impl Strategy<Value = StageFlags> {
            (
                prop_oneof![Just(Representation::Gray), Just(Representation::Binary)],
                prop_oneof![
                    Just(NoiseBits::NotTransposed),
                    (0u8..=7).prop_map(NoiseBits::Removed)
                ],
                prop_oneof![Just(Compression::None), Just(Compression::Deflate)],
                prop_oneof![
                    Just(AsciiEncoding::None),
                    Just(AsciiEncoding::Ascii85),
                    Just(AsciiEncoding::Base64)
                ],
            )
                .prop_map(|(representation, noise_bits, compression, encoding)| StageFlags {
                    representation,
                    noise_bits,
                    compression,
                    encoding,
                })
        }

        proptest! {
            /// Property: decode(encode(x)) equals x up to the documented rounding
            #[test]
            fn prop_pipeline_roundtrip(
                payload in prop::collection::vec(any::<u8>(), 0..=2048),
                flags in flags_strategy(),
            ) {
                let encoded = encode(&payload, SampleLayout::WORDS, &flags).unwrap();
                let decoded = decode(&encoded.body, SampleLayout::WORDS, &flags, payload.len()).unwrap();
                prop_assert_eq!(decoded, rounded(&payload, SampleLayout::WORDS, flags.noise_bits));
            }

            /// Property: rounding already-rounded data changes nothing
            #[test]
            fn prop_rounding_idempotent(
                payload in prop::collection::vec(any::<u8>(), 0..=512),
                bits in 0u8..=7,
            ) {
                let once = rounded(&payload, SampleLayout::WORDS, NoiseBits::Removed(bits));
                let twice = rounded(&once, SampleLayout::WORDS, NoiseBits::Removed(bits));
                prop_assert_eq!(once, twice);
            }

            /// Property: Gray coding inverts for every 16-bit value
            #[test]
            fn prop_gray_involution(value in any::<u16>()) {
                prop_assert_eq!(gray::from_gray(gray::to_gray(value)), value);
            }
        }
    }
}
