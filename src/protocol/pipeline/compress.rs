//! Whole-payload DEFLATE stage.

use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::protocol::{Error, Result};

/// Compress with raw DEFLATE at the best ratio; CPU is cheaper than modem time.
pub fn deflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(input.len() / 2), Level::best());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

/// Inflate a raw DEFLATE stream, refusing output larger than `limit` bytes.
pub fn inflate(input: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(input).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(limit);
    decoder
        .read_to_end(&mut out)
        .map_err(|err| Error::pipeline("deflate", err.to_string()))?;
    if out.len() > limit {
        return Err(Error::pipeline(
            "deflate",
            format!("inflated past the {limit}-byte limit"),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_shrinks_runs() {
        let input = vec![0u8; 4096];
        let packed = deflate(&input).unwrap();
        assert!(packed.len() < 64);
        assert_eq!(inflate(&packed, input.len()).unwrap(), input);
    }

    #[test]
    fn limit_is_enforced() {
        let packed = deflate(&[7u8; 1000]).unwrap();
        assert!(inflate(&packed, 999).is_err());
        assert_eq!(inflate(&packed, 1000).unwrap().len(), 1000);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            inflate(&[0xFF, 0xFF, 0xFF, 0xFF], 100),
            Err(Error::Pipeline { stage: "deflate", .. })
        ));
    }
}
