//! ASCII-safe body encodings for links that are not 8-bit clean.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::protocol::{AsciiEncoding, Error, Result};

const A85_FIRST: u8 = b'!';
const A85_LAST: u8 = b'u';
const A85_ZERO_GROUP: u8 = b'z';

/// Apply the ASCII stage.
#[must_use]
pub fn encode(encoding: AsciiEncoding, input: &[u8]) -> Vec<u8> {
    match encoding {
        AsciiEncoding::None => input.to_vec(),
        AsciiEncoding::Ascii85 => ascii85_encode(input),
        AsciiEncoding::Base64 => STANDARD.encode(input).into_bytes(),
    }
}

/// Invert the ASCII stage.
pub fn decode(encoding: AsciiEncoding, input: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        AsciiEncoding::None => Ok(input.to_vec()),
        AsciiEncoding::Ascii85 => ascii85_decode(input),
        AsciiEncoding::Base64 => STANDARD
            .decode(input)
            .map_err(|err| Error::pipeline("base64", err.to_string())),
    }
}

/// Btoa-style ASCII85 without `<~ ~>` delimiters; all-zero groups become `z`.
#[must_use]
pub fn ascii85_encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len().div_ceil(4) * 5);
    for chunk in input.chunks(4) {
        if chunk.len() == 4 && chunk.iter().all(|&b| b == 0) {
            out.push(A85_ZERO_GROUP);
            continue;
        }
        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut value = u32::from_be_bytes(group);
        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            // value % 85 < 85, so the narrowing is exact
            *digit = A85_FIRST + (value % 85) as u8;
            value /= 85;
        }
        out.extend_from_slice(&digits[..=chunk.len()]);
    }
    out
}

/// Inverse of [`ascii85_encode`].
pub fn ascii85_decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 5 * 4 + 4);
    let mut group = [0u8; 5];
    let mut filled = 0usize;

    for &ch in input {
        match ch {
            A85_ZERO_GROUP if filled == 0 => out.extend_from_slice(&[0; 4]),
            A85_FIRST..=A85_LAST => {
                group[filled] = ch - A85_FIRST;
                filled += 1;
                if filled == 5 {
                    out.extend_from_slice(&decode_group(&group)?);
                    filled = 0;
                }
            }
            other => {
                return Err(Error::pipeline(
                    "ascii85",
                    format!("invalid character {:?}", char::from(other)),
                ));
            }
        }
    }

    match filled {
        0 => {}
        1 => return Err(Error::pipeline("ascii85", "dangling final character")),
        n => {
            for digit in &mut group[n..] {
                *digit = A85_LAST - A85_FIRST;
            }
            let bytes = decode_group(&group)?;
            out.extend_from_slice(&bytes[..n - 1]);
        }
    }
    Ok(out)
}

fn decode_group(digits: &[u8; 5]) -> Result<[u8; 4]> {
    let value = digits
        .iter()
        .fold(0u64, |acc, &digit| acc * 85 + u64::from(digit));
    let value =
        u32::try_from(value).map_err(|_| Error::pipeline("ascii85", "group exceeds 32 bits"))?;
    Ok(value.to_be_bytes())
}
