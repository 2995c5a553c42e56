//! Gray coding of 16-bit samples.

/// Binary to reflected Gray code.
#[inline]
#[must_use]
pub const fn to_gray(value: u16) -> u16 {
    value ^ (value >> 1)
}

/// Reflected Gray code back to binary (prefix XOR).
#[inline]
#[must_use]
pub const fn from_gray(gray: u16) -> u16 {
    let mut value = gray;
    value ^= value >> 1;
    value ^= value >> 2;
    value ^= value >> 4;
    value ^= value >> 8;
    value
}

/// Gray-code every sample in place.
pub fn encode_in_place(samples: &mut [u16]) {
    for sample in samples {
        *sample = to_gray(*sample);
    }
}

/// Undo [`encode_in_place`].
pub fn decode_in_place(samples: &mut [u16]) {
    for sample in samples {
        *sample = from_gray(*sample);
    }
}
