//! Bit-packing helpers shared by the framing, CRC, and protocol layers.

/// Pack a slice of `0`/`1` bits, most-significant bit first within each
/// byte, into bytes. A trailing partial chunk is left-aligned (padded with
/// zero bits on the low end), matching how trailing partial bytes arrive
/// from the symbol recovery layer.
pub fn pack_bits_msb(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << (7 - i)))
        })
        .collect()
}

/// Pack a slice of `0`/`1` bits, least-significant bit first within each
/// byte. NFC-A/B/F/V all transmit LSB-first at the byte level.
pub fn pack_bits_lsb(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |acc, (i, &b)| acc | ((b & 1) << i))
        })
        .collect()
}

/// Unpack a byte into 8 bits, least-significant bit first.
pub fn byte_to_bits_lsb(byte: u8) -> [u8; 8] {
    let mut bits = [0u8; 8];
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (byte >> i) & 1;
    }
    bits
}

/// Format a byte slice as colon-separated uppercase hex, matching the
/// archive file's `frameData` encoding.
pub fn hex_colon(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Inverse of [`hex_colon`].
pub fn from_hex_colon(text: &str) -> Option<Vec<u8>> {
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(':')
        .map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

/// Count set bits, used for odd/even parity computation.
pub fn parity_of(byte: u8) -> u8 {
    byte.count_ones() as u8 % 2
}
