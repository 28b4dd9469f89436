//! CRC-16 variants and ITU parity, one per contactless technology.
//!
//! Each tech fixes its own polynomial/seed/reflection/xorout combination;
//! these are expressed as `crc::Algorithm` constants and driven through
//! `crc::Crc::<u16>` the same way a single fixed algorithm would be, just
//! parameterized per call site.

use crc::{Algorithm, Crc};

use crate::utils::parity_of;

/// NFC-A/NFC-B share polynomial 0x1021, reflected in/out, but differ in
/// seed and final xor.
const NFCA_ALG: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x6363,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0x0000,
    residue: 0x0000,
};

const NFCB_ALG: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF,
    check: 0x0000,
    residue: 0x0000,
};

/// NFC-F uses the same polynomial, non-reflected, seeded with zero, and
/// is always computed starting from byte index 2 (skipping the frame's
/// leading length byte) by the caller.
const NFCF_ALG: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: false,
    refout: false,
    xorout: 0x0000,
    check: 0x0000,
    residue: 0x0000,
};

/// NFC-V: CRC-16/CCITT reflected, seed 0xFFFF, inverted final.
const NFCV_ALG: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xFFFF,
    refin: true,
    refout: true,
    xorout: 0xFFFF,
    check: 0x0000,
    residue: 0x0000,
};

fn compute(alg: &'static Algorithm<u16>, data: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(alg);
    crc.checksum(data)
}

pub fn nfca_crc(data: &[u8]) -> u16 {
    compute(&NFCA_ALG, data)
}

pub fn nfcb_crc(data: &[u8]) -> u16 {
    compute(&NFCB_ALG, data)
}

/// `data` must start at byte 2 of the frame (the caller skips the
/// length byte before calling this).
pub fn nfcf_crc(data: &[u8]) -> u16 {
    compute(&NFCF_ALG, data)
}

pub fn nfcv_crc(data: &[u8]) -> u16 {
    compute(&NFCV_ALG, data)
}

/// Append a little-endian CRC-16 trailer (NFC-A/B/V).
pub fn append_le(data: &mut Vec<u8>, crc: u16) {
    data.push((crc & 0xFF) as u8);
    data.push((crc >> 8) as u8);
}

/// Append a big-endian CRC-16 trailer (NFC-F).
pub fn append_be(data: &mut Vec<u8>, crc: u16) {
    data.push((crc >> 8) as u8);
    data.push((crc & 0xFF) as u8);
}

/// Verify a frame's trailing little-endian CRC-16 against the algorithm
/// computed over everything but the trailer. Returns `true` (no error)
/// when the frame is too short to carry a CRC at all, matching the
/// decoder's stance that CRC checking never applies to short frames.
pub fn verify_le(data: &[u8], crc_fn: impl Fn(&[u8]) -> u16) -> bool {
    if data.len() < 2 {
        return true;
    }
    let (payload, trailer) = data.split_at(data.len() - 2);
    let expected = crc_fn(payload);
    trailer[0] == (expected & 0xFF) as u8 && trailer[1] == (expected >> 8) as u8
}

/// Verify a frame's trailing big-endian CRC-16 (NFC-F).
pub fn verify_be(data: &[u8], crc_fn: impl Fn(&[u8]) -> u16) -> bool {
    if data.len() < 2 {
        return true;
    }
    let (payload, trailer) = data.split_at(data.len() - 2);
    let expected = crc_fn(payload);
    trailer[0] == (expected >> 8) as u8 && trailer[1] == (expected & 0xFF) as u8
}

/// ITU even-parity bit for one data byte, as appended after every
/// NFC-A full-length byte.
pub fn even_parity_bit(byte: u8) -> u8 {
    parity_of(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfca_crc_roundtrips_through_append_and_verify() {
        let mut frame = vec![0x26, 0x00];
        let crc = nfca_crc(&frame);
        append_le(&mut frame, crc);
        assert!(verify_le(&frame, nfca_crc));
    }

    #[test]
    fn corrupted_nfca_frame_fails_verification() {
        let mut frame = vec![0x93, 0x20, 0x12, 0x34];
        let crc = nfca_crc(&frame);
        append_le(&mut frame, crc);
        *frame.last_mut().unwrap() ^= 0xFF;
        assert!(!verify_le(&frame, nfca_crc));
    }

    #[test]
    fn nfcf_crc_is_big_endian() {
        let mut frame = vec![0x12, 0x01, 0x02, 0x03];
        let crc = nfcf_crc(&frame[2..]);
        append_be(&mut frame, crc);
        assert!(verify_be(&frame[2..], nfcf_crc));
    }

    #[test]
    fn nfcv_crc_roundtrips() {
        let mut frame = vec![0x26, 0x01];
        let crc = nfcv_crc(&frame);
        append_le(&mut frame, crc);
        assert!(verify_le(&frame, nfcv_crc));
    }

    #[test]
    fn even_parity_matches_bit_count() {
        assert_eq!(even_parity_bit(0b0000_0011), 0);
        assert_eq!(even_parity_bit(0b0000_0001), 1);
    }

    #[test]
    fn short_frames_never_fail_crc_check() {
        assert!(verify_le(&[0x26], nfca_crc));
        assert!(verify_le(&[], nfca_crc));
    }
}
