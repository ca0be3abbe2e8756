//! 16-bit CRC protecting the de-escaped content of every serial frame.
//!
//! Reflected CRC, polynomial `0xA001`, zero init, transmitted little-endian
//! right after the frame content.

pub fn compute(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Checks the trailing two bytes of `frame` against the CRC of the rest.
/// Returns the content slice on success.
pub fn verify(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 2 {
        return None;
    }
    let (content, tail) = frame.split_at(frame.len() - 2);
    let expected = u16::from_le_bytes([tail[0], tail[1]]);
    if compute(content) == expected {
        Some(content)
    } else {
        None
    }
}

pub fn append(content: &mut Vec<u8>) {
    let crc = compute(content);
    content.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_value() {
        // CRC-16/ARC check value for "123456789".
        assert_eq!(compute(b"123456789"), 0xBB3D);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(compute(&[]), 0);
    }

    #[test]
    fn append_then_verify_roundtrip() {
        let mut frame = vec![0x00, 0x05, 0x00, 0x01, 0x02];
        append(&mut frame);
        assert_eq!(verify(&frame), Some(&frame[..frame.len() - 2]));
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let mut frame = vec![0x01, 0x00, 0x03, 0x00, 0xAA, 0xBB, 0xCC];
        append(&mut frame);
        for i in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[i] ^= 1 << bit;
                assert!(verify(&corrupted).is_none(), "flip at byte {i} bit {bit}");
            }
        }
    }

    #[test]
    fn short_frame_is_rejected() {
        assert_eq!(verify(&[0x42]), None);
        assert_eq!(verify(&[]), None);
    }
}
