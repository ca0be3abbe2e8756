//! Bounds-checked readers for the fixed-offset fields the camera's
//! responses are made of.

use crate::{CamError, CamResult};

pub(crate) fn byte(data: &[u8], offset: usize) -> CamResult<u8> {
    data.get(offset).copied().ok_or(CamError::InvalidFormat)
}

pub(crate) fn be32(data: &[u8], offset: usize) -> CamResult<u32> {
    let field = data
        .get(offset..offset + 4)
        .ok_or(CamError::InvalidFormat)?;
    Ok(u32::from_be_bytes([field[0], field[1], field[2], field[3]]))
}

pub(crate) fn le32(data: &[u8], offset: usize) -> CamResult<u32> {
    let field = data
        .get(offset..offset + 4)
        .ok_or(CamError::InvalidFormat)?;
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// NUL-terminated string starting at `offset`.
pub(crate) fn cstr(data: &[u8], offset: usize) -> CamResult<String> {
    let tail = data.get(offset..).ok_or(CamError::InvalidFormat)?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(CamError::InvalidFormat)?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// String in a fixed-size field, NUL-padded but possibly full.
pub(crate) fn cstr_fixed(data: &[u8], offset: usize, max: usize) -> CamResult<String> {
    let field = data
        .get(offset..offset + max)
        .ok_or(CamError::InvalidFormat)?;
    let end = field.iter().position(|&b| b == 0).unwrap_or(max);
    Ok(String::from_utf8_lossy(&field[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reads_are_bounds_checked() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        assert_eq!(be32(&data, 0).unwrap(), 0x1234_5678);
        assert_eq!(le32(&data, 1).unwrap(), 0x9A78_5634);
        assert!(be32(&data, 2).is_err());
        assert!(byte(&data, 5).is_err());
    }

    #[test]
    fn cstr_requires_a_terminator() {
        let data = b"ab\0cd";
        assert_eq!(cstr(data, 0).unwrap(), "ab");
        assert_eq!(cstr(data, 3).unwrap_err().to_string(), crate::CamError::InvalidFormat.to_string());
    }

    #[test]
    fn fixed_field_may_lack_a_terminator() {
        let data = b"Canon PowerShot S10\0\0\0\0\0";
        assert_eq!(cstr_fixed(data, 0, 24).unwrap(), "Canon PowerShot S10");
        assert_eq!(cstr_fixed(b"full", 0, 4).unwrap(), "full");
        assert!(cstr_fixed(b"xy", 0, 4).is_err());
    }
}
