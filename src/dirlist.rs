//! Decoder for the directory listing blob both transports return, plus the
//! camera-side path rules (DOS-style drive letters and backslashes).
//!
//! Listing layout after a transport-specific header: the NUL-terminated
//! path being listed, then one record per entry. A record is an attribute
//! byte, one pad byte, big-endian size, big-endian timestamp and the
//! NUL-terminated name. An empty name terminates the listing.

use std::fmt;

use chrono::DateTime;

use crate::{CamError, CamResult};

/// Header bytes before the listed path. The serial transport prefixes a
/// longer preamble than USB does.
pub const SERIAL_HEADER_SKIP: usize = 31;
pub const USB_HEADER_SKIP: usize = 10;

pub const ATTR_PROTECTED: u8 = 1 << 0;
pub const ATTR_ITEMS: u8 = 1 << 4;
pub const ATTR_NEW: u8 = 1 << 5;
pub const ATTR_ENTERED: u8 = 1 << 7;

/// The camera's per-entry attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttributes(pub u8);

impl FileAttributes {
    pub fn is_protected(&self) -> bool {
        self.0 & ATTR_PROTECTED != 0
    }

    /// Set on directories (and on directories containing new images).
    pub fn has_items(&self) -> bool {
        self.0 & ATTR_ITEMS != 0
    }

    pub fn is_new(&self) -> bool {
        self.0 & ATTR_NEW != 0
    }

    pub fn was_entered(&self) -> bool {
        self.0 & ATTR_ENTERED != 0
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.has_items() { 'd' } else { '-' },
            if self.is_protected() { 'p' } else { '-' },
            if self.is_new() { 'n' } else { '-' },
            if self.was_entered() { 'e' } else { '-' },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attributes: FileAttributes,
    pub size: u32,
    /// Unix seconds, already adjusted from the camera's local clock.
    pub date: i64,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.has_items()
    }
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = DateTime::from_timestamp(self.date, 0)
            .map(|d| d.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "????-??-?? ??:??:??".into());
        write!(
            f,
            "{} {:>9} {} {}",
            self.attributes, self.size, date, self.name
        )
    }
}

/// One successfully decoded listing. Entries stay in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

/// Decodes a listing blob. `skip` is the transport header size and
/// `gmt_offset` the seconds to add to each raw timestamp. A blob that runs
/// out mid-record is an error; the caller keeps its previous listing.
pub fn decode(data: &[u8], skip: usize, gmt_offset: i64) -> CamResult<DirListing> {
    let body = data.get(skip..).ok_or(CamError::InvalidFormat)?;

    let path_end = body
        .iter()
        .position(|&b| b == 0)
        .ok_or(CamError::InvalidFormat)?;
    let path = String::from_utf8_lossy(&body[..path_end]).into_owned();

    let mut entries = Vec::new();
    let mut cursor = path_end + 1;
    loop {
        // An entry record needs its 10 fixed bytes plus at least the name
        // terminator; an empty name means end of listing.
        let record = body.get(cursor..cursor + 11).ok_or(CamError::InvalidFormat)?;
        if record[10] == 0 {
            break;
        }

        let attributes = FileAttributes(record[0]);
        let size = u32::from_be_bytes([record[2], record[3], record[4], record[5]]);
        let raw_date = u32::from_be_bytes([record[6], record[7], record[8], record[9]]);

        let name_start = cursor + 10;
        let name_end = body[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .ok_or(CamError::InvalidFormat)?;
        let name = String::from_utf8_lossy(&body[name_start..name_end]).into_owned();

        entries.push(DirEntry {
            name,
            attributes,
            size,
            date: raw_date as i64 + gmt_offset,
        });
        cursor = name_end + 1;
    }

    Ok(DirListing { path, entries })
}

/// Resolves a user-supplied path against the current camera directory.
/// Anything without a drive letter is relative; `..` goes up one level but
/// never above the drive root.
pub fn resolve(current: &str, arg: &str) -> String {
    if arg == ".." {
        let trimmed = current.trim_end_matches('\\');
        return match trimmed.rfind('\\') {
            Some(pos) if pos > 2 => trimmed[..pos].to_string(),
            _ => {
                // Down to "X:\" at most.
                let drive: String = trimmed.chars().take(2).collect();
                format!("{drive}\\")
            }
        };
    }
    if arg.len() > 2 && arg.as_bytes()[1] == b':' {
        return arg.to_string();
    }
    format!("{}\\{}", current.trim_end_matches('\\'), arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn push_entry(buf: &mut Vec<u8>, attr: u8, size: u32, date: u32, name: &str) {
        buf.push(attr);
        buf.push(0);
        buf.extend_from_slice(&size.to_be_bytes());
        buf.extend_from_slice(&date.to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
    }

    fn fixture() -> Vec<u8> {
        let mut buf = vec![0xAA; USB_HEADER_SKIP];
        buf.extend_from_slice(b"D:\\DCIM\0");
        push_entry(&mut buf, ATTR_ITEMS, 0, 0x3B9A_CA00, "100CANON");
        push_entry(&mut buf, ATTR_PROTECTED, 123_456, 0x3B9A_CA10, "IMG_0001.JPG");
        push_entry(&mut buf, 0, 654_321, 0x3B9A_CA20, "IMG_0002.JPG");
        buf.push(0); // terminator: empty name
        buf
    }

    #[test]
    fn decodes_entries_in_wire_order() {
        let listing = decode(&fixture(), USB_HEADER_SKIP, 3600).unwrap();
        assert_eq!(listing.path, "D:\\DCIM");
        assert_eq!(listing.entries.len(), 3);

        assert_eq!(listing.entries[0].name, "100CANON");
        assert!(listing.entries[0].is_directory());
        assert_eq!(listing.entries[0].date, 0x3B9A_CA00 + 3600);

        assert_eq!(listing.entries[1].name, "IMG_0001.JPG");
        assert!(listing.entries[1].attributes.is_protected());
        assert!(!listing.entries[1].is_directory());
        assert_eq!(listing.entries[1].size, 123_456);

        assert_eq!(listing.entries[2].name, "IMG_0002.JPG");
        assert_eq!(listing.entries[2].size, 654_321);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let full = fixture();
        // Cut inside the second record's fixed fields.
        let cut = &full[..USB_HEADER_SKIP + 8 + 19 + 4];
        assert!(matches!(
            decode(cut, USB_HEADER_SKIP, 0),
            Err(CamError::InvalidFormat)
        ));
    }

    #[test]
    fn unterminated_name_is_an_error() {
        let mut buf = vec![0xAA; USB_HEADER_SKIP];
        buf.extend_from_slice(b"D:\\\0");
        buf.push(0);
        buf.push(0);
        buf.extend_from_slice(&42u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"CUTOFF");
        assert!(matches!(
            decode(&buf, USB_HEADER_SKIP, 0),
            Err(CamError::InvalidFormat)
        ));
    }

    #[test]
    fn empty_listing_has_path_only() {
        let mut buf = vec![0xAA; USB_HEADER_SKIP];
        buf.extend_from_slice(b"D:\\DCIM\0");
        buf.extend_from_slice(&[0; 11]);
        let listing = decode(&buf, USB_HEADER_SKIP, 0).unwrap();
        assert_eq!(listing.path, "D:\\DCIM");
        assert!(listing.entries.is_empty());
    }

    #[test]
    fn path_resolution() {
        assert_eq!(resolve("D:\\DCIM", "100CANON"), "D:\\DCIM\\100CANON");
        assert_eq!(resolve("D:\\", "DCIM"), "D:\\DCIM");
        assert_eq!(resolve("D:\\DCIM\\100CANON", ".."), "D:\\DCIM");
        assert_eq!(resolve("D:\\DCIM", ".."), "D:\\");
        assert_eq!(resolve("D:\\", ".."), "D:\\");
        assert_eq!(resolve("D:\\DCIM", "C:\\DCIM"), "C:\\DCIM");
    }
}
