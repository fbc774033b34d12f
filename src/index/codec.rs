//! Checksummed container format for index files.
//!
//! Every segment and commit point is stored as
//!
//! ```text
//! magic (u32) | version (u32) | payload length (u64) | payload | crc32 (u32)
//! ```
//!
//! with all integers little-endian. The CRC covers the header and payload.
//! Any mismatch is reported as [`NrtError::Corrupt`] so that readers never
//! load a damaged index silently.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{NrtError, Result};

/// File magic, "SNRT".
pub const MAGIC: u32 = 0x534E_5254;

/// Current container version.
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8;
const FOOTER_LEN: usize = 4;

/// Wrap a payload in the checksummed container.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + FOOTER_LEN);
    // Writing into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(MAGIC);
    let _ = out.write_u32::<LittleEndian>(VERSION);
    let _ = out.write_u64::<LittleEndian>(payload.len() as u64);
    out.extend_from_slice(payload);
    let checksum = crc32fast::hash(&out);
    let _ = out.write_u32::<LittleEndian>(checksum);
    out
}

/// Validate a container and return its payload.
///
/// `name` is only used in error messages.
pub fn decode<'a>(name: &str, data: &'a [u8]) -> Result<&'a [u8]> {
    if data.len() < HEADER_LEN + FOOTER_LEN {
        return Err(NrtError::corrupt(format!(
            "{name}: truncated file ({} bytes)",
            data.len()
        )));
    }

    let mut header = Cursor::new(data);
    let magic = header.read_u32::<LittleEndian>()?;
    if magic != MAGIC {
        return Err(NrtError::corrupt(format!("{name}: bad magic {magic:#010x}")));
    }
    let version = header.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(NrtError::corrupt(format!(
            "{name}: unsupported format version {version}"
        )));
    }
    let payload_len = header.read_u64::<LittleEndian>()? as usize;
    let expected_len = HEADER_LEN
        .checked_add(payload_len)
        .and_then(|len| len.checked_add(FOOTER_LEN));
    if expected_len != Some(data.len()) {
        return Err(NrtError::corrupt(format!(
            "{name}: length mismatch (header says {payload_len} payload bytes, file has {})",
            data.len()
        )));
    }

    let body_end = HEADER_LEN + payload_len;
    let mut footer = &data[body_end..];
    let stored = footer.read_u32::<LittleEndian>()?;
    let actual = crc32fast::hash(&data[..body_end]);
    if stored != actual {
        return Err(NrtError::corrupt(format!(
            "{name}: checksum mismatch (stored {stored:#010x}, computed {actual:#010x})"
        )));
    }

    Ok(&data[HEADER_LEN..body_end])
}
