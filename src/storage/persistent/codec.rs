//! Framing codec for WAL entries and segment payloads.
//!
//! Each frame is:
//! ```text
//! [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//! Files start with a 5-byte header: [`MAGIC`] followed by the codec version.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying contactlink files.
pub const MAGIC: [u8; 4] = *b"CLNK";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Frames larger than this are treated as corruption.
const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

fn invalid(msg: String) -> IoError {
    IoError::new(ErrorKind::InvalidData, msg)
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Serialize `value` into one checksummed frame.
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value).map_err(|e| invalid(format!("serialization failed: {e}")))?;
    let len = u32::try_from(data.len())
        .map_err(|_| invalid(format!("frame of {} bytes is too large", data.len())))?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    Ok(out)
}

/// Read one frame and deserialize it.
///
/// A frame cut short by end-of-file yields `ErrorKind::UnexpectedEof`, which
/// callers treat as a torn write. Every other failure is `InvalidData`.
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported codec version: {} (expected {CODEC_VERSION})",
            version[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(invalid(format!(
            "frame size {len} exceeds maximum {MAX_FRAME_BYTES}"
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = checksum(&data);
    if stored != computed {
        return Err(invalid(format!(
            "CRC mismatch: stored={stored:08x}, computed={computed:08x} (data corrupted)"
        )));
    }

    serde_json::from_slice(&data).map_err(|e| invalid(format!("deserialization failed: {e}")))
}

/// Whether `bytes` starts with a whole frame whose checksum matches.
///
/// Does not deserialize the payload.
pub fn is_complete_frame(bytes: &[u8]) -> bool {
    let Some((&version, rest)) = bytes.split_first() else {
        return false;
    };
    if version != CODEC_VERSION || rest.len() < 4 {
        return false;
    }
    let (len_bytes, rest) = rest.split_at(4);
    let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if len > MAX_FRAME_BYTES || rest.len() < len + 4 {
        return false;
    }
    let (data, rest) = rest.split_at(len);
    let stored = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
    stored == checksum(data)
}

/// Write the file header.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(invalid(format!(
            "invalid magic bytes: expected {MAGIC:?}, got {:?}",
            &header[..4]
        )));
    }
    if header[4] != CODEC_VERSION {
        return Err(invalid(format!(
            "unsupported file version: {} (expected {CODEC_VERSION})",
            header[4]
        )));
    }
    Ok(())
}
