//! On-disk layout of the counter file and the update payloads.
//!
//! The counter file is an 8-byte version tag followed by one little-endian
//! `u16` per sector, in sector order. Update payloads are a length-prefixed
//! path followed by fixed-width fields.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::RefCountError;

/// The only recognized counter file version.
pub const COUNTER_VERSION: [u8; 8] = [1, 0, 0, 0, 0, 0, 0, 0];

/// File extension of counter files.
pub const COUNTER_EXTENSION: &str = ".rc";

pub const HEADER_LEN: u64 = 8;
pub const COUNTER_WIDTH: u64 = 2;

/// Byte offset of a sector's counter. Valid for in-range sector indices.
pub fn counter_offset(sector: u64) -> u64 {
    HEADER_LEN + COUNTER_WIDTH * sector
}

/// Number of whole counters a file of `file_len` bytes holds.
pub fn num_sectors_for_len(file_len: u64) -> u64 {
    file_len.saturating_sub(HEADER_LEN) / COUNTER_WIDTH
}

pub fn encode_write_at(path: &Path, sector: u64, value: u16) -> Result<Bytes, RefCountError> {
    let mut buf = Vec::new();
    put_path(&mut buf, path)?;
    buf.extend_from_slice(&sector.to_le_bytes());
    buf.extend_from_slice(&value.to_le_bytes());
    Ok(Bytes::from(buf))
}

pub fn decode_write_at(instructions: &[u8]) -> Result<(PathBuf, u64, u16), RefCountError> {
    let (path, rest) = take_path(instructions)?;
    let (sector, rest) = take_u64(rest)?;
    let (value, _) = take_u16(rest)?;
    Ok((path, sector, value))
}

pub fn encode_truncate(path: &Path, new_num_sectors: u64) -> Result<Bytes, RefCountError> {
    let mut buf = Vec::new();
    put_path(&mut buf, path)?;
    buf.extend_from_slice(&new_num_sectors.to_le_bytes());
    Ok(Bytes::from(buf))
}

pub fn decode_truncate(instructions: &[u8]) -> Result<(PathBuf, u64), RefCountError> {
    let (path, rest) = take_path(instructions)?;
    let (new_num_sectors, _) = take_u64(rest)?;
    Ok((path, new_num_sectors))
}

pub fn encode_delete(path: &Path) -> Result<Bytes, RefCountError> {
    let mut buf = Vec::new();
    put_path(&mut buf, path)?;
    Ok(Bytes::from(buf))
}

pub fn decode_delete(instructions: &[u8]) -> Result<PathBuf, RefCountError> {
    let (path, _) = take_path(instructions)?;
    Ok(path)
}

fn invalid(reason: impl Into<String>) -> RefCountError {
    RefCountError::InvalidUpdate {
        reason: reason.into(),
    }
}

fn put_path(buf: &mut Vec<u8>, path: &Path) -> Result<(), RefCountError> {
    let Some(path) = path.to_str() else {
        return Err(invalid("path is not valid utf-8"));
    };
    let Ok(len) = u16::try_from(path.len()) else {
        return Err(invalid(format!("path length {} exceeds u16", path.len())));
    };
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(path.as_bytes());
    Ok(())
}

fn take_path(buf: &[u8]) -> Result<(PathBuf, &[u8]), RefCountError> {
    let (len, rest) = take_u16(buf)?;
    let len = usize::from(len);
    if rest.len() < len {
        return Err(invalid(format!(
            "payload too short for path of {len} bytes"
        )));
    }
    let path = std::str::from_utf8(&rest[..len]).map_err(|_| invalid("path is not valid utf-8"))?;
    Ok((PathBuf::from(path), &rest[len..]))
}

fn take_u64(buf: &[u8]) -> Result<(u64, &[u8]), RefCountError> {
    if buf.len() < 8 {
        return Err(invalid("payload too short for u64 field"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    Ok((u64::from_le_bytes(bytes), &buf[8..]))
}

fn take_u16(buf: &[u8]) -> Result<(u16, &[u8]), RefCountError> {
    if buf.len() < 2 {
        return Err(invalid("payload too short for u16 field"));
    }
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[..2]);
    Ok((u16::from_le_bytes(bytes), &buf[2..]))
}
