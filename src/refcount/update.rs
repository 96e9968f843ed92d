//! WAL update records for counter files, and their idempotent appliers.
//!
//! Appliers are safe to run twice: re-applying a write yields the same byte
//! pattern, re-truncating to the same length is a no-op, and deleting an
//! already-missing file counts as success. Crash replay depends on this.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::wal::Update;

use super::RefCountError;
use super::codec;

pub const WRITE_AT_UPDATE: &str = "writeAt";
pub const TRUNCATE_UPDATE: &str = "truncate";
pub const DELETE_UPDATE: &str = "delete";

/// Record a single counter write at `sector`.
pub fn write_at_update(path: &Path, sector: u64, value: u16) -> Result<Update, RefCountError> {
    Ok(Update::new(
        WRITE_AT_UPDATE,
        codec::encode_write_at(path, sector, value)?,
    ))
}

/// Record a truncation of the file to `new_num_sectors` counters.
pub fn truncate_update(path: &Path, new_num_sectors: u64) -> Result<Update, RefCountError> {
    Ok(Update::new(
        TRUNCATE_UPDATE,
        codec::encode_truncate(path, new_num_sectors)?,
    ))
}

/// Record the removal of the counter file.
pub fn delete_update(path: &Path) -> Result<Update, RefCountError> {
    Ok(Update::new(DELETE_UPDATE, codec::encode_delete(path)?))
}

pub fn read_write_at_update(update: &Update) -> Result<(PathBuf, u64, u16), RefCountError> {
    expect_tag(update, WRITE_AT_UPDATE)?;
    codec::decode_write_at(&update.instructions)
}

pub fn read_truncate_update(update: &Update) -> Result<(PathBuf, u64), RefCountError> {
    expect_tag(update, TRUNCATE_UPDATE)?;
    codec::decode_truncate(&update.instructions)
}

pub fn read_delete_update(update: &Update) -> Result<PathBuf, RefCountError> {
    expect_tag(update, DELETE_UPDATE)?;
    codec::decode_delete(&update.instructions)
}

fn expect_tag(update: &Update, tag: &str) -> Result<(), RefCountError> {
    if update.name != tag {
        return Err(RefCountError::InvalidUpdate {
            reason: format!("expected {tag:?} update, got {:?}", update.name),
        });
    }
    Ok(())
}

/// Apply one update to disk.
pub fn apply_update(update: &Update) -> Result<(), RefCountError> {
    match update.name.as_str() {
        WRITE_AT_UPDATE => {
            let (path, sector, value) = codec::decode_write_at(&update.instructions)?;
            apply_write_at(&path, sector, value)
        }
        TRUNCATE_UPDATE => {
            let (path, new_num_sectors) = codec::decode_truncate(&update.instructions)?;
            apply_truncate(&path, new_num_sectors)
        }
        DELETE_UPDATE => {
            let path = codec::decode_delete(&update.instructions)?;
            apply_delete(&path)
        }
        other => Err(RefCountError::InvalidUpdate {
            reason: format!("unrecognized update tag {other:?}"),
        }),
    }
}

/// Apply a batch of updates in order. This is the shared entry point for
/// the in-process apply path and for crash replay.
pub fn apply_updates<'a, I>(updates: I) -> Result<(), RefCountError>
where
    I: IntoIterator<Item = &'a Update>,
{
    for update in updates {
        apply_update(update)?;
    }
    Ok(())
}

fn apply_write_at(path: &Path, sector: u64, value: u16) -> Result<(), RefCountError> {
    let offset = codec::COUNTER_WIDTH
        .checked_mul(sector)
        .and_then(|n| n.checked_add(codec::HEADER_LEN))
        .ok_or_else(|| RefCountError::InvalidUpdate {
            reason: format!("sector {sector} offset overflows u64"),
        })?;

    // The file may be missing if a crash hit between the WAL commit and
    // the first apply; recreate it so replay can converge.
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .map_err(io_at(path))?;
    file.seek(SeekFrom::Start(offset)).map_err(io_at(path))?;
    file.write_all(&value.to_le_bytes()).map_err(io_at(path))?;
    file.sync_all().map_err(io_at(path))
}

fn apply_truncate(path: &Path, new_num_sectors: u64) -> Result<(), RefCountError> {
    let new_len = codec::COUNTER_WIDTH
        .checked_mul(new_num_sectors)
        .and_then(|n| n.checked_add(codec::HEADER_LEN))
        .ok_or_else(|| RefCountError::InvalidUpdate {
            reason: format!("sector count {new_num_sectors} overflows u64"),
        })?;

    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(io_at(path))?;
    file.set_len(new_len).map_err(io_at(path))?;
    file.sync_all().map_err(io_at(path))
}

fn apply_delete(path: &Path) -> Result<(), RefCountError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "counter file already deleted");
            Ok(())
        }
        Err(source) => Err(RefCountError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> RefCountError {
    let path = path.to_path_buf();
    move |source| RefCountError::Io { path, source }
}
