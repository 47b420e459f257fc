//! Bounds-checked decoding of raw change-record batches
//!
//! A batch is whatever one completed read left in a receive buffer. Two
//! layouts are understood:
//!
//! - [`RecordFormat::NotifyInformation`]: the Windows
//!   `FILE_NOTIFY_INFORMATION` chain (12-byte header, UTF-16LE name,
//!   records linked by a next-entry offset, `0` terminates).
//! - [`RecordFormat::Inotify`]: back-to-back Linux `inotify_event`
//!   structs (16-byte header, NUL-padded name).
//!
//! Decoding is all-or-nothing: a batch either yields every record or a
//! single [`DecodeError`].

use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// `FILE_NOTIFY_INFORMATION` header: NextEntryOffset, Action, FileNameLength
pub const NOTIFY_INFORMATION_HEADER: usize = 12;

/// `inotify_event` header: wd, mask, cookie, len
pub const INOTIFY_HEADER: usize = 16;

/// Windows `FILE_ACTION_*` codes
pub mod file_action {
    pub const ADDED: u32 = 1;
    pub const REMOVED: u32 = 2;
    pub const MODIFIED: u32 = 3;
    pub const RENAMED_OLD_NAME: u32 = 4;
    pub const RENAMED_NEW_NAME: u32 = 5;
}

/// Linux `IN_*` mask bits
pub mod inotify_mask {
    pub const IN_MODIFY: u32 = 0x0000_0002;
    pub const IN_ATTRIB: u32 = 0x0000_0004;
    pub const IN_MOVED_FROM: u32 = 0x0000_0040;
    pub const IN_MOVED_TO: u32 = 0x0000_0080;
    pub const IN_CREATE: u32 = 0x0000_0100;
    pub const IN_DELETE: u32 = 0x0000_0200;
    pub const IN_DELETE_SELF: u32 = 0x0000_0400;
    pub const IN_MOVE_SELF: u32 = 0x0000_0800;
    pub const IN_UNMOUNT: u32 = 0x0000_2000;
    pub const IN_Q_OVERFLOW: u32 = 0x0000_4000;
    pub const IN_IGNORED: u32 = 0x0000_8000;
}

/// What happened to the entry named by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Entry created
    Added,
    /// Entry deleted
    Removed,
    /// Entry contents or metadata changed
    Modified,
    /// Old name of a renamed entry
    RenamedFrom,
    /// New name of a renamed entry
    RenamedTo,
    /// The OS dropped records
    Overflow,
    /// The watched directory itself is gone
    Invalidated,
}

/// One decoded change record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Kind of change
    pub action: Action,
    /// Name relative to the watched directory (empty for
    /// `Overflow`/`Invalidated`)
    pub name: PathBuf,
}

/// Ways a raw batch can violate its layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not enough bytes left for the header or name
    #[error("record at offset {offset} is truncated: needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The next-entry offset points into the current record
    #[error("record at offset {offset} links to offset {next} inside itself")]
    Overlap { offset: usize, next: usize },

    /// The chain has no terminator within the transferred bytes
    #[error("record chain leaves the {len} transferred bytes at offset {offset} without a terminator")]
    Overrun { offset: usize, len: usize },

    /// UTF-16 names must be an even number of bytes
    #[error("record at offset {offset} has odd file name length {len}")]
    OddNameLength { offset: usize, len: usize },

    /// The name does not decode on this platform
    #[error("record at offset {offset} has an undecodable file name")]
    InvalidName { offset: usize },

    /// Unknown `FILE_ACTION_*` code
    #[error("record at offset {offset} has unknown action code {action}")]
    UnknownAction { offset: usize, action: u32 },

    /// The reported byte count exceeds the receive buffer
    #[error("batch of {len} bytes exceeds buffer capacity {capacity}")]
    Oversized { len: usize, capacity: usize },
}

/// Layout of the raw batches a backend produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// Windows `FILE_NOTIFY_INFORMATION` chain
    NotifyInformation,
    /// Linux `inotify_event` sequence
    Inotify,
}

impl RecordFormat {
    /// Decode a whole batch
    pub fn decode(self, bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
        match self {
            RecordFormat::NotifyInformation => decode_notify_information(bytes),
            RecordFormat::Inotify => decode_inotify(bytes),
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn read_u32_ne(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(word)
}

/// Header plus name, as long as it fits in what is left of the batch
///
/// `name_len` comes straight from the record, so the sum can exceed
/// `usize` on 32-bit targets.
fn checked_record_len(
    offset: usize,
    header: usize,
    name_len: usize,
    available: usize,
) -> Result<usize, DecodeError> {
    match header.checked_add(name_len) {
        Some(len) if len <= available => Ok(len),
        needed => Err(DecodeError::Truncated {
            offset,
            needed: needed.unwrap_or(usize::MAX),
            available,
        }),
    }
}

/// Decode a `FILE_NOTIFY_INFORMATION` chain
pub fn decode_notify_information(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
    let mut records = Vec::new();
    if bytes.is_empty() {
        return Ok(records);
    }

    let mut offset = 0usize;
    loop {
        let available = bytes.len() - offset;
        if available < NOTIFY_INFORMATION_HEADER {
            return Err(DecodeError::Truncated {
                offset,
                needed: NOTIFY_INFORMATION_HEADER,
                available,
            });
        }

        let next = read_u32(bytes, offset) as usize;
        let action = read_u32(bytes, offset + 4);
        let name_len = read_u32(bytes, offset + 8) as usize;

        if name_len % 2 != 0 {
            return Err(DecodeError::OddNameLength { offset, len: name_len });
        }
        let record_len =
            checked_record_len(offset, NOTIFY_INFORMATION_HEADER, name_len, available)?;
        if next != 0 && next < record_len {
            return Err(DecodeError::Overlap { offset, next });
        }

        let action = match action {
            file_action::ADDED => Action::Added,
            file_action::REMOVED => Action::Removed,
            file_action::MODIFIED => Action::Modified,
            file_action::RENAMED_OLD_NAME => Action::RenamedFrom,
            file_action::RENAMED_NEW_NAME => Action::RenamedTo,
            other => return Err(DecodeError::UnknownAction { offset, action: other }),
        };

        let name_bytes = &bytes[offset + NOTIFY_INFORMATION_HEADER..offset + record_len];
        let units: Vec<u16> = name_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let name = wide_name(&units).ok_or(DecodeError::InvalidName { offset })?;

        records.push(Record {
            action,
            name: PathBuf::from(name),
        });

        if next == 0 {
            return Ok(records);
        }
        offset = match offset.checked_add(next) {
            Some(o) if o < bytes.len() => o,
            _ => return Err(DecodeError::Overrun { offset, len: bytes.len() }),
        };
    }
}

/// Decode a sequence of `inotify_event` structs
pub fn decode_inotify(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
    use inotify_mask::*;

    let mut records = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let available = bytes.len() - offset;
        if available < INOTIFY_HEADER {
            return Err(DecodeError::Truncated {
                offset,
                needed: INOTIFY_HEADER,
                available,
            });
        }

        let mask = read_u32_ne(bytes, offset + 4);
        let name_len = read_u32_ne(bytes, offset + 12) as usize;
        let record_len = checked_record_len(offset, INOTIFY_HEADER, name_len, available)?;

        let raw_name = &bytes[offset + INOTIFY_HEADER..offset + record_len];
        let trimmed = match raw_name.iter().position(|&b| b == 0) {
            Some(end) => &raw_name[..end],
            None => raw_name,
        };

        let action = if mask & IN_Q_OVERFLOW != 0 {
            Some(Action::Overflow)
        } else if mask & (IN_IGNORED | IN_UNMOUNT | IN_DELETE_SELF | IN_MOVE_SELF) != 0 {
            Some(Action::Invalidated)
        } else if mask & IN_CREATE != 0 {
            Some(Action::Added)
        } else if mask & IN_DELETE != 0 {
            Some(Action::Removed)
        } else if mask & IN_MOVED_FROM != 0 {
            Some(Action::RenamedFrom)
        } else if mask & IN_MOVED_TO != 0 {
            Some(Action::RenamedTo)
        } else if mask & (IN_MODIFY | IN_ATTRIB) != 0 {
            Some(Action::Modified)
        } else {
            None
        };

        if let Some(action) = action {
            let name = match action {
                Action::Overflow | Action::Invalidated => OsString::new(),
                _ => byte_name(trimmed).ok_or(DecodeError::InvalidName { offset })?,
            };
            records.push(Record {
                action,
                name: PathBuf::from(name),
            });
        }

        offset += record_len;
    }

    Ok(records)
}

#[cfg(windows)]
fn wide_name(units: &[u16]) -> Option<OsString> {
    use std::os::windows::ffi::OsStringExt;
    Some(OsString::from_wide(units))
}

#[cfg(not(windows))]
fn wide_name(units: &[u16]) -> Option<OsString> {
    String::from_utf16(units).ok().map(OsString::from)
}

#[cfg(unix)]
fn byte_name(bytes: &[u8]) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;
    Some(std::ffi::OsStr::from_bytes(bytes).to_os_string())
}

#[cfg(not(unix))]
fn byte_name(bytes: &[u8]) -> Option<OsString> {
    std::str::from_utf8(bytes).ok().map(OsString::from)
}
