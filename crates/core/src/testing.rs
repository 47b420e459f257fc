//! Builders for raw record batches, for tests and benchmarks

use crate::record::NOTIFY_INFORMATION_HEADER;

/// Builds a `FILE_NOTIFY_INFORMATION` chain the way the OS lays it out:
/// each record DWORD-aligned, the last one with a zero next offset.
#[derive(Debug, Default)]
pub struct NotifyInformationWriter {
    records: Vec<(u32, Vec<u16>)>,
}

impl NotifyInformationWriter {
    /// Start an empty chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record with the given `FILE_ACTION_*` code
    pub fn record(mut self, action: u32, name: &str) -> Self {
        self.records.push((action, name.encode_utf16().collect()));
        self
    }

    /// Serialize the chain
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        let count = self.records.len();

        for (index, (action, name)) in self.records.into_iter().enumerate() {
            let name_len = name.len() * 2;
            let record_len = NOTIFY_INFORMATION_HEADER + name_len;
            let padded = (record_len + 3) & !3;
            let next = if index + 1 == count { 0 } else { padded as u32 };

            out.extend_from_slice(&next.to_le_bytes());
            out.extend_from_slice(&action.to_le_bytes());
            out.extend_from_slice(&(name_len as u32).to_le_bytes());
            for unit in name {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            if next != 0 {
                out.resize(out.len() + (padded - record_len), 0);
            }
        }

        out
    }
}

/// Builds a sequence of `inotify_event` structs with NUL-padded names
#[derive(Debug, Default)]
pub struct InotifyWriter {
    out: Vec<u8>,
}

impl InotifyWriter {
    /// Start an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event with the given `IN_*` mask
    pub fn event(mut self, mask: u32, name: &str) -> Self {
        let name_len = if name.is_empty() {
            0
        } else {
            (name.len() + 1 + 3) & !3
        };

        self.out.extend_from_slice(&1i32.to_ne_bytes());
        self.out.extend_from_slice(&mask.to_ne_bytes());
        self.out.extend_from_slice(&0u32.to_ne_bytes());
        self.out.extend_from_slice(&(name_len as u32).to_ne_bytes());
        let start = self.out.len();
        self.out.extend_from_slice(name.as_bytes());
        self.out.resize(start + name_len, 0);
        self
    }

    /// Serialize the sequence
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}
