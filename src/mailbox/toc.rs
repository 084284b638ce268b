use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// Byte range of one message. Either side may be missing in a table left
/// behind by an interrupted scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl TocEntry {
    pub fn new(start: u64, end: u64) -> Self {
        TocEntry { start: Some(start), end: Some(end) }
    }

    pub fn is_complete(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start <= end)
    }
}

/// Per-mailbox table of contents: sequence number -> byte range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toc {
    pub entries: BTreeMap<usize, TocEntry>,
    pub file_length: u64,   // How far the mailbox file has been read
    pub next_key: usize,
}

impl Toc {
    pub fn new() -> Self {
        Toc::default()
    }

    pub fn len(&self) -> usize {
        self.next_key
    }

    pub fn is_empty(&self) -> bool {
        self.next_key == 0
    }

    pub fn get(&self, seq: usize) -> Option<(u64, u64)> {
        let entry = self.entries.get(&seq)?;
        match (entry.start, entry.end) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        }
    }

    pub fn push(&mut self, start: u64, end: u64) {
        self.entries.insert(self.next_key, TocEntry::new(start, end));
        self.next_key += 1;
    }

    /// Start of the last complete entry, if any.
    pub fn last_start(&self) -> Option<u64> {
        self.next_key
            .checked_sub(1)
            .and_then(|seq| self.get(seq))
            .map(|(start, _)| start)
    }

    /// Drop the first incomplete entry (and everything after it) so the
    /// next read resumes from the last complete message.
    ///
    /// An entry with no start means the previous entry's end could not be
    /// trusted either, so both go. Returns the new length if anything was
    /// rolled back.
    pub fn repair(&mut self) -> Option<usize> {
        let mut rollback: Option<(usize, u64)> = None;
        for (&seq, entry) in &self.entries {
            if seq > 0 && entry.start.is_none() {
                let resume = self
                    .entries
                    .get(&(seq - 1))
                    .and_then(|previous| previous.start)
                    .unwrap_or(0);
                rollback = Some((seq - 1, resume));
                break;
            }
            if let (Some(start), None) = (entry.start, entry.end) {
                rollback = Some((seq, start));
                break;
            }
        }

        let (next_key, file_length) = rollback?;
        self.entries.split_off(&next_key);
        self.next_key = next_key;
        self.file_length = file_length;
        Some(next_key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.file_length = 0;
        self.next_key = 0;
    }
}
