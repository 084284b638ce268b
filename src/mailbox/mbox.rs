use std::fs::{self, File};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::progress::ProgressSink;
use crate::core::utils::{b36, parse_b36};
use crate::mailbox::toc::Toc;
use crate::mailbox::Mailbox;

const FROM_LINE: &[u8] = b"From ";

/// What gets persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MboxState {
    pub path: PathBuf,
    pub toc: Toc,
    pub last_parsed: Option<usize>,
}

/// A Unix mbox file read incrementally through a persisted TOC.
pub struct MboxMailbox {
    id: String,
    path: PathBuf,
    state_path: PathBuf,
    state: MboxState,
    file: File,
}

impl MboxMailbox {
    /// Open `path`, restoring saved state from `state_path` when it is valid
    /// and still describes this file, then index any appended messages.
    pub fn open(
        id: &str,
        path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        progress: &dyn ProgressSink,
    ) -> Result<Self> {
        let path = path.into();
        let state_path = state_path.into();
        let file = File::open(&path).map_err(|e| {
            Error::new(ErrorKind::NotFound, format!("No such mailbox {}: {}", path.display(), e))
        })?;

        let state = match load_state(&state_path) {
            Ok(Some(state)) if state.path == path => state,
            Ok(Some(_)) => {
                debug!("State in {} is for another file", state_path.display());
                MboxState { path: path.clone(), ..MboxState::default() }
            }
            Ok(None) => MboxState { path: path.clone(), ..MboxState::default() },
            Err(e) => {
                progress.warning(&format!("Discarding mailbox state {}: {}", state_path.display(), e));
                MboxState { path: path.clone(), ..MboxState::default() }
            }
        };

        let mut mailbox = MboxMailbox {
            id: id.to_string(),
            path,
            state_path,
            state,
            file,
        };
        mailbox.update_toc(progress)?;
        Ok(mailbox)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &MboxState {
        &self.state
    }

    /// Read any messages appended since the TOC was last updated. A file
    /// that no longer matches the TOC is re-read from scratch.
    pub fn update_toc(&mut self, progress: &dyn ProgressSink) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        if self.state.toc.file_length == file_len && file_len > 0 {
            return Ok(());
        }

        if !self.toc_matches_file(file_len)? {
            progress.warning(&format!("{}: Mailbox has been modified, rescanning", self.path.display()));
            self.state.toc.clear();
            self.state.last_parsed = None;
        }

        let before = self.state.toc.len();
        self.scan_from(self.state.toc.file_length)?;
        debug!(
            "{}: {} new messages in TOC",
            self.path.display(),
            self.state.toc.len() - before
        );
        Ok(())
    }

    fn toc_matches_file(&self, file_len: u64) -> Result<bool> {
        if file_len < self.state.toc.file_length {
            return Ok(false);
        }
        let Some(start) = self.state.toc.last_start() else {
            return Ok(self.state.toc.file_length == 0 || self.state.toc.is_empty());
        };
        let mut head = [0u8; 5];
        match self.file.read_exact_at(&mut head, start) {
            Ok(()) => Ok(head == FROM_LINE),
            Err(_) => Ok(false),
        }
    }

    /// Find `From ` separator lines from `offset` to the end of the file.
    fn scan_from(&mut self, offset: u64) -> Result<()> {
        let mut reader = BufReader::new(&self.file);
        reader.seek(SeekFrom::Start(offset))?;

        let mut pos = offset;
        let mut start: Option<u64> = None;
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line)?;
            if n == 0 {
                break;
            }
            if line.starts_with(FROM_LINE) {
                if let Some(begin) = start {
                    // The newline before a separator belongs to neither message.
                    self.state.toc.push(begin, pos.saturating_sub(1).max(begin));
                }
                start = Some(pos);
            }
            pos += n as u64;
        }

        if let Some(begin) = start {
            self.state.toc.push(begin, pos);
        }
        self.state.toc.file_length = pos;
        Ok(())
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (end - start) as usize];
        self.file.read_exact_at(&mut buf, start)?;
        Ok(strip_from_line(buf))
    }

    /// Raw bytes of the message a pointer names.
    pub fn read_pointer(&self, pointer: &str) -> Result<Vec<u8>> {
        let (mailbox, start, length) = parse_pointer(pointer)?;
        if mailbox != self.id {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Pointer {} is not in mailbox {}", pointer, self.id),
            ));
        }
        self.read_range(start, start + length)
    }
}

impl Mailbox for MboxMailbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn count(&self) -> usize {
        self.state.toc.len()
    }

    fn get(&self, seq: usize) -> Result<Vec<u8>> {
        let (start, end) = self
            .state
            .toc
            .get(seq)
            .ok_or_else(|| Error::out_of_range(seq as u64, self.count()))?;
        self.read_range(start, end)
    }

    fn pointer(&self, seq: usize) -> Result<String> {
        let (start, end) = self
            .state
            .toc
            .get(seq)
            .ok_or_else(|| Error::out_of_range(seq as u64, self.count()))?;
        Ok(format!("{}{}:{}", self.id, b36(start), b36(end - start)))
    }

    fn last_parsed(&self) -> Option<usize> {
        self.state.last_parsed
    }

    fn set_last_parsed(&mut self, seq: Option<usize>) {
        self.state.last_parsed = seq;
    }

    fn repair(&mut self, progress: &dyn ProgressSink) -> Result<bool> {
        let Some(next_key) = self.state.toc.repair() else {
            return Ok(false);
        };
        progress.warning(&format!(
            "{}: Incomplete table of contents, resuming at message {}",
            self.id, next_key
        ));
        self.state.last_parsed = match (self.state.last_parsed, next_key.checked_sub(1)) {
            (Some(last), Some(limit)) => Some(last.min(limit)),
            _ => None,
        };
        self.update_toc(progress)?;
        Ok(true)
    }

    /// Persist the TOC and watermark. The file carries a CRC32 of the
    /// encoded state so a torn write is noticed on the next open.
    fn save(&self) -> Result<()> {
        if self.state.toc.is_empty() {
            return Ok(());
        }
        let payload = bincode::serialize(&self.state)?;
        let checksum = crc32fast::hash(&payload);

        let dir = self
            .state_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(&dir)?;
        tmp.write_all(&checksum.to_le_bytes())?;
        tmp.write_all(&payload)?;
        tmp.flush()?;
        tmp.persist(&self.state_path)?;
        info!("Saved state for mailbox {} to {}", self.id, self.state_path.display());
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<Option<MboxState>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    if data.len() < 4 {
        return Err(Error::new(ErrorKind::Parse, "Truncated mailbox state".to_string()));
    }
    let (head, payload) = data.split_at(4);
    let expected = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if crc32fast::hash(payload) != expected {
        return Err(Error::new(ErrorKind::Parse, "Mailbox state checksum mismatch".to_string()));
    }
    Ok(Some(bincode::deserialize(payload)?))
}

/// Read the message `pointer` names straight from an mbox file, without
/// consulting its table of contents.
pub fn read_pointer_in(path: &Path, pointer: &str) -> Result<Vec<u8>> {
    let (_, start, length) = parse_pointer(pointer)?;
    let file = File::open(path)?;
    let mut buf = vec![0u8; length as usize];
    file.read_exact_at(&mut buf, start)?;
    Ok(strip_from_line(buf))
}

/// Split `<3-char mailbox id><b36 start>:<b36 length>`.
pub fn parse_pointer(pointer: &str) -> Result<(&str, u64, u64)> {
    let bad = || Error::new(ErrorKind::Parse, format!("Bad message pointer: {}", pointer));
    let mailbox = pointer.get(..3).ok_or_else(bad)?;
    let (start, length) = pointer[3..].split_once(':').ok_or_else(bad)?;
    Ok((mailbox, parse_b36(start)?, parse_b36(length)?))
}

fn strip_from_line(mut message: Vec<u8>) -> Vec<u8> {
    if message.starts_with(FROM_LINE) {
        let cut = message
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(message.len());
        message.drain(..cut);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::RecordingProgress;

    const TWO: &str = "From a@example.org Mon Jan  1 00:00:00 2024\n\
Subject: one\n\nbody one\n\n\
From b@example.org Mon Jan  1 00:00:01 2024\n\
Subject: two\n\nbody two\n";

    #[test]
    fn finds_messages_and_reads_them_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        fs::write(&path, TWO).unwrap();
        let progress = RecordingProgress::new();

        let mailbox = MboxMailbox::open("00A", &path, dir.path().join("00A.toc"), &progress).unwrap();
        assert_eq!(mailbox.count(), 2);
        let first = mailbox.get(0).unwrap();
        assert!(first.starts_with(b"Subject: one"));
        assert!(!first.windows(5).any(|w| w == FROM_LINE));

        let pointer = mailbox.pointer(1).unwrap();
        assert!(pointer.starts_with("00A"));
        assert_eq!(mailbox.read_pointer(&pointer).unwrap(), mailbox.get(1).unwrap());
    }

    #[test]
    fn appended_messages_extend_saved_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        let state = dir.path().join("00A.toc");
        fs::write(&path, TWO).unwrap();
        let progress = RecordingProgress::new();

        let mut mailbox = MboxMailbox::open("00A", &path, &state, &progress).unwrap();
        mailbox.set_last_parsed(Some(1));
        mailbox.save().unwrap();

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"\nFrom c@example.org Mon Jan  1 00:00:02 2024\nSubject: three\n\nbody three\n").unwrap();
        drop(file);

        let mailbox = MboxMailbox::open("00A", &path, &state, &progress).unwrap();
        assert_eq!(mailbox.count(), 3);
        assert_eq!(mailbox.last_parsed(), Some(1));
        assert!(mailbox.get(2).unwrap().starts_with(b"Subject: three"));
        assert!(progress.warnings().is_empty());
    }

    #[test]
    fn corrupt_state_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inbox");
        let state = dir.path().join("00A.toc");
        fs::write(&path, TWO).unwrap();
        fs::write(&state, b"garbage state").unwrap();
        let progress = RecordingProgress::new();

        let mailbox = MboxMailbox::open("00A", &path, &state, &progress).unwrap();
        assert_eq!(mailbox.count(), 2);
        assert_eq!(mailbox.last_parsed(), None);
        assert_eq!(progress.warnings().len(), 1);
    }

    #[test]
    fn pointers_parse() {
        assert_eq!(parse_pointer("001A:1F").unwrap(), ("001", 10, 51));
        assert!(parse_pointer("00").is_err());
        assert!(parse_pointer("001A").is_err());
    }
}
