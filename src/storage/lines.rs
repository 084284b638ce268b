use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind};
use std::path::Path;
use crate::core::error::{Error, ErrorKind, Result};

pub const ENCRYPTED_BEGIN: &str = "-----BEGIN PGP MESSAGE";
pub const ENCRYPTED_END: &str = "-----END PGP MESSAGE";

/// Expands an opaque encrypted block into plaintext lines.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, block: &[u8]) -> Result<Vec<String>>;
}

/// Result of reading a line-oriented data file.
#[derive(Debug, Default)]
pub struct LoadedLines {
    pub lines: Vec<String>,
    pub bytes: u64,
}

/// Read every line of `path`, expanding encrypted blocks on the way.
///
/// A missing file reads as empty. Line terminators are stripped. Bytes that are
/// not valid UTF-8 are replaced rather than failing the whole file.
pub fn read_lines(path: &Path, decryptor: Option<&dyn Decryptor>) -> Result<LoadedLines> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(LoadedLines::default()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut loaded = LoadedLines::default();
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw)?;
        if n == 0 {
            break;
        }
        loaded.bytes += n as u64;

        if raw.starts_with(ENCRYPTED_BEGIN.as_bytes()) {
            let mut block = raw.clone();
            loop {
                raw.clear();
                let n = reader.read_until(b'\n', &mut raw)?;
                if n == 0 {
                    break;
                }
                loaded.bytes += n as u64;
                block.extend_from_slice(&raw);
                if raw.starts_with(ENCRYPTED_END.as_bytes()) {
                    break;
                }
            }

            let decryptor = decryptor.ok_or_else(|| {
                Error::new(
                    ErrorKind::AccessDenied,
                    format!("{} contains encrypted data and no decryptor is configured", path.display()),
                )
            })?;
            for line in decryptor.decrypt(&block)? {
                loaded.lines.push(trim_newline(&line).to_string());
            }
            continue;
        }

        let line = String::from_utf8_lossy(&raw);
        loaded.lines.push(trim_newline(&line).to_string());
    }

    Ok(loaded)
}

fn trim_newline(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Rot13;

    impl Decryptor for Rot13 {
        fn decrypt(&self, block: &[u8]) -> Result<Vec<String>> {
            let text = String::from_utf8_lossy(block);
            Ok(text
                .lines()
                .filter(|l| !l.starts_with("-----"))
                .map(|l| {
                    l.chars()
                        .map(|c| match c {
                            'a'..='m' => ((c as u8) + 13) as char,
                            'n'..='z' => ((c as u8) - 13) as char,
                            _ => c,
                        })
                        .collect()
                })
                .collect())
        }
    }

    #[test]
    fn encrypted_block_goes_through_decryptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(
            &path,
            "-----BEGIN PGP MESSAGE-----\nuryyb\n-----END PGP MESSAGE-----\nplain\n",
        )
        .unwrap();

        let loaded = read_lines(&path, Some(&Rot13)).unwrap();
        assert_eq!(loaded.lines, vec!["hello".to_string(), "plain".to_string()]);

        let err = read_lines(&path, None).unwrap_err();
        assert!(err.is(ErrorKind::AccessDenied));
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = read_lines(&dir.path().join("nope"), None).unwrap();
        assert!(loaded.lines.is_empty());
        assert_eq!(loaded.bytes, 0);
    }
}
