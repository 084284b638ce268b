use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use log::debug;
use lru::LruCache;
use crate::core::error::{Error, ErrorKind, Result};

/// Bounded cache of append handles, most recently used last.
///
/// Indexing appends to a handful of shard files much more often than to the
/// rest, so keeping their handles open saves an open/close per posting. Any
/// path must be flushed (for reads) or closed (for rename/delete/rewrite)
/// through the pool first, otherwise readers can see truncated data.
pub struct HandlePool {
    handles: LruCache<PathBuf, BufWriter<File>>,
    capacity: usize,
}

impl HandlePool {
    /// Fraction of the pool dropped when the process runs out of descriptors.
    pub const EVICT_RATIO: f64 = 0.3;

    pub fn new(capacity: usize) -> Self {
        HandlePool {
            handles: LruCache::unbounded(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.handles.contains(path)
    }

    pub fn append(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        let handle = self.handle(path)?;
        handle.write_all(data)?;
        Ok(())
    }

    /// Append and make sure the bytes reached the file before returning.
    pub fn append_durable(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        let handle = self.handle(path)?;
        handle.write_all(data)?;
        handle.flush()?;
        Ok(())
    }

    fn handle(&mut self, path: &Path) -> Result<&mut BufWriter<File>> {
        if !self.handles.contains(path) {
            if self.handles.len() >= self.capacity {
                self.evict(1)?;
            }

            let file = match open_append(path) {
                Ok(file) => file,
                Err(first) => {
                    // Too many open files? Close a bunch and try again, once.
                    debug!("Append open of {} failed ({}), evicting handles", path.display(), first);
                    self.evict_ratio(Self::EVICT_RATIO)?;
                    open_append(path).map_err(|e| {
                        Error::new(
                            ErrorKind::Io,
                            format!("Cannot open {} for append: {}", path.display(), e),
                        )
                    })?
                }
            };
            self.handles.put(path.to_path_buf(), BufWriter::new(file));
        }

        self.handles.get_mut(path).ok_or_else(|| {
            Error::new(ErrorKind::Internal, format!("Lost handle for {}", path.display()))
        })
    }

    /// Flush pending bytes for `path`, keeping the handle cached.
    pub fn flush_path(&mut self, path: &Path) -> Result<()> {
        if let Some(handle) = self.handles.peek_mut(path) {
            handle.flush()?;
        }
        Ok(())
    }

    /// Flush and drop the handle for `path`.
    pub fn close_path(&mut self, path: &Path) -> Result<()> {
        if let Some(mut handle) = self.handles.pop(path) {
            handle.flush()?;
        }
        Ok(())
    }

    /// Close the `count` least recently used handles.
    pub fn evict(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            match self.handles.pop_lru() {
                Some((_, mut handle)) => handle.flush()?,
                None => break,
            }
        }
        Ok(())
    }

    pub fn evict_ratio(&mut self, ratio: f64) -> Result<()> {
        let count = ((self.handles.len() as f64) * ratio).ceil() as usize;
        self.evict(count.max(1))
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for (_, handle) in self.handles.iter_mut() {
            handle.flush()?;
        }
        Ok(())
    }

    pub fn close_all(&mut self) -> Result<()> {
        let count = self.handles.len();
        self.evict(count)
    }
}

impl Drop for HandlePool {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            log::warn!("Failed to flush append handles: {}", e);
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn bounded_pool_flushes_evicted_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = HandlePool::new(2);
        for name in ["a", "b", "c"] {
            pool.append(&dir.path().join(name), name.as_bytes()).unwrap();
        }
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&dir.path().join("a")));
        // Evicted handle was flushed on the way out.
        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "a");

        pool.close_path(&dir.path().join("c")).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("c")).unwrap(), "c");
        assert_eq!(pool.len(), 1);
    }
}
