use std::fs::{File, OpenOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::StorageLayout;

/// Single writer guarantee across processes sharing one work directory.
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Take the exclusive lock without waiting; fails if another writer has it.
    pub fn acquire(storage: &StorageLayout) -> Result<Self> {
        let lock_path = storage.lock_path();

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            let operation = LOCK_EX | LOCK_NB;

            // SAFETY: `fd` belongs to `file`, which outlives this call.
            unsafe {
                if flock(fd, operation) != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidState,
                        format!("Another writer holds {}", lock_path.display()),
                    ));
                }
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            // SAFETY: the descriptor is still open; unlocking cannot fail harmfully.
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
