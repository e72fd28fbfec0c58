use std::fs::{File, OpenOptions};
use crate::core::error::{Error, ErrorKind, Result};
use crate::storage::layout::StorageLayout;

/// One process per index directory
pub struct FileLock {
    pub file: File,
}

impl FileLock {
    pub fn acquire(storage: &StorageLayout) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(storage.lock_path())?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            unsafe {
                if flock(fd, LOCK_EX | LOCK_NB) != 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidState,
                        format!("stub index at {:?} is in use by another process", storage.base_dir),
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
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
