//! Advisory lock over the data directory.
//!
//! Only one process may own the persistent index at a time: the daemon for
//! its whole lifetime, a CLI command for its duration. Session-scoped
//! ranking never touches `vectors.bin` and runs unlocked.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

const LOCK_FILE_NAME: &str = "rrank.lock";

/// Exclusive hold on the data directory, released on drop.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Take the lock without waiting. Fails with `WouldBlock` if another
    /// daemon or CLI process holds it.
    pub fn try_acquire(base_path: &Path) -> io::Result<Self> {
        let path = base_path.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        flock_nonblocking(&file).map_err(|e| {
            if is_contended(&e) {
                io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("{} is held by another rrank process", path.display()),
                )
            } else {
                e
            }
        })?;

        log::debug!("Acquired {}", path.display());
        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn flock_nonblocking(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // the lock is dropped by the kernel when the descriptor closes
    match unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } {
        0 => Ok(()),
        _ => Err(io::Error::last_os_error()),
    }
}

#[cfg(not(unix))]
fn flock_nonblocking(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || matches!(err.raw_os_error(), Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN)
}

#[cfg(not(unix))]
fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();

        let held = FileLock::try_acquire(dir.path()).unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());

        let err = FileLock::try_acquire(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        drop(held);
        assert!(FileLock::try_acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_missing_directory() {
        let result = FileLock::try_acquire(Path::new("/nonexistent/rrank/dir"));
        assert!(result.is_err());
    }
}
