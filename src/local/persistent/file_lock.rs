//! Exclusive lock on a local storage directory.
//!
//! Only one process may own a key-value directory at a time. The lock is a
//! non-blocking OS advisory lock on `.care-relay.lock` and is released when
//! the [`DirLock`] is dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::local::LocalStoreError;

const LOCK_FILE: &str = ".care-relay.lock";

/// Held exclusive lock on a storage directory.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Try to lock `dir` without waiting.
    ///
    /// # Errors
    /// - `Locked` if another process holds the directory
    /// - `Io` if the lock file cannot be opened
    pub fn acquire(dir: &Path) -> Result<Self, LocalStoreError> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| LocalStoreError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        match try_lock(&file) {
            Ok(()) => Ok(Self { _file: file, path }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(LocalStoreError::Locked {
                path: path.display().to_string(),
            }),
            Err(e) => Err(LocalStoreError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and open for the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "directory is locked"));
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(windows)]
fn try_lock(file: &File) -> io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::HANDLE;
    use windows_sys::Win32::Storage::FileSystem::{LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};
    use windows_sys::Win32::System::IO::OVERLAPPED;

    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        LockFileEx(
            handle,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if result == 0 {
        let err = io::Error::last_os_error();
        return Err(io::Error::new(io::ErrorKind::WouldBlock, format!("directory is locked: {err}")));
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn try_lock(_file: &File) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "file locking not supported on this platform",
    ))
}
