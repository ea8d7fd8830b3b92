//! Exclusive lock on a database directory.
//!
//! Only one process may have a database open. The lock is taken without
//! blocking and released when the [`FileLock`] is dropped. The holder's pid
//! is written into the lock file to help diagnose a stuck lock.

use std::fs::{File, OpenOptions};
use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};
use std::path::{Path, PathBuf};

/// Name of the lock file inside the database directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Exclusive directory lock, held for the lifetime of this value.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try to lock `dir`.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another process holds the lock; the
    ///   message names the holder's pid when the lock file records one
    /// - any I/O error from creating the lock file
    pub fn acquire(dir: &Path) -> IoResult<Self> {
        let lock_path = dir.join(LOCK_FILE_NAME);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if !try_lock(&file)? {
            let holder = holder_pid(&lock_path)
                .map_or_else(|| "another process".to_string(), |pid| format!("pid {pid}"));
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("database at {} is locked by {holder}", dir.display()),
            ));
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_data()?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Pid recorded by the current holder, if it can be read.
fn holder_pid(lock_path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(lock_path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Take the lock without waiting. `Ok(false)` means someone else holds it.
#[cfg(unix)]
fn try_lock(file: &File) -> IoResult<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` for the duration of the call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(windows)]
fn try_lock(file: &File) -> IoResult<bool> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    // Lock a byte far past the pid so other handles can still read it.
    // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data and may be zeroed.
    let result = unsafe {
        let mut overlapped = std::mem::zeroed::<OVERLAPPED>();
        overlapped.Anonymous.Anonymous.OffsetHigh = 1;
        LockFileEx(
            file.as_raw_handle() as HANDLE,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            1,
            0,
            &mut overlapped,
        )
    };
    if result != 0 {
        return Ok(true);
    }
    let err = IoError::last_os_error();
    if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(any(unix, windows)))]
fn try_lock(_file: &File) -> IoResult<bool> {
    Err(IoError::new(
        ErrorKind::Unsupported,
        "file locking not supported on this platform",
    ))
}
