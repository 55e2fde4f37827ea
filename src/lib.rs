//! A single-instance lock for long-running processes.
//!
//! The lock is a pidfile: a plain text file holding the decimal PID of the
//! process that owns it. Before claiming the file, [`InstanceLock`] checks the
//! recorded PID. The lock is considered held only when that PID is alive *and*
//! runs the same program as the caller (same first command line token).
//! Missing, corrupt, stale and foreign records are all reclaimable.
//!
//! ```no_run
//! use pidguard::{AcquireError, InstanceLock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lock = InstanceLock::new("/run/lock/myapp.pid")?;
//!     let _guard = match lock.acquire() {
//!         Ok(guard) => guard,
//!         Err(AcquireError::AlreadyRunning { pid }) => {
//!             eprintln!("already running as pid {pid}");
//!             std::process::exit(1);
//!         }
//!         Err(err) => return Err(err.into()),
//!     };
//!     // long-running work; the pidfile is removed when `_guard` drops
//!     Ok(())
//! }
//! ```
//!
//! This is not an atomic lock. Two processes that evaluate the same file at
//! the same moment can both succeed; it guards against accidental double
//! launches, not adversarial contention.
#![cfg_attr(feature = "strict", deny(warnings))]

macro_rules! debug {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        log::debug!($($arg)+);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($arg)+);
    }};
}

macro_rules! warn {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        log::warn!($($arg)+);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($arg)+);
    }};
}

macro_rules! trace {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        log::trace!($($arg)+);
        #[cfg(not(feature = "log"))]
        let _ = format_args!($($arg)+);
    }};
}

mod error;
mod exit_hook;
pub mod process;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub use error::{AcquireError, InvalidPathError, NewError};

use exit_hook::ExitHook;

/// Lock file name used by [`InstanceLock::with_default_path`], relative to the
/// working directory.
pub const DEFAULT_LOCK_FILE: &str = "pidfile";

/// Validates that a path is suitable for use as a lock file.
///
/// Any non-empty path is accepted on Unix. Windows additionally rejects
/// filenames the filesystem cannot hold.
fn validate_lock_path(path: &Path) -> Result<(), InvalidPathError> {
    if path.as_os_str().is_empty() {
        return Err(InvalidPathError::EmptyPath);
    }

    if path.is_relative() {
        warn!(
            "Using relative path for lock file: {:?}. It resolves against the working directory.",
            path
        );
    }

    #[cfg(windows)]
    if let Some(filename) = path.file_name() {
        validate_windows_filename(&filename.to_string_lossy())?;
    }

    Ok(())
}

#[cfg(windows)]
fn validate_windows_filename(filename: &str) -> Result<(), InvalidPathError> {
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let base_name = filename
        .split('.')
        .next()
        .unwrap_or(filename)
        .to_uppercase();
    if reserved_names.contains(&base_name.as_str()) {
        return Err(InvalidPathError::ReservedName {
            filename: filename.to_string(),
        });
    }

    for character in ['<', '>', ':', '"', '|', '?', '*'] {
        if filename.contains(character) {
            return Err(InvalidPathError::ProblematicCharacter {
                character,
                filename: filename.to_string(),
            });
        }
    }

    if filename.chars().any(char::is_control) {
        return Err(InvalidPathError::ControlCharacters {
            filename: filename.to_string(),
        });
    }

    Ok(())
}

/// Delete a lock file if it is there.
///
/// Failures are deliberately ignored: the file may already have been removed
/// by hand, by the exit handler, or by an explicit release. Releasing must
/// never fail or panic, including while unwinding.
pub(crate) fn remove_lock_file(path: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// A single-instance lock bound to one pidfile path.
///
/// Constructing the lock does not touch the file; it records the path along
/// with the PID and program identity of the current process.
#[derive(Debug)]
pub struct InstanceLock {
    #[doc = "The current process id"]
    pid: u32,
    #[doc = "First command line token of the current process"]
    identity: String,
    #[doc = "A path to the lock file"]
    path: PathBuf,
}

impl InstanceLock {
    /// Create a lock for the pidfile at `path`.
    ///
    /// # Errors
    ///
    /// * [`NewError::InvalidPath`] if the path is empty or has a filename that
    ///   is not portable.
    /// * [`NewError::IdentityLookup`] if the command line of the current
    ///   process cannot be read.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, NewError> {
        let path = path.as_ref();
        validate_lock_path(path)?;

        let pid = std::process::id();
        let identity = match process::probe_identity(pid) {
            Ok(identity) if !identity.is_empty() => identity,
            Ok(_) => return Err(NewError::IdentityLookup { pid, source: None }),
            Err(err) => {
                return Err(NewError::IdentityLookup {
                    pid,
                    source: Some(err),
                });
            }
        };

        Ok(InstanceLock {
            pid,
            identity,
            path: path.into(),
        })
    }

    /// Create a lock for [`DEFAULT_LOCK_FILE`] in the working directory.
    pub fn with_default_path() -> Result<Self, NewError> {
        Self::new(DEFAULT_LOCK_FILE)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID written to the lock file on acquire.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Program identity compared against the recorded owner.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns true when a live process running this same program holds the
    /// lock file.
    ///
    /// Never fails: an unreadable or corrupt record, a dead owner, or an owner
    /// running a different program all read as "not running".
    pub fn is_running(&self) -> bool {
        self.owner().is_some()
    }

    /// Returns the PID of the live, same-program process recorded in the lock
    /// file, if there is one. This process counts when its own PID is recorded.
    pub fn owner(&self) -> Option<u32> {
        let pid = self.read_record()?;

        if !process::is_alive(pid) {
            warn!(
                "Stale lock file at {}: pid {} is no longer running",
                self.path.display(),
                pid
            );
            return None;
        }

        let owner_identity = process::identity(pid);
        if owner_identity != self.identity {
            // Most likely the PID was recycled by an unrelated program.
            warn!(
                "Lock file at {} names pid {} running {:?}, not {:?}; treating it as unlocked",
                self.path.display(),
                pid,
                owner_identity,
                self.identity
            );
            return None;
        }

        debug!("Lock file at {} is held by pid {}", self.path.display(), pid);
        Some(pid)
    }

    /// Read the PID recorded in the lock file, if the file holds one.
    fn read_record(&self) -> Option<u32> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(_err) => {
                warn!(
                    "Unable to read lock file at {}: {}",
                    self.path.display(),
                    _err
                );
                return None;
            }
        };

        match contents.trim().parse::<u32>() {
            Ok(pid) => Some(pid),
            Err(_) => {
                warn!("Ignoring corrupted lock file at {}", self.path.display());
                None
            }
        }
    }

    /// Acquire the lock and return a guard that releases it on drop.
    ///
    /// Any stale, foreign or corrupt record is overwritten with this process's
    /// PID. Besides the guard, the lock file is registered for removal at
    /// normal process exit, which covers `std::process::exit` skipping
    /// destructors.
    ///
    /// # Errors
    ///
    /// * [`AcquireError::AlreadyRunning`] if [`is_running`](Self::is_running)
    ///   would return true.
    /// * [`AcquireError::Io`] if the lock file cannot be written.
    pub fn acquire(&self) -> Result<LockGuard, AcquireError> {
        if let Some(pid) = self.owner() {
            return Err(AcquireError::AlreadyRunning { pid });
        }

        self.write_record()?;
        let hook = exit_hook::register(&self.path);
        debug!("Acquired lock file at {} as pid {}", self.path.display(), self.pid);

        Ok(LockGuard {
            path: self.path.clone(),
            hook: Some(hook),
        })
    }

    fn write_record(&self) -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        // Only applies when the file is created, not when reclaiming one.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&self.path)?;
        file.write_all(self.pid.to_string().as_bytes())?;
        file.flush()
    }

    /// Delete the lock file if it exists.
    ///
    /// Deletion failures are swallowed on purpose, and calling this any number
    /// of times is safe. Note that this removes the file whoever wrote it;
    /// prefer dropping the [`LockGuard`] returned by [`acquire`](Self::acquire).
    /// Exit cleanups pending for this path are dropped as well.
    pub fn release(&self) {
        remove_lock_file(&self.path);
        exit_hook::deregister_path(&self.path);
        debug!("Released lock file at {}", self.path.display());
    }

    /// Run `f` while holding the lock, releasing it afterwards even if `f`
    /// panics.
    pub fn run_exclusive<T>(&self, f: impl FnOnce() -> T) -> Result<T, AcquireError> {
        let guard = self.acquire()?;
        let output = f();
        guard.release();
        Ok(output)
    }
}

/// Proof that the lock is held. The lock file is removed exactly once, when
/// the guard is released or dropped, whichever comes first.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    path: PathBuf,
    #[doc = "Pending exit cleanup; `None` once released"]
    hook: Option<ExitHook>,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now instead of at the end of the scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(hook) = self.hook.take() {
            remove_lock_file(&self.path);
            exit_hook::deregister(hook);
            debug!("Released lock file at {}", self.path.display());
        }
    }
}

impl Drop for LockGuard {
    /// Releases the lock on scope exit, early return and panic unwinding alike.
    fn drop(&mut self) {
        self.release_once();
    }
}
