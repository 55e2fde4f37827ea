//! Process-wide registry of lock files to remove at normal process exit.
//!
//! `LockGuard` releases its file on drop, but `std::process::exit` skips
//! destructors. Every acquired lock therefore also leaves an entry here, and a
//! single `atexit` callback removes whatever is still pending when the process
//! terminates. Entries are removed again as soon as the guard releases, so a
//! lock file is never deleted twice by us.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

struct Registry {
    next_id: u64,
    installed: bool,
    pending: Vec<(u64, PathBuf)>,
}

impl Registry {
    const fn new() -> Self {
        Registry {
            next_id: 0,
            installed: false,
            pending: Vec::new(),
        }
    }
}

/// Handle for one pending cleanup. Dropping it does nothing; pass it to
/// [`deregister`] once the lock has been released.
#[derive(Debug)]
pub(crate) struct ExitHook(pub(crate) u64);

fn registry() -> MutexGuard<'static, Registry> {
    // Entries are plain data, a panic elsewhere cannot leave them half-written.
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Schedule `path` for removal at process exit.
pub(crate) fn register(path: &Path) -> ExitHook {
    let mut registry = registry();

    if !registry.installed {
        // SAFETY: run_pending takes no arguments and never unwinds.
        if unsafe { libc::atexit(run_pending) } == 0 {
            registry.installed = true;
        } else {
            warn!("Unable to install exit handler; lock files rely on guard drop only");
        }
    }

    let id = registry.next_id;
    registry.next_id += 1;
    registry.pending.push((id, path.to_path_buf()));
    ExitHook(id)
}

/// Forget a pending cleanup. Unknown or already-run hooks are ignored.
pub(crate) fn deregister(hook: ExitHook) {
    registry().pending.retain(|(id, _)| *id != hook.0);
}

/// Forget every pending cleanup for `path`.
pub(crate) fn deregister_path(path: &Path) {
    registry().pending.retain(|(_, pending)| pending != path);
}

/// Run a single pending cleanup now, as the exit handler would.
#[cfg(test)]
pub(crate) fn fire(hook: &ExitHook) {
    let path = {
        let mut registry = registry();
        let index = registry.pending.iter().position(|(id, _)| *id == hook.0);
        index.map(|index| registry.pending.remove(index).1)
    };
    if let Some(path) = path {
        crate::remove_lock_file(&path);
    }
}

#[cfg(test)]
pub(crate) fn is_pending(hook: &ExitHook) -> bool {
    registry().pending.iter().any(|(id, _)| *id == hook.0)
}

extern "C" fn run_pending() {
    // Another thread may still hold the lock while the process exits.
    let pending = match REGISTRY.try_lock() {
        Ok(mut registry) => std::mem::take(&mut registry.pending),
        Err(std::sync::TryLockError::Poisoned(poisoned)) => {
            std::mem::take(&mut poisoned.into_inner().pending)
        }
        Err(std::sync::TryLockError::WouldBlock) => return,
    };

    for (_, path) in pending {
        crate::remove_lock_file(&path);
    }
}
