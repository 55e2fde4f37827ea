use std::io;

/// Reasons a lock file path is rejected by [`InstanceLock::new`](crate::InstanceLock::new).
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPathError {
    #[error("lock file path cannot be empty")]
    EmptyPath,
    #[error("filename contains problematic character '{character}': {filename}")]
    ProblematicCharacter { character: char, filename: String },
    #[error("filename contains control characters: {filename}")]
    ControlCharacters { filename: String },
    #[error("filename '{filename}' is reserved on Windows")]
    ReservedName { filename: String },
}

/// Errors that may occur while constructing an [`InstanceLock`](crate::InstanceLock).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum NewError {
    /// The command line of the current process could not be read, so there is
    /// nothing to compare a recorded owner against.
    #[error("unable to determine the identity of process {pid}")]
    IdentityLookup {
        pid: u32,
        #[source]
        source: Option<io::Error>,
    },
    #[error("invalid lock file path: {0}")]
    InvalidPath(#[from] InvalidPathError),
}

impl PartialEq for NewError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                NewError::IdentityLookup { pid: a, source: sa },
                NewError::IdentityLookup { pid: b, source: sb },
            ) => a == b && sa.as_ref().map(io::Error::kind) == sb.as_ref().map(io::Error::kind),
            (NewError::InvalidPath(a), NewError::InvalidPath(b)) => a == b,
            _ => false,
        }
    }
}

/// Errors returned by [`InstanceLock::acquire`](crate::InstanceLock::acquire).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    /// Another live process running the same program holds the lock.
    #[error("another instance is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    /// The lock record could not be written.
    #[error("unable to write lock file: {0}")]
    Io(#[from] io::Error),
}

impl PartialEq for AcquireError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AcquireError::AlreadyRunning { pid: a }, AcquireError::AlreadyRunning { pid: b }) => {
                a == b
            }
            // io::Error has no PartialEq; kind and message are close enough
            (AcquireError::Io(a), AcquireError::Io(b)) => {
                a.kind() == b.kind() && a.to_string() == b.to_string()
            }
            _ => false,
        }
    }
}
