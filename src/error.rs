//! Error taxonomy and the append-only error list threaded through every
//! recursive operation.

use std::io;
use std::path::{Path, PathBuf};

/// Kind of failure recorded against a path. Deliberately small and
/// platform-independent: callers branch on this, not on raw `errno` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrKind {
    Io,
    Permission,
    Exists,
    NotFound,
    NotEmpty,
    CrossDevice,
    IsDir,
    IsFile,
    Cancelled,
    Unknown,
}

impl ErrKind {
    /// Maps a platform `io::Error` to the abstract kind the mv state machine
    /// and callers branch on. Keeps the errno-to-kind lookup in exactly one
    /// place.
    pub fn from_io_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrKind::Permission,
            io::ErrorKind::AlreadyExists => ErrKind::Exists,
            _ => {
                #[cfg(unix)]
                {
                    match err.raw_os_error() {
                        Some(libc::EEXIST) => ErrKind::Exists,
                        Some(libc::ENOTEMPTY) => ErrKind::NotEmpty,
                        Some(libc::EXDEV) => ErrKind::CrossDevice,
                        Some(libc::EISDIR) => ErrKind::IsDir,
                        Some(libc::ENOTDIR) => ErrKind::IsFile,
                        Some(libc::EPERM) | Some(libc::EACCES) => ErrKind::Permission,
                        Some(_) => ErrKind::Io,
                        None => ErrKind::Unknown,
                    }
                }
                #[cfg(not(unix))]
                {
                    ErrKind::Unknown
                }
            }
        }
    }
}

/// A single recorded failure: the path it happened on, its kind, and a
/// human-readable message. The error list owns these strings.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub path: PathBuf,
    pub kind: ErrKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(path: impl Into<PathBuf>, kind: ErrKind, message: impl Into<String>) -> Self {
        Self { path: path.into(), kind, message: message.into() }
    }

    pub fn from_io(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Self { path: path.into(), kind: ErrKind::from_io_error(err), message: err.to_string() }
    }
}

/// Append-only record of failures for one op call. Never reordered or
/// pruned except by the retry-without-duplicate-log rule (§9): a retried
/// primitive's caller is responsible for not re-appending the same failure.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<ErrorRecord>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        log::warn!("fsops error at {}: {:?}: {}", record.path.display(), record.kind, record.message);
        self.0.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[ErrorRecord] {
        &self.0
    }
}

/// Decision returned by the error callback for a failed primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrCbResult {
    Retry,
    Ignore,
    Break,
}

/// Outcome of a primitive or recursive op. `Skipped` means the user declined
/// via confirm or error callback — not itself an error. `Cancelled` means
/// the cancellation hook fired mid-primitive: unlike `Skipped`, a traversal
/// must unwind on it rather than move on to the next entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Succeeded,
    Skipped,
    Failed,
    Cancelled,
}

/// Failure constructing or precondition-checking a call before any
/// traversal begins (bad arguments, not a runtime filesystem failure).
/// Per-item failures during a traversal are recorded in the [`ErrorList`]
/// instead of returned here.
#[derive(Debug, thiserror::Error)]
pub enum FsOpError {
    #[error("destination {dst} is inside source {src}")]
    DestinationInsideSource { src: PathBuf, dst: PathBuf },

    #[error("append-to-files requires both {path} and its counterpart to be regular files")]
    NotARegularFile { path: PathBuf },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FsOpError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

/// `dst` must not be inside `src` — prevents a copy or move from recursing
/// into its own output. Compares canonicalized paths by prefix.
pub fn is_in_subtree(src: &Path, dst: &Path) -> bool {
    let (src_canon, dst_canon) = match (src.canonicalize(), dst.canonicalize()) {
        (Ok(s), Ok(d)) => (s, d),
        // If dst doesn't exist yet, canonicalize its parent instead.
        _ => {
            let src_canon = match src.canonicalize() {
                Ok(p) => p,
                Err(_) => return false,
            };
            let dst_parent = dst.parent().unwrap_or(dst);
            let dst_canon = match dst_parent.canonicalize() {
                Ok(p) => p.join(dst.file_name().unwrap_or_default()),
                Err(_) => return false,
            };
            (src_canon, dst_canon)
        }
    };
    dst_canon.starts_with(&src_canon)
}
