//! Cooperative cancellation: a thread-safe boolean source polled before
//! every visitor call, before every primitive, and periodically inside
//! large file copies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Interval at which `run_cancellable` polls for completion while watching
/// for cancellation.
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Thread-safe boolean source, queried as `(hook, opaque) -> bool`. Cheap
/// to clone; every clone shares the same underlying source.
#[derive(Clone)]
pub struct CancellationToken(Arc<dyn Fn() -> bool + Send + Sync>);

impl CancellationToken {
    /// A token that never reports cancelled — the default for calls that
    /// don't wire up cancellation.
    pub fn never() -> Self {
        Self(Arc::new(|| false))
    }

    /// Builds a token backed by a shared `AtomicBool`, the shape most
    /// callers reach for (a UI thread flips the flag, the engine thread
    /// polls it).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(Arc::new(move || flag.load(Ordering::Relaxed)))
    }

    pub fn from_fn<F: Fn() -> bool + Send + Sync + 'static>(hook: F) -> Self {
        Self(Arc::new(hook))
    }

    pub fn is_cancelled(&self) -> bool {
        (self.0)()
    }
}

/// Runs `work` on a background thread while polling `cancelled` so the
/// caller's thread stays responsive; returns `None` if cancellation was
/// observed before `work` finished. The spawned thread is not forcibly
/// killed — `work` is expected to poll its own cancellation source (the
/// token derived from the same flag) and return promptly.
///
/// A generic mpsc-based polling wrapper used to keep blocking syscalls
/// (statvfs, network I/O) from freezing the host's event loop.
pub fn run_cancellable<T, F>(cancelled: &Arc<AtomicBool>, work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = work();
        let _ = tx.send(result);
    });

    loop {
        match rx.recv_timeout(CANCELLATION_POLL_INTERVAL) {
            Ok(result) => return Some(result),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancelled.load(Ordering::Relaxed) {
                    return None;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return None,
        }
    }
}
