//! Progress accounting and notification: totals and current position for
//! items and bytes, plus the silencing and snapshot/restore machinery used
//! to hide a move's internal remove phase from the visible progress.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use crate::cancellation::CancellationToken;

/// Stage stamped on every notifier invocation: `Estimating` while
/// `calculate` walks a tree to size it up, `InProgress` while primitives
/// are actually moving bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Estimating,
    InProgress,
}

/// Callback invoked on every non-silenced estimator update.
pub type Notifier = Arc<dyn Fn(Stage, &ProgressEstimator) + Send + Sync>;

/// Mutable accounting object recording total and processed items/bytes,
/// current source and destination paths, and a silence flag.
///
/// Invariants (enforced by `update`/`calculate`): `current_item <=
/// total_items` and `current_byte <= total_bytes` after every update — the
/// engine bumps totals via re-estimation rather than let these invert.
pub struct ProgressEstimator {
    pub total_items: u64,
    pub current_item: u64,
    pub total_bytes: u64,
    pub current_byte: u64,
    pub total_file_bytes: u64,
    pub current_file_byte: u64,
    pub inspected_items: u64,
    pub item: Option<PathBuf>,
    pub target: Option<PathBuf>,
    silent: bool,
    pub cancellation: CancellationToken,
    notifier: Option<Notifier>,
}

/// Deep-copied snapshot for `save`/`restore` — rolling back counters after
/// a nested op fails.
pub struct EstimatorSnapshot {
    total_items: u64,
    current_item: u64,
    total_bytes: u64,
    current_byte: u64,
    total_file_bytes: u64,
    current_file_byte: u64,
    inspected_items: u64,
    item: Option<PathBuf>,
    target: Option<PathBuf>,
}

impl ProgressEstimator {
    /// `ioeta_alloc` — allocates an estimator bound to a cancellation
    /// source. There is no `ioeta_free`: the estimator is freed by ordinary
    /// `Drop` when it goes out of scope.
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            total_items: 0,
            current_item: 0,
            total_bytes: 0,
            current_byte: 0,
            total_file_bytes: 0,
            current_file_byte: 0,
            inspected_items: 0,
            item: None,
            target: None,
            silent: false,
            cancellation,
            notifier: None,
        }
    }

    /// Sets an explicit per-call notifier handle — the form most call sites
    /// use.
    pub fn set_notifier(&mut self, notifier: Notifier) {
        self.notifier = Some(notifier);
    }

    /// `ioeta_calculate(estim, path, shallow)`. `shallow=true` adds `path`
    /// as a single zero-byte item. `shallow=false` walks `path` and sums
    /// item counts and file sizes.
    ///
    /// Directories count as one item and zero bytes, same as symbolic
    /// links, so nested directories contribute to `total_items` even though
    /// they carry no bytes of their own.
    pub fn calculate(&mut self, path: &Path, shallow: bool) -> std::io::Result<()> {
        self.notify(Stage::Estimating);
        if shallow {
            self.total_items += 1;
            return Ok(());
        }

        let metadata = std::fs::symlink_metadata(path)?;
        if metadata.is_symlink() || !metadata.is_dir() {
            self.total_items += 1;
            if metadata.is_file() {
                self.total_bytes += metadata.len();
            }
            return Ok(());
        }

        self.total_items += 1; // the directory itself
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            self.calculate(&entry.path(), false)?;
        }
        Ok(())
    }

    /// `ioeta_update(estim, path, target, finished, bytes)`. Silent updates
    /// short-circuit entirely: no notifier call, no counter movement.
    pub fn update(&mut self, path: &Path, target: Option<&Path>, finished: bool, bytes: u64) {
        if self.silent {
            return;
        }

        self.current_byte += bytes;
        self.current_file_byte += bytes;
        self.item = Some(path.to_path_buf());
        self.target = target.map(|t| t.to_path_buf());

        if self.total_bytes < self.current_byte {
            self.total_bytes = self.current_byte;
        }

        if finished {
            self.current_item += 1;
            self.current_file_byte = 0;
            if self.total_items < self.current_item {
                self.total_items = self.current_item;
            }

            if self.inspected_items < self.current_item + 1 {
                self.inspected_items = self.current_item + 1;
                if let Ok(metadata) = std::fs::symlink_metadata(path) {
                    if metadata.is_file() {
                        self.total_file_bytes = metadata.len();
                    }
                }
            }
        }

        self.notify(Stage::InProgress);
    }

    /// `ioeta_silent_on` — returns the previous silent state and sets
    /// silent. Used to hide the remove phase of a cross-device move.
    pub fn silent_on(&mut self) -> bool {
        let previous = self.silent;
        self.silent = true;
        previous
    }

    /// `ioeta_silent_set` — restores a previously captured silent state.
    pub fn silent_set(&mut self, value: bool) {
        self.silent = value;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// `ioeta_save` — deep-copies the path strings so a caller can roll
    /// back counters after a nested operation fails.
    pub fn save(&self) -> EstimatorSnapshot {
        EstimatorSnapshot {
            total_items: self.total_items,
            current_item: self.current_item,
            total_bytes: self.total_bytes,
            current_byte: self.current_byte,
            total_file_bytes: self.total_file_bytes,
            current_file_byte: self.current_file_byte,
            inspected_items: self.inspected_items,
            item: self.item.clone(),
            target: self.target.clone(),
        }
    }

    /// `ioeta_restore` — a no-op while the estimator is currently silent:
    /// a snapshot taken before entering a silenced phase must not
    /// un-silence it on restore.
    pub fn restore(&mut self, snapshot: EstimatorSnapshot) {
        if self.silent {
            return;
        }
        self.total_items = snapshot.total_items;
        self.current_item = snapshot.current_item;
        self.total_bytes = snapshot.total_bytes;
        self.current_byte = snapshot.current_byte;
        self.total_file_bytes = snapshot.total_file_bytes;
        self.current_file_byte = snapshot.current_file_byte;
        self.inspected_items = snapshot.inspected_items;
        self.item = snapshot.item;
        self.target = snapshot.target;
    }

    fn notify(&self, stage: Stage) {
        if self.silent {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier(stage, self);
        }
        notify_singleton(stage, self);
    }
}

static SINGLETON_NOTIFIER: OnceLock<RwLock<Option<Notifier>>> = OnceLock::new();

/// `ionotif_register(handler)` — process-wide singleton registration.
/// Prefer `ProgressEstimator::set_notifier` for new call sites; this exists
/// for hosts that want a single global sink regardless of which estimator
/// is active.
pub fn ionotif_register(handler: Notifier) {
    let cell = SINGLETON_NOTIFIER.get_or_init(|| RwLock::new(None));
    *cell.write().expect("notifier lock poisoned") = Some(handler);
}

fn notify_singleton(stage: Stage, estim: &ProgressEstimator) {
    if let Some(cell) = SINGLETON_NOTIFIER.get()
        && let Ok(guard) = cell.read()
        && let Some(handler) = guard.as_ref()
    {
        handler(stage, estim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn calculate_shallow_adds_one_item_zero_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"hello").unwrap();

        let mut estim = ProgressEstimator::new(CancellationToken::never());
        estim.calculate(&file, true).unwrap();
        assert_eq!(estim.total_items, 1);
        assert_eq!(estim.total_bytes, 0);
    }

    #[test]
    fn calculate_deep_sums_file_bytes_and_counts_dirs_as_items() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"1234").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), b"123456").unwrap();

        let mut estim = ProgressEstimator::new(CancellationToken::never());
        estim.calculate(dir.path(), false).unwrap();

        // root dir + "a" + "sub" dir + "sub/b" = 4 items
        assert_eq!(estim.total_items, 4);
        assert_eq!(estim.total_bytes, 10);
    }

    #[test]
    fn update_advances_current_item_only_when_finished() {
        let mut estim = ProgressEstimator::new(CancellationToken::never());
        estim.total_items = 2;
        estim.update(Path::new("/a"), None, false, 100);
        assert_eq!(estim.current_item, 0);
        assert_eq!(estim.current_byte, 100);

        estim.update(Path::new("/a"), None, true, 0);
        assert_eq!(estim.current_item, 1);
        assert_eq!(estim.current_file_byte, 0);
    }

    #[test]
    fn silent_updates_do_not_move_counters_or_notify() {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = Arc::clone(&calls);
        let mut estim = ProgressEstimator::new(CancellationToken::never());
        estim.set_notifier(Arc::new(move |_, _| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        }));

        estim.silent_on();
        estim.update(Path::new("/a"), None, true, 50);
        assert_eq!(estim.current_byte, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        estim.silent_set(false);
        estim.update(Path::new("/a"), None, true, 50);
        assert_eq!(estim.current_byte, 50);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn restore_is_noop_while_silent() {
        let mut estim = ProgressEstimator::new(CancellationToken::never());
        estim.update(Path::new("/a"), None, true, 10);
        let snapshot = estim.save();

        estim.update(Path::new("/b"), None, true, 20);
        estim.silent_on();
        estim.restore(snapshot);

        // restore must be suppressed: current_byte still reflects the
        // pre-restore (silenced) state, not the snapshot's 10.
        assert_eq!(estim.current_byte, 30);
    }
}
