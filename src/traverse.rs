//! Generic depth-first directory walker: one visitor call per entry,
//! cancellation polled before each, never descending into a symlink.

use std::path::Path;

use crate::cancellation::CancellationToken;

/// Why the visitor is being called for a given path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitReason {
    /// About to descend into a directory.
    Enter,
    /// A regular file or symbolic link (symlinks-to-directories included —
    /// they are never descended into).
    File,
    /// Finished descending into a directory (suppressed if `Enter` returned
    /// `SkipDirLeave`).
    Leave,
}

/// Controls how the traversal proceeds after a visitor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Ok,
    Error,
    SkipDirLeave,
    Cancelled,
}

/// Receives one call per traversal step. Implementations close over
/// whatever shared state they need (cancellation, estimator, error list) —
/// the context is not threaded through the trait itself.
pub trait Visitor {
    fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult;
}

/// `traverse(path, visitor, state) -> Result`.
///
/// If `path` resolves to a symbolic link or to a non-directory, the visitor
/// is called once with reason `File`. Otherwise the directory is opened,
/// the visitor is called with reason `Enter`, each non-`.`/`..` child is
/// recursed into in OS-iteration order (never sorted), and the visitor is
/// called with reason `Leave` unless `Enter` returned `SkipDirLeave`.
///
/// If the directory can't actually be listed after `Enter` succeeds (most
/// commonly `EACCES` on its permission bits), it is re-visited once with
/// reason `File` instead of hard-aborting — this routes the failure through
/// the same per-item decision the visitor already makes for unreadable
/// files, so an `IGNORE` from the host's error callback can skip an
/// un-openable subtree without failing the whole operation.
///
/// Cancellation is polled before every entry; a cancelled hook is treated
/// the same as a visitor returning `Cancelled`.
pub fn traverse(path: &Path, visitor: &mut dyn Visitor, cancellation: &CancellationToken) -> VisitResult {
    if cancellation.is_cancelled() {
        return VisitResult::Cancelled;
    }

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return visitor.visit(VisitReason::File, path),
    };

    if metadata.is_symlink() || !metadata.is_dir() {
        return visitor.visit(VisitReason::File, path);
    }

    traverse_dir(path, visitor, cancellation)
}

fn traverse_dir(path: &Path, visitor: &mut dyn Visitor, cancellation: &CancellationToken) -> VisitResult {
    let enter_result = visitor.visit(VisitReason::Enter, path);
    match enter_result {
        // Hard-fail: opening/entering this subtree failed, no further
        // visits at this level.
        VisitResult::Error | VisitResult::Cancelled => return enter_result,
        VisitResult::SkipDirLeave | VisitResult::Ok => {}
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return visitor.visit(VisitReason::File, path),
    };

    for entry in entries {
        if cancellation.is_cancelled() {
            return VisitResult::Cancelled;
        }

        let entry = match entry {
            Ok(e) => e,
            Err(_) => return VisitResult::Error,
        };
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }

        let child_result = traverse(&entry.path(), visitor, cancellation);
        match child_result {
            VisitResult::Ok => {}
            VisitResult::Error | VisitResult::Cancelled | VisitResult::SkipDirLeave => return child_result,
        }
    }

    if enter_result == VisitResult::SkipDirLeave {
        return VisitResult::Ok;
    }

    visitor.visit(VisitReason::Leave, path)
}
