//! Per-operation argument records and the shared context threaded through
//! every primitive and recursive call.
//!
//! Rather than one argument struct with union-like fields whose meaning
//! depends on the op, this models each op category as its own small struct,
//! plus a shared [`OpContext`] carrying cancellation, confirm, the error
//! callback, the estimator, and the error list.

use std::path::PathBuf;

use crate::cancellation::CancellationToken;
use crate::error::{ErrCbResult, ErrorList, ErrorRecord};
use crate::estimator::ProgressEstimator;

/// Conflict Resolution Strategy — what to do when a destination path
/// already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Crs {
    /// Any existing destination aborts the operation.
    #[default]
    Fail,
    /// Existing destination (file or directory) is removed first.
    ReplaceAll,
    /// Colliding files are overwritten in place; directories are merged.
    ReplaceFiles,
    /// Both sides must be regular files; source is appended to destination.
    AppendToFiles,
}

/// Arguments for `confirm`: asks the caller whether to overwrite `dst` with
/// `src` under the current CRS.
#[derive(Debug, Clone)]
pub struct ConfirmArgs {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub crs: Crs,
}

pub type ConfirmFn<'a> = dyn FnMut(&ConfirmArgs) -> bool + 'a;
pub type ErrorCbFn<'a> = dyn FnMut(&ErrorRecord) -> ErrCbResult + 'a;

/// Shared context threaded by mutable reference through every primitive and
/// recursive call: cancellation, the optional confirm/error callbacks, the
/// optional progress estimator, and the error list the caller owns.
pub struct OpContext<'a> {
    pub cancellation: CancellationToken,
    pub confirm: Option<&'a mut ConfirmFn<'a>>,
    pub error_cb: Option<&'a mut ErrorCbFn<'a>>,
    pub estimator: Option<&'a mut ProgressEstimator>,
    pub errors: &'a mut ErrorList,
}

impl<'a> OpContext<'a> {
    pub fn new(errors: &'a mut ErrorList) -> Self {
        Self {
            cancellation: CancellationToken::never(),
            confirm: None,
            error_cb: None,
            estimator: None,
            errors,
        }
    }

    /// Invokes the confirm callback if set. Absent a callback there is no
    /// host to ask, so the overwrite proceeds — this only gates overwriting
    /// when a host actually wired one up.
    pub fn confirm(&mut self, args: &ConfirmArgs) -> bool {
        match self.confirm.as_mut() {
            Some(cb) => cb(args),
            None => true,
        }
    }

    /// Runs the error callback (defaulting to `Break` when absent) and
    /// records the error unless the decision is `Ignore`.
    pub fn handle_error(&mut self, record: ErrorRecord) -> ErrCbResult {
        let decision = match self.error_cb.as_mut() {
            Some(cb) => cb(&record),
            None => ErrCbResult::Break,
        };
        if decision != ErrCbResult::Ignore {
            self.errors.push(record);
        }
        decision
    }

    /// Re-invokes the error callback for a failure already recorded by a
    /// prior `handle_error` call, without pushing a second copy into the
    /// error list. Primitives use this on retry: the first failure of a
    /// retry loop goes through `handle_error`, every subsequent one in the
    /// same loop goes through this instead, so a primitive retried several
    /// times logs its failure exactly once.
    pub fn error_decision(&mut self, record: &ErrorRecord) -> ErrCbResult {
        match self.error_cb.as_mut() {
            Some(cb) => cb(record),
            None => ErrCbResult::Break,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MkFileArgs {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct MkDirArgs {
    pub path: PathBuf,
    pub process_parents: bool,
    pub mode: u32,
}

#[derive(Debug, Clone)]
pub struct RmFileArgs {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RmDirArgs {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CpArgs {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub crs: Crs,
    /// Forced to `true` unconditionally by the move decomposition path —
    /// callers who want it disabled during a move cannot.
    pub fast_file_cloning: bool,
    pub data_sync: bool,
}

#[derive(Debug, Clone)]
pub struct LnArgs {
    pub path: PathBuf,
    pub target: PathBuf,
    pub crs: Crs,
}

#[derive(Debug, Clone)]
pub struct ChownArgs {
    pub path: PathBuf,
    pub uid: u32,
}

#[derive(Debug, Clone)]
pub struct ChgrpArgs {
    pub path: PathBuf,
    pub gid: u32,
}

#[derive(Debug, Clone)]
pub struct ChmodArgs {
    pub path: PathBuf,
    pub mode: u32,
}
