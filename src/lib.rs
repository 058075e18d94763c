// Deny unused code to catch dead code early (like knip for TS)
#![deny(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

//! File-system operations engine: copy, move, remove, link, create, and
//! permission-change operations over arbitrary subtrees, with progress
//! estimation, conflict resolution, and cooperative cancellation.
//!
//! The engine is synchronous and single-threaded — every entry point runs on
//! the caller's thread to completion. Hosts that need responsiveness (a
//! progress bar, a cancel button) run entry points on a background thread of
//! their own, the way [`cancellation::run_cancellable`] demonstrates.

pub mod args;
pub mod cancellation;
pub mod error;
pub mod estimator;
pub mod metadata;
pub mod primitives;
pub mod recursive;
pub mod traverse;

pub use args::{ChgrpArgs, ChmodArgs, ChownArgs, CpArgs, Crs, LnArgs, MkDirArgs, MkFileArgs, OpContext, RmDirArgs, RmFileArgs};
pub use cancellation::{CancellationToken, run_cancellable};
pub use error::{ErrCbResult, ErrKind, ErrorList, ErrorRecord, FsOpError, OpResult};
pub use estimator::{Notifier, ProgressEstimator, Stage, ionotif_register};
pub use metadata::{is_network_filesystem, is_same_file, is_same_filesystem, mask_mode, mode_bits};
pub use primitives::{iop_chgrp, iop_chmod, iop_chown, iop_cp, iop_ln, iop_mkdir, iop_mkfile, iop_rmdir, iop_rmfile};
pub use recursive::{ior_chgrp, ior_chmod, ior_chown, ior_cp, ior_mv, ior_rm};
pub use traverse::{VisitReason, VisitResult, Visitor, traverse};
