//! Recursive operations: subtree-scoped, traversal-driven calls built on
//! top of [`crate::traverse`] and the [`crate::primitives`] primitives.

use std::fs;
use std::path::{Path, PathBuf};

use crate::args::{ChgrpArgs, ChmodArgs, ChownArgs, ConfirmArgs, CpArgs, Crs, MkDirArgs, OpContext, RmDirArgs, RmFileArgs};
use crate::error::{ErrKind, ErrorRecord, FsOpError, OpResult, is_in_subtree};
use crate::metadata::{is_same_file, mask_mode, mode_bits};
use crate::primitives::{self, restore_dir_metadata, set_mode};
use crate::traverse::{VisitReason, VisitResult, Visitor, traverse};

fn visit_result_to_op(result: VisitResult) -> OpResult {
    match result {
        VisitResult::Ok | VisitResult::SkipDirLeave => OpResult::Succeeded,
        VisitResult::Error => OpResult::Failed,
        VisitResult::Cancelled => OpResult::Skipped,
    }
}

/// Maps a primitive's outcome to how the traversal should proceed:
/// `Cancelled` unwinds the same way `Error` does (traversal stops, no
/// further entries are visited) but is kept distinct so it is reported as
/// `VisitResult::Cancelled` rather than `VisitResult::Error` — which
/// `visit_result_to_op` in turn reports as `Skipped`, not `Failed`, and
/// without appending an error record.
fn primitive_result_to_visit(result: OpResult) -> VisitResult {
    match result {
        OpResult::Succeeded | OpResult::Skipped => VisitResult::Ok,
        OpResult::Failed => VisitResult::Error,
        OpResult::Cancelled => VisitResult::Cancelled,
    }
}

fn finish_single_item(ctx: &mut OpContext, path: &Path) {
    if let Some(estim) = ctx.estimator.as_deref_mut() {
        estim.update(path, None, true, 0);
    }
}

// --- rm-subtree --------------------------------------------------------------

/// Removes `path` and, if it is a directory, everything beneath it:
/// files are removed on the `File` visit, directories on `Leave` (after
/// their contents are gone), so nothing is ever attempted out of order.
pub fn ior_rm(path: &Path, ctx: &mut OpContext) -> OpResult {
    struct RmVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
    }

    impl Visitor for RmVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            match reason {
                VisitReason::Enter => VisitResult::Ok,
                VisitReason::File => primitive_result_to_visit(primitives::iop_rmfile(&RmFileArgs { path: path.to_path_buf() }, self.ctx)),
                VisitReason::Leave => primitive_result_to_visit(primitives::iop_rmdir(&RmDirArgs { path: path.to_path_buf() }, self.ctx)),
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = RmVisitor { ctx };
    visit_result_to_op(traverse(path, &mut visitor, &cancellation))
}

// --- cp-subtree ----------------------------------------------------------------

/// Copies `src` (a file or a directory tree) to `dst`, mirroring its
/// structure under `dst` path-for-path. `dst` names the destination
/// itself, not its parent.
pub fn ior_cp(src: &Path, dst: &Path, crs: Crs, fast_file_cloning: bool, data_sync: bool, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    if is_in_subtree(src, dst) {
        return Err(FsOpError::DestinationInsideSource { src: src.to_path_buf(), dst: dst.to_path_buf() });
    }

    if crs == Crs::ReplaceAll && fs::symlink_metadata(dst).is_ok() && ior_rm(dst, ctx) == OpResult::Failed {
        return Ok(OpResult::Failed);
    }

    struct CpVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
        src_root: PathBuf,
        dst_root: PathBuf,
        crs: Crs,
        fast_file_cloning: bool,
        data_sync: bool,
    }

    impl Visitor for CpVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            let rel = path.strip_prefix(&self.src_root).unwrap_or_else(|_| Path::new(""));
            let dst_full = self.dst_root.join(rel);

            match reason {
                VisitReason::Enter => {
                    let dst_is_dir = fs::symlink_metadata(&dst_full).map(|m| m.is_dir() && !m.is_symlink()).unwrap_or(false);
                    if self.crs == Crs::ReplaceFiles && dst_is_dir {
                        return VisitResult::Ok;
                    }
                    let args = MkDirArgs { path: dst_full, process_parents: false, mode: 0o700 };
                    primitive_result_to_visit(primitives::iop_mkdir(&args, self.ctx))
                }
                VisitReason::File => {
                    let args = CpArgs {
                        src: path.to_path_buf(),
                        dst: dst_full,
                        crs: self.crs,
                        fast_file_cloning: self.fast_file_cloning,
                        data_sync: self.data_sync,
                    };
                    primitive_result_to_visit(primitives::iop_cp(&args, self.ctx))
                }
                VisitReason::Leave => {
                    match fs::symlink_metadata(path) {
                        Ok(src_meta) => {
                            let mode = mask_mode(mode_bits(&src_meta));
                            if let Err(e) = set_mode(&dst_full, mode) {
                                log::debug!("fsops: failed to restore mode on {}: {}", dst_full.display(), e);
                            }
                            restore_dir_metadata(path, &dst_full);
                        }
                        Err(e) => {
                            self.ctx.handle_error(ErrorRecord::from_io(path, &e));
                        }
                    }
                    VisitResult::Ok
                }
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = CpVisitor { ctx, src_root: src.to_path_buf(), dst_root: dst.to_path_buf(), crs, fast_file_cloning, data_sync };
    Ok(visit_result_to_op(traverse(src, &mut visitor, &cancellation)))
}

// --- mv-subtree ------------------------------------------------------------------

/// Moves `src` to `dst`. Attempts a plain `rename(2)` first; on an
/// errno that means "cross-device-like" (`EXDEV`/`EPERM`/`EACCES`) the
/// move is decomposed into a copy (with `fast_file_cloning` forced on)
/// followed by a remove of the source, with the remove phase silenced in
/// the estimator so it never counts against the visible copy progress. An
/// errno that means "destination-exists-like" (`EEXIST`/`ENOTEMPTY`/
/// `EISDIR`) instead triggers a CRS-specific fallback.
pub fn ior_mv(src: &Path, dst: &Path, crs: Crs, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    if ctx.cancellation.is_cancelled() {
        return Ok(OpResult::Skipped);
    }

    if crs == Crs::Fail && fs::symlink_metadata(dst).is_ok() && !is_same_file(src, dst) {
        ctx.handle_error(ErrorRecord::new(dst, ErrKind::Exists, format!("{} already exists", dst.display())));
        return Ok(OpResult::Failed);
    }

    // `rename(2)` replaces an existing regular-file destination silently, so
    // APPEND_TO_FILES has to intercept a leaf-vs-leaf collision before ever
    // calling it. Directory-vs-directory collisions fall through to the
    // rename attempt below and get merged per-file via `mv_replace_dispatch`
    // instead, since only individual files are ever appended to.
    if crs == Crs::AppendToFiles {
        if let Ok(dst_meta) = fs::symlink_metadata(dst) {
            let dst_is_dir = dst_meta.is_dir() && !dst_meta.is_symlink();
            let src_is_dir = fs::symlink_metadata(src).map(|m| m.is_dir() && !m.is_symlink()).unwrap_or(false);

            if src_is_dir != dst_is_dir {
                let bad = if src_is_dir { dst } else { src };
                return Err(FsOpError::NotARegularFile { path: bad.to_path_buf() });
            }
            if !src_is_dir && !dst_is_dir {
                let src_is_file = fs::symlink_metadata(src).map(|m| m.is_file() && !m.is_symlink()).unwrap_or(false);
                let dst_is_file = dst_meta.is_file() && !dst_meta.is_symlink();
                if !src_is_file || !dst_is_file {
                    let bad = if src_is_file { dst } else { src };
                    return Err(FsOpError::NotARegularFile { path: bad.to_path_buf() });
                }
                return append_then_remove_source(src, dst, ctx);
            }
        }
    }

    if crs == Crs::ReplaceFiles && fs::symlink_metadata(dst).is_ok() {
        let confirm_args = ConfirmArgs { src: src.to_path_buf(), dst: dst.to_path_buf(), crs };
        if !ctx.confirm(&confirm_args) {
            return Ok(OpResult::Skipped);
        }
    }

    match fs::rename(src, dst) {
        Ok(()) => {
            finish_single_item(ctx, dst);
            Ok(OpResult::Succeeded)
        }
        Err(e) => match ErrKind::from_io_error(&e) {
            ErrKind::CrossDevice | ErrKind::Permission => mv_decompose_copy_remove(src, dst, crs, ctx),
            ErrKind::Exists | ErrKind::NotEmpty | ErrKind::IsDir => mv_replace_dispatch(src, dst, crs, ctx),
            _ => {
                ctx.handle_error(ErrorRecord::from_io(src, &e));
                Ok(OpResult::Failed)
            }
        },
    }
}

/// Appends `src`'s bytes onto `dst` (both already confirmed regular files)
/// and removes `src`, the APPEND_TO_FILES leaf-collision outcome. Maps a
/// cancelled primitive to `Skipped` rather than letting `Cancelled` leak
/// out of a recursive op's public return value.
fn append_then_remove_source(src: &Path, dst: &Path, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    let args = CpArgs { src: src.to_path_buf(), dst: dst.to_path_buf(), crs: Crs::AppendToFiles, fast_file_cloning: false, data_sync: false };
    match primitives::iop_cp(&args, ctx) {
        OpResult::Succeeded => {}
        OpResult::Cancelled => return Ok(OpResult::Skipped),
        other @ (OpResult::Skipped | OpResult::Failed) => return Ok(other),
    }
    match primitives::iop_rmfile(&RmFileArgs { path: src.to_path_buf() }, ctx) {
        OpResult::Failed => Ok(OpResult::Failed),
        OpResult::Cancelled => Ok(OpResult::Skipped),
        OpResult::Succeeded | OpResult::Skipped => Ok(OpResult::Succeeded),
    }
}

fn mv_decompose_copy_remove(src: &Path, dst: &Path, crs: Crs, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    let cp_result = ior_cp(src, dst, crs, true, false, ctx)?;
    if cp_result != OpResult::Succeeded {
        return Ok(cp_result);
    }

    let previous_silent = ctx.estimator.as_deref_mut().map(|estim| estim.silent_on());
    let rm_result = ior_rm(src, ctx);
    if let Some(previous) = previous_silent {
        if let Some(estim) = ctx.estimator.as_deref_mut() {
            estim.silent_set(previous);
        }
    }

    match rm_result {
        OpResult::Failed => Ok(OpResult::Failed),
        OpResult::Cancelled => Ok(OpResult::Skipped),
        OpResult::Succeeded | OpResult::Skipped => Ok(OpResult::Succeeded),
    }
}

fn mv_replace_dispatch(src: &Path, dst: &Path, crs: Crs, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    match crs {
        Crs::ReplaceAll => {
            if fs::symlink_metadata(dst).is_ok() {
                let confirm_args = ConfirmArgs { src: src.to_path_buf(), dst: dst.to_path_buf(), crs };
                if !ctx.confirm(&confirm_args) {
                    return Ok(OpResult::Skipped);
                }
                if ior_rm(dst, ctx) == OpResult::Failed {
                    return Ok(OpResult::Failed);
                }
            }
            match fs::rename(src, dst) {
                Ok(()) => {
                    finish_single_item(ctx, dst);
                    Ok(OpResult::Succeeded)
                }
                Err(e) => {
                    ctx.handle_error(ErrorRecord::from_io(src, &e));
                    Ok(OpResult::Failed)
                }
            }
        }
        Crs::ReplaceFiles | Crs::AppendToFiles => mv_merge_per_file(src, dst, crs, ctx),
        Crs::Fail => {
            ctx.handle_error(ErrorRecord::new(dst, ErrKind::Exists, format!("{} already exists", dst.display())));
            Ok(OpResult::Failed)
        }
    }
}

/// Falls back to a per-file merge when a plain rename can't land because
/// `dst` already exists as a non-empty directory: each source file is
/// moved in recursively via `ior_mv` (so a nested conflict gets the same
/// CRS treatment as the top level), and source directories are removed
/// on `Leave`, once their contents have migrated.
fn mv_merge_per_file(src: &Path, dst: &Path, crs: Crs, ctx: &mut OpContext) -> Result<OpResult, FsOpError> {
    struct MergeVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
        src_root: PathBuf,
        dst_root: PathBuf,
        crs: Crs,
        error: Option<FsOpError>,
    }

    impl Visitor for MergeVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            let rel = path.strip_prefix(&self.src_root).unwrap_or_else(|_| Path::new(""));
            let dst_full = self.dst_root.join(rel);

            match reason {
                VisitReason::Enter => {
                    let dst_is_dir = fs::symlink_metadata(&dst_full).map(|m| m.is_dir() && !m.is_symlink()).unwrap_or(false);
                    if dst_is_dir {
                        return VisitResult::Ok;
                    }
                    let args = MkDirArgs { path: dst_full, process_parents: false, mode: 0o700 };
                    primitive_result_to_visit(primitives::iop_mkdir(&args, self.ctx))
                }
                VisitReason::File => match ior_mv(path, &dst_full, self.crs, self.ctx) {
                    Ok(OpResult::Succeeded) | Ok(OpResult::Skipped) => VisitResult::Ok,
                    Ok(OpResult::Failed) => VisitResult::Error,
                    Ok(OpResult::Cancelled) => VisitResult::Cancelled,
                    Err(e) => {
                        self.error = Some(e);
                        VisitResult::Error
                    }
                },
                VisitReason::Leave => primitive_result_to_visit(primitives::iop_rmdir(&RmDirArgs { path: path.to_path_buf() }, self.ctx)),
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = MergeVisitor { ctx, src_root: src.to_path_buf(), dst_root: dst.to_path_buf(), crs, error: None };
    let result = traverse(src, &mut visitor, &cancellation);
    if let Some(error) = visitor.error {
        return Err(error);
    }
    Ok(visit_result_to_op(result))
}

// --- chown / chgrp / chmod subtrees -----------------------------------------------

pub fn ior_chown(path: &Path, uid: u32, ctx: &mut OpContext) -> OpResult {
    struct ChownVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
        uid: u32,
    }

    impl Visitor for ChownVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            match reason {
                VisitReason::Enter => VisitResult::Ok,
                VisitReason::File | VisitReason::Leave => {
                    primitive_result_to_visit(primitives::iop_chown(&ChownArgs { path: path.to_path_buf(), uid: self.uid }, self.ctx))
                }
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = ChownVisitor { ctx, uid };
    visit_result_to_op(traverse(path, &mut visitor, &cancellation))
}

pub fn ior_chgrp(path: &Path, gid: u32, ctx: &mut OpContext) -> OpResult {
    struct ChgrpVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
        gid: u32,
    }

    impl Visitor for ChgrpVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            match reason {
                VisitReason::Enter => VisitResult::Ok,
                VisitReason::File | VisitReason::Leave => {
                    primitive_result_to_visit(primitives::iop_chgrp(&ChgrpArgs { path: path.to_path_buf(), gid: self.gid }, self.ctx))
                }
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = ChgrpVisitor { ctx, gid };
    visit_result_to_op(traverse(path, &mut visitor, &cancellation))
}

pub fn ior_chmod(path: &Path, mode: u32, ctx: &mut OpContext) -> OpResult {
    struct ChmodVisitor<'a, 'b> {
        ctx: &'a mut OpContext<'b>,
        mode: u32,
    }

    impl Visitor for ChmodVisitor<'_, '_> {
        fn visit(&mut self, reason: VisitReason, path: &Path) -> VisitResult {
            match reason {
                VisitReason::Enter => VisitResult::Ok,
                VisitReason::File | VisitReason::Leave => {
                    primitive_result_to_visit(primitives::iop_chmod(&ChmodArgs { path: path.to_path_buf(), mode: self.mode }, self.ctx))
                }
            }
        }
    }

    let cancellation = ctx.cancellation.clone();
    let mut visitor = ChmodVisitor { ctx, mode };
    visit_result_to_op(traverse(path, &mut visitor, &cancellation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorList;
    use std::os::unix::fs::PermissionsExt;

    fn ctx(errors: &mut ErrorList) -> OpContext<'_> {
        OpContext::new(errors)
    }

    #[test]
    fn rm_subtree_removes_nested_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/f"), b"x").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_rm(&root, &mut context);

        assert_eq!(result, OpResult::Succeeded);
        assert!(!root.exists());
    }

    #[test]
    fn cp_subtree_mirrors_nested_structure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/f"), b"hello").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_cp(&src, &dst, Crs::Fail, false, false, &mut context).unwrap();

        assert_eq!(result, OpResult::Succeeded);
        assert_eq!(fs::read(dst.join("a/b/f")).unwrap(), b"hello");
    }

    #[test]
    fn cp_subtree_rejects_destination_inside_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        let dst = src.join("nested");

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_cp(&src, &dst, Crs::Fail, false, false, &mut context);

        assert!(matches!(result, Err(FsOpError::DestinationInsideSource { .. })));
    }

    #[test]
    fn mv_subtree_same_filesystem_is_a_plain_rename() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"x").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_mv(&src, &dst, Crs::Fail, &mut context).unwrap();

        assert_eq!(result, OpResult::Succeeded);
        assert!(!src.exists());
        assert_eq!(fs::read(&dst).unwrap(), b"x");
    }

    #[test]
    fn mv_subtree_fails_when_destination_exists_under_fail_crs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, b"x").unwrap();
        fs::write(&dst, b"y").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_mv(&src, &dst, Crs::Fail, &mut context).unwrap();

        assert_eq!(result, OpResult::Failed);
        assert!(src.exists());
    }

    #[test]
    fn mv_subtree_replace_all_overwrites_destination_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("f"), b"new").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("old"), b"stale").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_mv(&src, &dst, Crs::ReplaceAll, &mut context).unwrap();

        assert_eq!(result, OpResult::Succeeded);
        assert!(!src.exists());
        assert!(!dst.join("old").exists());
        assert_eq!(fs::read(dst.join("f")).unwrap(), b"new");
    }

    #[test]
    fn chmod_subtree_applies_to_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/f"), b"x").unwrap();

        let mut errors = ErrorList::new();
        let mut context = ctx(&mut errors);
        let result = ior_chmod(&root, 0o700, &mut context);

        assert_eq!(result, OpResult::Succeeded);
        assert_eq!(fs::metadata(root.join("sub/f")).unwrap().permissions().mode() & 0o777, 0o700);
        assert_eq!(fs::metadata(root.join("sub")).unwrap().permissions().mode() & 0o777, 0o700);
    }
}
