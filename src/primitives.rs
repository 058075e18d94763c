//! Primitive operations: non-recursive, single-path filesystem calls.
//! Each `iop_*` takes its own argument struct plus an [`OpContext`], and
//! returns [`OpResult`] — never `FsOpError`, since there is no
//! precondition phase at this level, only runtime I/O.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use uuid::Uuid;

use crate::args::{ChgrpArgs, ChmodArgs, ChownArgs, ConfirmArgs, CpArgs, Crs, LnArgs, MkDirArgs, MkFileArgs, OpContext, RmDirArgs, RmFileArgs};
use crate::error::{ErrCbResult, ErrKind, ErrorRecord, OpResult};
use crate::metadata::{mask_mode, mode_bits};

/// Bytes moved per read/write cycle during a chunked copy or append. Small
/// enough to keep cancellation polling responsive on a large file.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// `uid`/`gid` value meaning "leave unchanged" when passed to `lchown` —
/// the POSIX `(uid_t)-1` / `(gid_t)-1` convention.
#[cfg(unix)]
const KEEP_ID: u32 = u32::MAX;

/// Runs `attempt` in a loop, feeding any returned [`ErrorRecord`] through
/// the error callback and retrying on [`ErrCbResult::Retry`]. The first
/// failure is recorded via [`OpContext::handle_error`]; subsequent
/// failures within the same loop go through [`OpContext::error_decision`]
/// instead, so a primitive retried three times logs exactly one error.
///
/// A cancellation — whether observed at the top of the loop or returned by
/// `attempt` as an [`ErrKind::Cancelled`] record — short-circuits straight
/// to [`OpResult::Cancelled`] without going through the error callback and
/// without appending anything to the error list: cancellation is not a
/// failure a host can retry, ignore, or break on.
fn with_retry<F>(ctx: &mut OpContext, mut attempt: F) -> OpResult
where
    F: FnMut(&mut OpContext) -> Result<OpResult, ErrorRecord>,
{
    let mut first_failure = true;
    loop {
        if ctx.cancellation.is_cancelled() {
            return OpResult::Cancelled;
        }

        let record = match attempt(ctx) {
            Ok(result) => return result,
            Err(record) => record,
        };

        if record.kind == ErrKind::Cancelled {
            return OpResult::Cancelled;
        }

        let decision = if first_failure { ctx.handle_error(record) } else { ctx.error_decision(&record) };
        first_failure = false;

        match decision {
            ErrCbResult::Retry => continue,
            ErrCbResult::Ignore => return OpResult::Skipped,
            ErrCbResult::Break => return OpResult::Failed,
        }
    }
}

fn finish_item(ctx: &mut OpContext, path: &Path) {
    if let Some(estim) = ctx.estimator.as_deref_mut() {
        estim.update(path, None, true, 0);
    }
}

// --- mkfile / mkdir --------------------------------------------------------

pub fn iop_mkfile(args: &MkFileArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_mkfile(args, ctx))
}

fn try_mkfile(args: &MkFileArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    if fs::symlink_metadata(&args.path).is_ok() {
        return Err(ErrorRecord::new(&args.path, ErrKind::Exists, format!("{} already exists", args.path.display())));
    }
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&args.path)
        .map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

pub fn iop_mkdir(args: &MkDirArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_mkdir(args, ctx))
}

fn try_mkdir(args: &MkDirArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    let result = if args.process_parents {
        create_dir_with_parents(&args.path, args.mode)
    } else {
        create_dir_with_mode(&args.path, args.mode)
    };
    result.map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

fn create_dir_with_parents(path: &Path, final_mode: u32) -> io::Result<()> {
    let mut missing = Vec::new();
    let mut current = path;
    loop {
        if current.exists() {
            break;
        }
        missing.push(current);
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    for ancestor in missing.into_iter().rev() {
        let mode = if ancestor == path { final_mode } else { 0o700 };
        create_dir_with_mode(ancestor, mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::create_dir(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _mode: u32) -> io::Result<()> {
    fs::create_dir(path)
}

// --- rmfile / rmdir ---------------------------------------------------------

pub fn iop_rmfile(args: &RmFileArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_rmfile(args, ctx))
}

fn try_rmfile(args: &RmFileArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    let meta = fs::symlink_metadata(&args.path).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    if meta.is_dir() {
        return Err(ErrorRecord::new(&args.path, ErrKind::IsDir, format!("{} is a directory", args.path.display())));
    }
    fs::remove_file(&args.path).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

pub fn iop_rmdir(args: &RmDirArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_rmdir(args, ctx))
}

fn try_rmdir(args: &RmDirArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    fs::remove_dir(&args.path).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

// --- cp ----------------------------------------------------------------------

pub fn iop_cp(args: &CpArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_cp(args, ctx))
}

fn try_cp(args: &CpArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    let src_meta = fs::symlink_metadata(&args.src).map_err(|e| ErrorRecord::from_io(&args.src, &e))?;

    if src_meta.is_symlink() {
        return copy_symlink(args, ctx);
    }
    if !src_meta.is_file() {
        return Err(ErrorRecord::new(&args.src, ErrKind::IsDir, format!("{} is not a regular file", args.src.display())));
    }

    let dst_meta = fs::symlink_metadata(&args.dst).ok();

    if args.crs == Crs::AppendToFiles {
        return match dst_meta {
            Some(m) if m.is_file() && !m.is_symlink() => append_file(args, ctx),
            Some(_) => Err(ErrorRecord::new(&args.dst, ErrKind::IsDir, format!("{} is not a regular file", args.dst.display()))),
            None => copy_fresh(args, ctx, &src_meta),
        };
    }

    match dst_meta {
        None => copy_fresh(args, ctx, &src_meta),
        Some(_) => match args.crs {
            Crs::Fail => Err(ErrorRecord::new(&args.dst, ErrKind::Exists, format!("{} already exists", args.dst.display()))),
            Crs::ReplaceAll | Crs::ReplaceFiles => {
                let confirm_args = ConfirmArgs { src: args.src.clone(), dst: args.dst.clone(), crs: args.crs };
                if !ctx.confirm(&confirm_args) {
                    return Ok(OpResult::Skipped);
                }
                overwrite_existing(args, ctx, &src_meta)
            }
            Crs::AppendToFiles => unreachable!("handled above"),
        },
    }
}

fn copy_fresh(args: &CpArgs, ctx: &mut OpContext, src_meta: &fs::Metadata) -> Result<OpResult, ErrorRecord> {
    if args.fast_file_cloning && try_reflink(&args.src, &args.dst) {
        preserve_metadata(&args.src, &args.dst, src_meta);
        finish_item(ctx, &args.dst);
        return Ok(OpResult::Succeeded);
    }

    copy_data(&args.src, &args.dst, ctx, args.data_sync)?;
    preserve_metadata(&args.src, &args.dst, src_meta);
    finish_item(ctx, &args.dst);
    Ok(OpResult::Succeeded)
}

fn overwrite_existing(args: &CpArgs, ctx: &mut OpContext, src_meta: &fs::Metadata) -> Result<OpResult, ErrorRecord> {
    let dst_meta = fs::symlink_metadata(&args.dst).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;
    if dst_meta.is_dir() && !dst_meta.is_symlink() {
        fs::remove_dir_all(&args.dst).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;
        return copy_fresh(args, ctx, src_meta);
    }

    let parent = args.dst.parent().unwrap_or_else(|| Path::new("."));
    let file_name = args.dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.fsops-tmp-{}", Uuid::new_v4()));

    if let Err(record) = copy_data(&args.src, &temp_path, ctx, args.data_sync) {
        let _ = fs::remove_file(&temp_path);
        return Err(record);
    }
    preserve_metadata(&args.src, &temp_path, src_meta);
    if let Err(e) = fs::rename(&temp_path, &args.dst) {
        let _ = fs::remove_file(&temp_path);
        return Err(ErrorRecord::from_io(&args.dst, &e));
    }
    finish_item(ctx, &args.dst);
    Ok(OpResult::Succeeded)
}

fn append_file(args: &CpArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    let mut src_file = fs::File::open(&args.src).map_err(|e| ErrorRecord::from_io(&args.src, &e))?;
    let mut dst_file = fs::OpenOptions::new().append(true).open(&args.dst).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        if ctx.cancellation.is_cancelled() {
            return Err(ErrorRecord::new(&args.dst, ErrKind::Cancelled, "append cancelled"));
        }
        let read = src_file.read(&mut buffer).map_err(|e| ErrorRecord::from_io(&args.src, &e))?;
        if read == 0 {
            break;
        }
        dst_file.write_all(&buffer[..read]).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;
        if args.data_sync {
            let _ = dst_file.sync_data();
        }
        if let Some(estim) = ctx.estimator.as_deref_mut() {
            estim.update(&args.src, Some(&args.dst), false, read as u64);
        }
    }

    finish_item(ctx, &args.dst);
    Ok(OpResult::Succeeded)
}

fn copy_data(src: &Path, dst: &Path, ctx: &mut OpContext, data_sync: bool) -> Result<(), ErrorRecord> {
    let mut src_file = fs::File::open(src).map_err(|e| ErrorRecord::from_io(src, &e))?;
    let mut dst_file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .map_err(|e| ErrorRecord::from_io(dst, &e))?;

    let mut buffer = vec![0u8; COPY_CHUNK_SIZE];
    loop {
        if ctx.cancellation.is_cancelled() {
            return Err(ErrorRecord::new(dst, ErrKind::Cancelled, "copy cancelled"));
        }
        let read = src_file.read(&mut buffer).map_err(|e| ErrorRecord::from_io(src, &e))?;
        if read == 0 {
            break;
        }
        dst_file.write_all(&buffer[..read]).map_err(|e| ErrorRecord::from_io(dst, &e))?;
        if data_sync {
            let _ = dst_file.sync_data();
        }
        if let Some(estim) = ctx.estimator.as_deref_mut() {
            estim.update(src, Some(dst), false, read as u64);
        }
    }
    Ok(())
}

/// Attempts a copy-on-write clone via the Linux `FICLONE` ioctl (btrfs,
/// xfs with reflink, overlayfs). Returns `false` on any failure — the
/// caller falls back to a regular chunked copy, and `dst` is left
/// truncated-and-empty from the attempt either way.
#[cfg(target_os = "linux")]
fn try_reflink(src: &Path, dst: &Path) -> bool {
    use std::os::unix::io::AsRawFd;

    const FICLONE: libc::c_ulong = 0x4004_9409;

    let Ok(src_file) = fs::File::open(src) else { return false };
    let Ok(dst_file) = fs::OpenOptions::new().write(true).create(true).truncate(true).open(dst) else { return false };

    let ret = unsafe { libc::ioctl(dst_file.as_raw_fd(), FICLONE, src_file.as_raw_fd()) };
    ret == 0
}

#[cfg(not(target_os = "linux"))]
fn try_reflink(_src: &Path, _dst: &Path) -> bool {
    false
}

fn copy_symlink(args: &CpArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    let link_target = fs::read_link(&args.src).map_err(|e| ErrorRecord::from_io(&args.src, &e))?;

    if fs::symlink_metadata(&args.dst).is_ok() {
        match args.crs {
            Crs::Fail => return Err(ErrorRecord::new(&args.dst, ErrKind::Exists, format!("{} already exists", args.dst.display()))),
            Crs::AppendToFiles => {
                return Err(ErrorRecord::new(&args.dst, ErrKind::IsFile, "cannot append to a symbolic link".to_string()));
            }
            Crs::ReplaceAll | Crs::ReplaceFiles => {
                let confirm_args = ConfirmArgs { src: args.src.clone(), dst: args.dst.clone(), crs: args.crs };
                if !ctx.confirm(&confirm_args) {
                    return Ok(OpResult::Skipped);
                }
                remove_any(&args.dst).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;
            }
        }
    }

    create_symlink(&link_target, &args.dst).map_err(|e| ErrorRecord::from_io(&args.dst, &e))?;
    finish_item(ctx, &args.dst);
    Ok(OpResult::Succeeded)
}

fn remove_any(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() && !meta.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

// --- ln ------------------------------------------------------------------

pub fn iop_ln(args: &LnArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_ln(args, ctx))
}

fn try_ln(args: &LnArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    match fs::symlink_metadata(&args.target) {
        Err(_) => {
            create_symlink(&args.path, &args.target).map_err(|e| ErrorRecord::from_io(&args.target, &e))?;
        }
        Ok(meta) if !meta.is_symlink() => {
            return Err(ErrorRecord::new(&args.target, ErrKind::Exists, format!("{} already exists", args.target.display())));
        }
        Ok(_) => match args.crs {
            Crs::Fail => {
                return Err(ErrorRecord::new(&args.target, ErrKind::Exists, format!("{} already exists", args.target.display())));
            }
            Crs::AppendToFiles => {
                return Err(ErrorRecord::new(
                    &args.target,
                    ErrKind::Exists,
                    "append-to-files is not meaningful for a symbolic link".to_string(),
                ));
            }
            Crs::ReplaceAll | Crs::ReplaceFiles => {
                let confirm_args = ConfirmArgs { src: args.path.clone(), dst: args.target.clone(), crs: args.crs };
                if !ctx.confirm(&confirm_args) {
                    return Ok(OpResult::Skipped);
                }
                replace_symlink(&args.path, &args.target).map_err(|e| ErrorRecord::from_io(&args.target, &e))?;
            }
        },
    }

    finish_item(ctx, &args.target);
    Ok(OpResult::Succeeded)
}

#[cfg(unix)]
fn create_symlink(target_value: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target_value, at)
}

#[cfg(not(unix))]
fn create_symlink(_target_value: &Path, _at: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not supported on this platform"))
}

/// Replaces the symlink at `at` with one pointing at `target_value`, via a
/// temp-then-rename so a reader never observes `at` missing.
#[cfg(unix)]
fn replace_symlink(target_value: &Path, at: &Path) -> io::Result<()> {
    let parent = at.parent().unwrap_or_else(|| Path::new("."));
    let temp = parent.join(format!(".fsops-ln-tmp-{}", Uuid::new_v4()));
    std::os::unix::fs::symlink(target_value, &temp)?;
    if let Err(e) = fs::rename(&temp, at) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

#[cfg(not(unix))]
fn replace_symlink(_target_value: &Path, _at: &Path) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links are not supported on this platform"))
}

// --- chown / chgrp / chmod ---------------------------------------------------

pub fn iop_chown(args: &ChownArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_chown(args, ctx))
}

fn try_chown(args: &ChownArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    #[cfg(unix)]
    {
        lchown(&args.path, args.uid, KEEP_ID).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    }
    #[cfg(not(unix))]
    {
        return Err(ErrorRecord::new(&args.path, ErrKind::Unknown, "chown is not supported on this platform"));
    }
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

pub fn iop_chgrp(args: &ChgrpArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_chgrp(args, ctx))
}

fn try_chgrp(args: &ChgrpArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    #[cfg(unix)]
    {
        lchown(&args.path, KEEP_ID, args.gid).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    }
    #[cfg(not(unix))]
    {
        return Err(ErrorRecord::new(&args.path, ErrKind::Unknown, "chgrp is not supported on this platform"));
    }
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

#[cfg(unix)]
fn lchown(path: &Path, uid: u32, gid: u32) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte"))?;
    let ret = unsafe { libc::lchown(c_path.as_ptr(), uid as libc::uid_t, gid as libc::gid_t) };
    if ret == 0 { Ok(()) } else { Err(io::Error::last_os_error()) }
}

pub fn iop_chmod(args: &ChmodArgs, ctx: &mut OpContext) -> OpResult {
    with_retry(ctx, |ctx| try_chmod(args, ctx))
}

fn try_chmod(args: &ChmodArgs, ctx: &mut OpContext) -> Result<OpResult, ErrorRecord> {
    set_mode(&args.path, args.mode).map_err(|e| ErrorRecord::from_io(&args.path, &e))?;
    finish_item(ctx, &args.path);
    Ok(OpResult::Succeeded)
}

/// Sets permission bits without following a symlink at `path`, the way
/// `iop_chmod` requires. Linux's `fchmodat` never implemented
/// `AT_SYMLINK_NOFOLLOW` for regular files (it only rejects outright when
/// the target actually is a symlink); non-symlink targets fall back to a
/// following `chmod` when that happens.
#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a nul byte"))?;
    let ret = unsafe { libc::fchmodat(libc::AT_FDCWD, c_path.as_ptr(), mode as libc::mode_t, libc::AT_SYMLINK_NOFOLLOW) };
    if ret == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EOPNOTSUPP) {
        let meta = fs::symlink_metadata(path)?;
        if !meta.is_symlink() {
            return fs::set_permissions(path, fs::Permissions::from_mode(mode));
        }
    }
    Err(err)
}

#[cfg(not(unix))]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

// --- metadata preservation ---------------------------------------------------

fn preserve_metadata(src: &Path, dst: &Path, src_meta: &fs::Metadata) {
    let mode = mask_mode(mode_bits(src_meta));
    if let Err(e) = set_mode(dst, mode) {
        log::debug!("fsops: failed to set mode on {}: {}", dst.display(), e);
    }
    restore_dir_metadata(src, dst);
}

/// Best-effort timestamp/xattr/ACL preservation, shared by `iop_cp`'s
/// file-copy path and `recursive`'s directory `Leave` handler.
pub(crate) fn restore_dir_metadata(src: &Path, dst: &Path) {
    if let Err(e) = copy_timestamps(src, dst) {
        log::debug!("fsops: failed to restore timestamps on {}: {}", dst.display(), e);
    }
    copy_xattrs(src, dst);
    copy_acls(src, dst);
}

fn copy_timestamps(src: &Path, dst: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(src)?;
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    let atime = filetime::FileTime::from_last_access_time(&metadata);
    filetime::set_file_times(dst, atime, mtime)
}

fn copy_xattrs(src: &Path, dst: &Path) {
    let names = match xattr::list(src) {
        Ok(names) => names,
        Err(_) => return,
    };
    for name in names {
        let value = match xattr::get(src, &name) {
            Ok(Some(value)) => value,
            _ => continue,
        };
        if let Err(e) = xattr::set(dst, &name, &value) {
            log::debug!("fsops: failed to set xattr {:?} on {}: {}", name, dst.display(), e);
        }
    }
}

#[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
fn copy_acls(src: &Path, dst: &Path) {
    use exacl::{AclOption, getfacl, setfacl};

    let acl = match getfacl(src, AclOption::empty()) {
        Ok(acl) => acl,
        Err(_) => return,
    };
    if let Err(e) = setfacl(&[dst], &acl, AclOption::empty()) {
        log::debug!("fsops: failed to set ACL on {}: {}", dst.display(), e);
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "freebsd")))]
fn copy_acls(_src: &Path, _dst: &Path) {}
