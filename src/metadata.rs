//! Platform metadata helpers shared by `primitives` and `recursive`: mode
//! masking, same-filesystem/same-file detection, and network-filesystem
//! sniffing.

use std::fs;
use std::path::Path;

/// Masks a raw mode value down to its permission bits — a file mode is
/// preserved across a copy as the source mode masked with `0777`.
pub fn mask_mode(mode: u32) -> u32 {
    mode & 0o777
}

/// Raw mode bits of `meta`. `0o777` on platforms without POSIX permission
/// bits, since there is nothing meaningful to mask there.
#[cfg(unix)]
pub fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
pub fn mode_bits(_meta: &fs::Metadata) -> u32 {
    0o777
}

/// Whether `a` and `b` live on the same filesystem, compared by device id.
/// `ior_mv` uses this to decide between a plain rename and the cp+rm
/// decomposition before even attempting the rename.
#[cfg(unix)]
pub fn is_same_filesystem(a: &Path, b: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let a_meta = fs::metadata(a)?;
    let b_meta = fs::metadata(b)?;
    Ok(a_meta.dev() == b_meta.dev())
}

#[cfg(not(unix))]
pub fn is_same_filesystem(_a: &Path, _b: &Path) -> std::io::Result<bool> {
    Ok(false)
}

/// Whether `a` and `b` name the same inode on the same device — a
/// case-only rename on a case-insensitive filesystem looks exactly like
/// this, and `ior_mv`'s FAIL precondition has to let it through.
#[cfg(unix)]
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(am), Ok(bm)) => am.dev() == bm.dev() && am.ino() == bm.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn is_same_file(_a: &Path, _b: &Path) -> bool {
    false
}

/// Detects SMB/NFS/AFP/WebDAV mounts on macOS, where buffered `copyfile()`
/// I/O can stall long enough that cancellation polling needs a shorter
/// chunk size to stay responsive. Other platforms assume local storage.
#[cfg(target_os = "macos")]
pub fn is_network_filesystem(path: &Path) -> bool {
    use std::ffi::{CStr, CString};

    let check_path = if path.exists() {
        path.to_path_buf()
    } else {
        match path.parent() {
            Some(p) if p.exists() => p.to_path_buf(),
            _ => return false,
        }
    };

    let Ok(c_path) = CString::new(check_path.as_os_str().as_encoded_bytes()) else {
        return false;
    };

    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
        return false;
    }

    let fstype = unsafe { CStr::from_ptr(stat.f_fstypename.as_ptr()).to_string_lossy() };
    matches!(fstype.as_ref(), "smbfs" | "nfs" | "afpfs" | "webdav")
}

#[cfg(not(target_os = "macos"))]
pub fn is_network_filesystem(_path: &Path) -> bool {
    false
}
