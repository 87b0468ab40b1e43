//! Home directory materialization.
//!
//! Copies the skeleton tree to the new home, then stamps ownership and
//! mode onto the root and every copied entry. These are filesystem side
//! effects outside the store transaction; once a home exists it stays on
//! disk even when a later persistence step rolls back.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::unistd::{Gid, Uid, chown};
use walkdir::WalkDir;

use crate::error::ProvisionError;

/// Copy `skel` to `target` and hand the tree to (uid, gid) with mode
/// `0777 & !umask` on every entry.
pub fn materialize(
    target: &Path,
    skel: &Path,
    uid: u32,
    gid: u32,
    umask: u32,
) -> Result<(), ProvisionError> {
    if target.exists() {
        return Err(ProvisionError::TargetAlreadyExists(target.to_path_buf()));
    }

    copy_tree(skel, target).map_err(|e| classify_io(e, "create", target))?;

    let mode = 0o777 & !umask;
    for entry in WalkDir::new(target) {
        let entry = entry.map_err(|e| classify_io(io::Error::from(e), "create", target))?;
        apply_owner_and_mode(entry.path(), uid, gid, mode)?;
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn apply_owner_and_mode(
    path: &Path,
    uid: u32,
    gid: u32,
    mode: u32,
) -> Result<(), ProvisionError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| classify_io(e, "create", path))?;
    match chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))) {
        Ok(()) => Ok(()),
        Err(Errno::EPERM) | Err(Errno::EACCES) => Err(ProvisionError::InsufficientPermissions {
            action: "own",
            path: path.to_path_buf(),
        }),
        Err(errno) => Err(ProvisionError::Io(io::Error::from(errno))),
    }
}

/// Move a home directory to a new location.
pub fn move_home(from: &Path, to: &Path) -> Result<(), ProvisionError> {
    fs::rename(from, to).map_err(|e| classify_io(e, "move", from))
}

/// Remove a home directory tree. With `force`, filesystem errors are
/// ignored.
pub fn remove_tree(path: &Path, force: bool) -> Result<(), ProvisionError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(_) if force => Ok(()),
        Err(e) => Err(classify_io(e, "remove", path)),
    }
}

fn classify_io(e: io::Error, action: &'static str, path: &Path) -> ProvisionError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => ProvisionError::InsufficientPermissions {
            action,
            path: path.to_path_buf(),
        },
        io::ErrorKind::AlreadyExists => {
            ProvisionError::TargetAlreadyExists(path.to_path_buf())
        }
        _ => ProvisionError::Io(e),
    }
}
