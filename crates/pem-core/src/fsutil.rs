//! Filesystem helpers shared by the stores and the environment manager.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::OwnerSpec;
use crate::error::{PemError, Result};
use crate::sidecar::SIDECAR_FILE;

/// Recursively copy `src` into `dst`, creating `dst`.
///
/// The source's own top-level sidecar is not copied: the destination gets
/// its own. Symlinks are recreated as symlinks on Unix and skipped elsewhere.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<u64> {
    fs::create_dir_all(dst).map_err(|e| PemError::io(format!("creating {}", dst.display()), e))?;
    let mut copied = 0u64;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            PemError::io(
                format!("walking {}", src.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, msg)),
            )
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| PemError::io("computing relative path", std::io::Error::new(ErrorKind::Other, e)))?;
        if entry.depth() == 1 && rel.as_os_str() == SIDECAR_FILE {
            continue;
        }
        let target = dst.join(rel);
        let ft = entry.file_type();
        if ft.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| PemError::io(format!("creating {}", target.display()), e))?;
        } else if ft.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| {
                PemError::io(
                    format!("copying {} to {}", entry.path().display(), target.display()),
                    e,
                )
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).map_err(|e| PemError::io(format!("reading link {}", src.display()), e))?;
    std::os::unix::fs::symlink(&link, dst)
        .map_err(|e| PemError::io(format!("creating link {}", dst.display()), e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<()> {
    tracing::warn!(path = %src.display(), "skipping symlink");
    Ok(())
}

/// Remove a directory tree. A missing directory is not an error.
pub fn remove_dir_all_idempotent(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PemError::io(format!("removing {}", path.display()), e)),
    }
}

/// Immediate child directories of `dir` whose names do not start with `.`,
/// sorted by name. A missing `dir` yields nothing.
pub fn visible_subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PemError::io(format!("listing {}", dir.display()), e)),
    };
    let mut out = Vec::new();
    for entry in rd {
        // Entries vanishing mid-scan are expected while a deploy is in flight.
        let Ok(entry) = entry else { continue };
        let Ok(name) = entry.file_name().into_string() else {
            tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 directory name");
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            out.push((name, entry.path()));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Apply `owner` recursively to `root`. Symlinks are left alone.
#[cfg(unix)]
pub fn chown_recursive(root: &Path, owner: &OwnerSpec) -> Result<()> {
    use nix::unistd::{chown, Gid, Group, Uid, User};

    if owner.is_empty() {
        return Ok(());
    }
    let uid = match owner.user.as_deref() {
        None => None,
        Some(u) => Some(match u.parse::<u32>() {
            Ok(id) => Uid::from_raw(id),
            Err(_) => User::from_name(u)
                .map_err(|e| PemError::Config(format!("looking up user {u}: {e}")))?
                .ok_or_else(|| PemError::Config(format!("unknown user {u}")))?
                .uid,
        }),
    };
    let gid = match owner.group.as_deref() {
        None => None,
        Some(g) => Some(match g.parse::<u32>() {
            Ok(id) => Gid::from_raw(id),
            Err(_) => Group::from_name(g)
                .map_err(|e| PemError::Config(format!("looking up group {g}: {e}")))?
                .ok_or_else(|| PemError::Config(format!("unknown group {g}")))?
                .gid,
        }),
    };

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            PemError::io(
                format!("walking {}", root.display()),
                std::io::Error::new(ErrorKind::Other, e.to_string()),
            )
        })?;
        if entry.file_type().is_symlink() {
            continue;
        }
        chown(entry.path(), uid, gid).map_err(|e| {
            PemError::io(
                format!("changing owner of {}", entry.path().display()),
                std::io::Error::from(e),
            )
        })?;
    }
    Ok(())
}

/// Ownership changes are not supported off Unix; a configured owner is logged
/// and ignored.
#[cfg(not(unix))]
pub fn chown_recursive(root: &Path, owner: &OwnerSpec) -> Result<()> {
    if !owner.is_empty() {
        tracing::warn!(path = %root.display(), "ownership settings ignored on this platform");
    }
    Ok(())
}
