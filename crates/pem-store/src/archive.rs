//! # Tarball Handling
//!
//! Release and upload archives are gzip-compressed tarballs. Registry
//! releases wrap their content in one top-level directory
//! (`author-name-version/`); when every entry shares a single top-level
//! directory it is stripped so the content lands directly in the version
//! directory.
//!
//! Entries that would land outside the destination (absolute paths, `..`
//! components, links pointing out of the tree) are rejected.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Archive;

use pem_core::{PemError, Result};

fn open_archive(path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let file = File::open(path).map_err(|e| PemError::io(format!("opening {}", path.display()), e))?;
    Ok(Archive::new(GzDecoder::new(file)))
}

fn bad_archive(path: &Path, e: impl std::fmt::Display) -> PemError {
    PemError::Integrity(format!("unreadable archive {}: {e}", path.display()))
}

/// A relative path with only normal components, or `None` if the path would
/// escape its root.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// The single top-level directory shared by every entry, if there is one.
fn common_top_dir(path: &Path) -> Result<Option<PathBuf>> {
    let mut archive = open_archive(path)?;
    let mut tops = BTreeSet::new();
    let mut nested = false;
    for entry in archive.entries().map_err(|e| bad_archive(path, e))? {
        let entry = entry.map_err(|e| bad_archive(path, e))?;
        let p = entry.path().map_err(|e| bad_archive(path, e))?;
        let Some(clean) = sanitize(&p) else { continue };
        let mut comps = clean.components();
        let Some(first) = comps.next() else { continue };
        if comps.next().is_some() {
            nested = true;
        } else if !entry.header().entry_type().is_dir() {
            // A file at the top level means there is no wrapper directory.
            return Ok(None);
        }
        tops.insert(PathBuf::from(first.as_os_str()));
    }
    Ok(match (tops.len(), nested) {
        (1, true) => tops.into_iter().next(),
        _ => None,
    })
}

/// Unpack a `.tar.gz` into `dest`, stripping a shared top-level directory.
///
/// Returns the number of regular files written.
pub fn unpack_tarball(archive_path: &Path, dest: &Path) -> Result<u64> {
    let strip = common_top_dir(archive_path)?;
    fs::create_dir_all(dest).map_err(|e| PemError::io(format!("creating {}", dest.display()), e))?;

    let mut archive = open_archive(archive_path)?;
    archive.set_preserve_permissions(true);
    let mut files = 0u64;
    for entry in archive.entries().map_err(|e| bad_archive(archive_path, e))? {
        let mut entry = entry.map_err(|e| bad_archive(archive_path, e))?;
        let raw = entry.path().map_err(|e| bad_archive(archive_path, e))?.into_owned();
        let clean = sanitize(&raw).ok_or_else(|| {
            PemError::Integrity(format!("archive entry {} escapes the destination", raw.display()))
        })?;
        let rel = match &strip {
            Some(top) => match clean.strip_prefix(top) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => clean,
            },
            None => clean,
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(|e| bad_archive(archive_path, e))?
                .unwrap_or_default();
            let parent_depth = rel.components().count().saturating_sub(1);
            if !link_stays_inside(&link, parent_depth) {
                return Err(PemError::Integrity(format!(
                    "archive link {} -> {} escapes the destination",
                    rel.display(),
                    link.display()
                )));
            }
            if kind.is_hard_link() {
                tracing::warn!(entry = %rel.display(), "skipping hard link in archive");
                continue;
            }
        }

        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PemError::io(format!("creating {}", parent.display()), e))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| PemError::io(format!("extracting {}", target.display()), e))?;
        if kind.is_file() {
            files += 1;
        }
    }
    tracing::debug!(archive = %archive_path.display(), dest = %dest.display(), files, "unpacked archive");
    Ok(files)
}

/// Whether a relative link target, resolved from a directory `depth` levels
/// below the root, stays inside the root.
fn link_stays_inside(link: &Path, depth: usize) -> bool {
    let mut level = depth as isize;
    for c in link.components() {
        match c {
            Component::Normal(_) => level += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                level -= 1;
                if level < 0 {
                    return false;
                }
            }
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Pack `src` into a `.tar.gz` at `out`, with every entry under `top`.
pub fn pack_dir(src: &Path, top: &str, out: &Path) -> Result<()> {
    let file = File::create(out).map_err(|e| PemError::io(format!("creating {}", out.display()), e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(top, src)
        .map_err(|e| PemError::io(format!("archiving {}", src.display()), e))?;
    let encoder = builder
        .into_inner()
        .map_err(|e| PemError::io(format!("finishing {}", out.display()), e))?;
    encoder
        .finish()
        .and_then(|f| f.sync_all())
        .map_err(|e: io::Error| PemError::io(format!("flushing {}", out.display()), e))?;
    Ok(())
}
