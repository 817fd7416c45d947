//! Recursive directory copy used to stage a slot before it boots.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Copy everything under `src` into `dst`, overwriting existing files.
///
/// Files already in `dst` that are absent from `src` are left alone; see
/// [`prune_removed`]. A missing `src` copies nothing. Returns the number
/// of files copied.
pub async fn copy_dir(src: &Path, dst: &Path) -> io::Result<u64> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || copy_dir_blocking(&src, &dst))
        .await
        .map_err(io::Error::other)?
}

fn copy_dir_blocking(src: &Path, dst: &Path) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    if !src.is_dir() {
        debug!(src = %src.display(), "nothing to copy, source directory missing");
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true).min_depth(1) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target: PathBuf = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!(src = %src.display(), dst = %dst.display(), files = copied, "directory copied");
    Ok(copied)
}

/// Delete top-level files in `dst` matching `pattern` that no longer
/// exist in `src`. Returns the number of files removed.
pub async fn prune_removed(src: &Path, dst: &Path, pattern: &glob::Pattern) -> io::Result<u64> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    let pattern = pattern.clone();
    tokio::task::spawn_blocking(move || prune_removed_blocking(&src, &dst, &pattern))
        .await
        .map_err(io::Error::other)?
}

fn prune_removed_blocking(src: &Path, dst: &Path, pattern: &glob::Pattern) -> io::Result<u64> {
    if !dst.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in std::fs::read_dir(dst)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if !pattern.matches(&name.to_string_lossy()) || src.join(&name).exists() {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        debug!(file = %entry.path().display(), "removed stale file");
        removed += 1;
    }
    Ok(removed)
}
