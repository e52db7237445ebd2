//! Package staging.
//!
//! A package's `dist` directory is copied into a private working directory
//! named `{id}-{version}` under the modules root. A marker file records the
//! package hash, so staging an unchanged version twice is a no-op while a
//! rebuilt package with the same version is staged again.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::package::Package;

const HASH_MARKER: &str = ".package-hash";

/// Working directory name for a package version.
pub fn working_dir_name(package: &Package) -> String {
    format!("{}-{}", package.id, package.version)
}

/// Stage `package` under `modules_root`, returning the working directory.
///
/// Copies into a sibling `.staging` directory first and renames it into
/// place, so a crash mid-copy never leaves a half-populated working dir.
pub async fn stage(package: &Package, modules_root: &Path) -> Result<PathBuf> {
    let target = modules_root.join(working_dir_name(package));
    let hash = package.hash();
    if tokio::fs::try_exists(&target).await? {
        let staged_hash = tokio::fs::read_to_string(target.join(HASH_MARKER))
            .await
            .unwrap_or_default();
        if staged_hash == hash {
            tracing::debug!(package = %package.key(), path = %target.display(), "already staged");
            return Ok(target);
        }
        tracing::debug!(package = %package.key(), "staged copy is stale, restaging");
        tokio::fs::remove_dir_all(&target).await?;
    }

    let scratch = modules_root.join(format!("{}.staging", working_dir_name(package)));
    if tokio::fs::try_exists(&scratch).await? {
        tokio::fs::remove_dir_all(&scratch).await?;
    }

    let copied = copy_dir(&package.dist_dir(), &scratch).await?;
    tokio::fs::write(scratch.join(HASH_MARKER), &hash).await?;
    tokio::fs::rename(&scratch, &target).await?;

    tracing::info!(
        package = %package.key(),
        path = %target.display(),
        files = copied,
        "package staged"
    );
    Ok(target)
}

/// Recursively copy `from` into `to`, returning the number of files copied.
pub(crate) async fn copy_dir(from: &Path, to: &Path) -> Result<usize> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    let mut copied = 0;

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let dest = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((path, dest));
            } else {
                tokio::fs::copy(&path, &dest).await?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}
