//! Path helpers for file sinks and sources.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::SluiceResult;

/// Resolve `path` against the working directory a child will run in.
///
/// Absolute paths are returned unchanged. Relative paths are joined onto
/// `cwd` when one is configured, otherwise they stay relative to the
/// current process.
#[must_use]
pub fn resolve_in(cwd: Option<&Path>, path: &Path) -> PathBuf {
    match cwd {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Make sure a file can be created at `path`.
///
/// Every missing ancestor directory is created. Any non-directory found where
/// an ancestor directory should be (a regular file, a dangling symlink) is
/// removed first.
pub async fn clear_path_for(path: &Path) -> SluiceResult<()> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };

    let mut ancestors: Vec<&Path> = parent
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    ancestors.reverse();

    for dir in ancestors {
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                tracing::debug!(path = %dir.display(), "Removing file in the way of output directory");
                tokio::fs::remove_file(dir).await?;
                break;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Dangling symlinks report NotFound through metadata()
                if tokio::fs::symlink_metadata(dir).await.is_ok() {
                    tokio::fs::remove_file(dir).await?;
                }
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    tokio::fs::create_dir_all(parent).await?;
    Ok(())
}
