//! Script Loading
//!
//! Filesystem side of the host interface: reading script files and walking
//! script directories.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;
use walkdir::WalkDir;

use crate::error::{BindError, BindResult};

/// Read a script file
pub(crate) fn read_script(path: &Path) -> BindResult<String> {
    if !path.is_file() {
        return Err(BindError::host_load(path, "no such file"));
    }
    fs::read_to_string(path).map_err(|err| BindError::host_load(path, err))
}

/// Chunk name used for a file, as it appears in tracebacks
pub(crate) fn chunk_name(prefix: &str, path: &Path) -> String {
    format!("{}{}", prefix, path.display())
}

/// Collect the scripts under `dir` in sorted path order.
///
/// Only files with `extension` are picked up (every file when `None`).
/// Subdirectories are walked only when `recurse` is set. Symbolic links are
/// followed; a link leading back into one of its ancestors is skipped, so
/// every script is collected once.
pub(crate) fn collect_scripts(
    dir: &Path,
    extension: Option<&str>,
    recurse: bool,
) -> BindResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BindError::host_load(dir, "not a directory"));
    }

    let mut walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if !recurse {
        walker = walker.max_depth(1);
    }

    let mut scripts = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.loop_ancestor().is_some() => {
                trace!(path = ?err.path(), "skipped directory loop");
                continue;
            }
            Err(err) => {
                let path = err.path().unwrap_or(dir).to_path_buf();
                return Err(BindError::host_load(&path, err));
            }
        };
        if entry.file_type().is_file() && matches_extension(entry.path(), extension) {
            scripts.push(entry.into_path());
        }
    }
    trace!(dir = %dir.display(), count = scripts.len(), "collected scripts");
    Ok(scripts)
}

fn matches_extension(path: &Path, extension: Option<&str>) -> bool {
    match extension {
        None => true,
        Some(wanted) => path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == wanted)
            .unwrap_or(false),
    }
}
