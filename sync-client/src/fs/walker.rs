//! Directory traversal for integrity checks.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path below the walked directory, `/`-separated
    pub relative_path: String,
}

/// Collect every regular file below `root`, sorted by path.
///
/// A missing `root` yields no files. Symlinks are not followed.
pub fn walk_files(root: &Path) -> io::Result<Vec<FileInfo>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        files.push(FileInfo {
            path: entry.path().to_path_buf(),
            relative_path: slash_path(relative),
        });
    }

    Ok(files)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
