//! Builds manifest groups by scanning the configured sync directories.

use crate::config::SyncDirSpec;
use anyhow::Context;
use std::path::Path;
use sync_proto::hash::hash_file;
use sync_proto::{FileEntry, PathGroup};
use walkdir::WalkDir;

/// Scan every sync dir under `source_root`, hashing each regular file.
///
/// A missing source directory contributes no files, and a file removed while
/// scanning is skipped. Any other read failure aborts the scan.
pub fn scan_sync_dirs(specs: &[SyncDirSpec], source_root: &Path) -> anyhow::Result<Vec<PathGroup>> {
    let mut groups = Vec::with_capacity(specs.len());

    for spec in specs {
        let mut files = Vec::new();
        for source in &spec.source_paths {
            scan_source(spec, source, source_root, &mut files)?;
        }
        tracing::debug!(
            target_path = %spec.target_path,
            mode = %spec.mode,
            "Scanned {} files",
            files.len()
        );

        groups.push(PathGroup {
            mode: spec.mode.clone(),
            target_path: spec.target_path.clone(),
            files,
        });
    }

    Ok(groups)
}

fn scan_source(
    spec: &SyncDirSpec,
    source: &str,
    source_root: &Path,
    files: &mut Vec<FileEntry>,
) -> anyhow::Result<()> {
    let dir = source_root.join(source);
    if !dir.is_dir() {
        tracing::warn!("Sync source {} does not exist, skipping", dir.display());
        return Ok(());
    }

    let walker = WalkDir::new(&dir).sort_by_file_name();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let suffix = slash_path(entry.path().strip_prefix(&dir)?);
        let content_hash = match hash_file(entry.path()) {
            Ok(hash) => hash,
            Err(e) if e.is_not_found() => {
                tracing::warn!("{} vanished during scan, skipping", entry.path().display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        files.push(FileEntry {
            source_path: format!("{source}/{suffix}"),
            target_path: format!("{}/{suffix}", spec.target_path),
            content_hash,
        });
    }

    Ok(())
}

/// Render a relative path with `/` separators on every platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
