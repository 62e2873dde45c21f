//! Integrity check: compare a manifest with the local tree.
//!
//! Produces the files to delete and the entries to download so the tree
//! converges to the manifest. Paths are compared as `/`-separated strings
//! relative to the sync root, hashes as exact lowercase hex.

use crate::fs::walker::walk_files;
use crate::session::PART_SUFFIX;
use crate::utils::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use sync_proto::hash::{hash_file, is_content_hash};
use sync_proto::manifest::{is_contained_path, normalize_path};
use sync_proto::{FileEntry, ManifestRecord, PathGroup, SyncMode};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Local files to remove, relative to the sync root
    pub to_delete: BTreeSet<String>,
    pub to_download: BTreeSet<FileEntry>,
}

impl IntegrityReport {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_download.is_empty()
    }

    /// Number of delete and download operations.
    pub fn total(&self) -> u64 {
        (self.to_delete.len() + self.to_download.len()) as u64
    }
}

/// Diff `manifest` against the tree under `root`.
///
/// Groups with an unrecognized mode or a target outside `root` are skipped,
/// as are entries with such a target or a malformed hash. Read errors abort
/// the check rather than being mistaken for missing files.
pub fn check(manifest: &ManifestRecord, root: &Path) -> Result<IntegrityReport> {
    check_excluding(manifest, root, &BTreeSet::new())
}

/// [`check`], never scheduling the `protected` paths (relative to `root`)
/// or in-progress `.part` downloads for deletion.
pub fn check_excluding(
    manifest: &ManifestRecord,
    root: &Path,
    protected: &BTreeSet<String>,
) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();
    let mut hashes = LocalHashes::new(root);

    for group in &manifest.groups {
        if let SyncMode::Unknown(ref mode) = group.mode {
            tracing::warn!(
                target_path = %group.target_path,
                "Skipping group with unknown sync mode '{}'",
                mode
            );
            continue;
        }
        if !is_contained_path(&group.target_path) {
            tracing::warn!(
                "Skipping group targeting '{}' outside the sync root",
                group.target_path
            );
            continue;
        }

        let entries = usable_entries(group);
        if group.mode == SyncMode::Mirror {
            prune_mirror(group, &entries, protected, &mut hashes, &mut report)?;
        }
        collect_downloads(&entries, &mut hashes, &mut report)?;
    }

    Ok(report)
}

/// Entries that can be applied under the sync root. Rejected entries are
/// mapped to `None` so mirror pruning still leaves their files alone.
fn usable_entries(group: &PathGroup) -> Vec<(String, Option<&FileEntry>)> {
    group
        .files
        .iter()
        .filter_map(|entry| {
            if !is_contained_path(&entry.target_path) {
                tracing::warn!(
                    "Ignoring '{}': target outside the sync root",
                    entry.target_path
                );
                return None;
            }
            let relative = normalize_path(&entry.target_path);
            if !is_content_hash(&entry.content_hash) {
                tracing::warn!(
                    "Ignoring '{}': malformed hash '{}'",
                    entry.target_path,
                    entry.content_hash
                );
                return Some((relative, None));
            }
            Some((relative, Some(entry)))
        })
        .collect()
}

/// Schedule every local file under a mirror group's target for deletion
/// unless the group lists it with the same hash.
fn prune_mirror(
    group: &PathGroup,
    entries: &[(String, Option<&FileEntry>)],
    protected: &BTreeSet<String>,
    hashes: &mut LocalHashes,
    report: &mut IntegrityReport,
) -> Result<()> {
    let target_dir = normalize_path(&group.target_path);
    let mut ignored = HashSet::new();
    let mut expected = HashMap::new();
    for (relative, entry) in entries {
        match entry {
            Some(entry) => {
                expected.insert(relative.as_str(), entry.content_hash.as_str());
            }
            None => {
                ignored.insert(relative.as_str());
            }
        }
    }

    for file in walk_files(&hashes.root.join(&target_dir))? {
        let relative = if target_dir.is_empty() {
            file.relative_path
        } else {
            normalize_path(&format!("{target_dir}/{}", file.relative_path))
        };
        if protected.contains(&relative)
            || ignored.contains(relative.as_str())
            || relative.ends_with(PART_SUFFIX)
        {
            continue;
        }

        let keep = match expected.get(relative.as_str()) {
            Some(hash) => hashes.get(&relative)? == *hash,
            None => false,
        };
        if !keep {
            report.to_delete.insert(relative);
        }
    }

    Ok(())
}

fn collect_downloads(
    entries: &[(String, Option<&FileEntry>)],
    hashes: &mut LocalHashes,
    report: &mut IntegrityReport,
) -> Result<()> {
    for (relative, entry) in entries {
        let Some(entry) = entry else { continue };
        let current = hashes.root.join(relative).is_file();
        if !current || hashes.get(relative)? != entry.content_hash {
            report.to_download.insert((*entry).clone());
        }
    }
    Ok(())
}

/// Hashes of local files, computed at most once per check.
struct LocalHashes<'a> {
    root: &'a Path,
    cache: HashMap<String, String>,
}

impl<'a> LocalHashes<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            cache: HashMap::new(),
        }
    }

    fn get(&mut self, relative: &str) -> Result<String> {
        if let Some(hash) = self.cache.get(relative) {
            return Ok(hash.clone());
        }
        let hash = hash_file(&self.root.join(relative))?;
        self.cache.insert(relative.to_string(), hash.clone());
        Ok(hash)
    }
}
