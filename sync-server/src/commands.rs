//! Operator commands over the manifest store.
//!
//! Every command reports a [`CommandResult`]; storage failures become a
//! failed result with the error text, never a panic.

use crate::commit::scan_sync_dirs;
use crate::state::AppState;
use std::fmt::Write;
use std::path::Path;
use sync_proto::manifest::timestamp_now;
use sync_proto::{ManifestRecord, PathGroup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Snapshot the sync dirs as a new version.
pub async fn commit(state: &AppState, version: &str, description: &str) -> CommandResult {
    let version = version.trim();
    if version.is_empty() {
        return CommandResult::fail("Version must not be empty");
    }

    let groups = match scan(state).await {
        Ok(groups) => groups,
        Err(e) => return CommandResult::fail(format!("Failed to scan sync dirs: {e:#}")),
    };

    let record = ManifestRecord {
        version: version.to_string(),
        time: timestamp_now(),
        description: resolve_description(description),
        groups,
    };
    let file_count = record.file_count();

    match state.store.add(record).await {
        Ok(true) => CommandResult::ok(format!("Committed version {version} ({file_count} files)")),
        Ok(false) => CommandResult::fail("Version already exists"),
        Err(e) => CommandResult::fail(format!("Failed to store version {version}: {e:#}")),
    }
}

/// Every stored version, most recent first.
pub async fn list(state: &AppState) -> CommandResult {
    let records = match state.store.list_records().await {
        Ok(records) => records,
        Err(e) => return CommandResult::fail(format!("Failed to list versions: {e:#}")),
    };
    if records.is_empty() {
        return CommandResult::ok("No versions stored");
    }

    let mut out = String::from("Versions:");
    for record in &records {
        let _ = write!(
            out,
            "\n  {} - {} - {}",
            record.version, record.time, record.description
        );
    }
    CommandResult::ok(out)
}

pub async fn show(state: &AppState, version: &str) -> CommandResult {
    match state.store.get_by_version(version).await {
        Ok(Some(record)) => CommandResult::ok(describe(&record)),
        Ok(None) => not_found(version),
        Err(e) => CommandResult::fail(format!("Failed to read version {version}: {e:#}")),
    }
}

/// New timestamp and description; groups are kept.
pub async fn edit(state: &AppState, version: &str, description: &str) -> CommandResult {
    let description = resolve_description(description);
    match state
        .store
        .edit(version, &timestamp_now(), &description, None)
        .await
    {
        Ok(true) => CommandResult::ok(format!("Updated version {version}")),
        Ok(false) => not_found(version),
        Err(e) => CommandResult::fail(format!("Failed to update version {version}: {e:#}")),
    }
}

/// Replace a version's groups with a fresh scan, keeping its description.
pub async fn rescan(state: &AppState, version: &str) -> CommandResult {
    let existing = match state.store.get_by_version(version).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found(version),
        Err(e) => return CommandResult::fail(format!("Failed to read version {version}: {e:#}")),
    };
    let groups = match scan(state).await {
        Ok(groups) => groups,
        Err(e) => return CommandResult::fail(format!("Failed to scan sync dirs: {e:#}")),
    };
    let file_count: usize = groups.iter().map(|g| g.files.len()).sum();

    match state
        .store
        .edit(version, &timestamp_now(), &existing.description, Some(groups))
        .await
    {
        Ok(true) => CommandResult::ok(format!("Rescanned version {version} ({file_count} files)")),
        Ok(false) => not_found(version),
        Err(e) => CommandResult::fail(format!("Failed to update version {version}: {e:#}")),
    }
}

pub async fn delete(state: &AppState, version: &str) -> CommandResult {
    match state.store.remove(version).await {
        Ok(true) => CommandResult::ok(format!("Deleted version {version}")),
        Ok(false) => not_found(version),
        Err(e) => CommandResult::fail(format!("Failed to delete version {version}: {e:#}")),
    }
}

pub async fn delete_latest(state: &AppState) -> CommandResult {
    match state.store.remove_latest().await {
        Ok(Some(version)) => CommandResult::ok(format!("Deleted latest version {version}")),
        Ok(None) => CommandResult::fail("No versions to delete"),
        Err(e) => CommandResult::fail(format!("Failed to delete latest version: {e:#}")),
    }
}

pub async fn clear(state: &AppState) -> CommandResult {
    match state.store.clear().await {
        Ok(count) => CommandResult::ok(format!("Cleared {count} versions")),
        Err(e) => CommandResult::fail(format!("Failed to clear versions: {e:#}")),
    }
}

async fn scan(state: &AppState) -> anyhow::Result<Vec<PathGroup>> {
    let specs = state.config.sync_dirs.clone();
    let source_root = state.config.source_root.clone();
    tokio::task::spawn_blocking(move || scan_sync_dirs(&specs, &source_root))
        .await
        .map_err(|e| anyhow::anyhow!(e))?
}

/// A description naming an existing file is replaced by the file's contents;
/// otherwise literal `\n` sequences become line breaks.
pub fn resolve_description(raw: &str) -> String {
    let path = Path::new(raw);
    if !raw.is_empty() && path.is_file() {
        match std::fs::read_to_string(path) {
            Ok(contents) => return contents,
            Err(e) => tracing::warn!("Failed to read description file {}: {}", raw, e),
        }
    }
    raw.replace("\\n", "\n")
}

fn describe(record: &ManifestRecord) -> String {
    let mut out = format!(
        "Version {} ({})\n{}",
        record.version, record.time, record.description
    );
    for group in &record.groups {
        let files = group
            .files
            .iter()
            .map(|f| format!("({}, {}, {})", f.target_path, f.source_path, f.content_hash))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = write!(out, "\n{} - {}: [{}]", group.target_path, group.mode, files);
    }
    out
}

fn not_found(version: &str) -> CommandResult {
    CommandResult::fail(format!("Version {version} not found"))
}
