//! Update pass: fetch a manifest, diff the local tree, delete and download
//! until it matches, then remember the applied version.

use crate::integrity::{self, IntegrityReport};
use crate::session::Session;
use crate::transfer::progress::format_bytes;
use crate::utils::{ClientError, Result};
use crate::version::VersionFile;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use sync_proto::manifest::normalize_path;
use sync_proto::ManifestRecord;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate { version: String },
    Outdated { local: Option<String>, latest: String },
    /// The server has no manifest at all
    NoManifest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub version: String,
    pub deleted: u64,
    pub downloaded: u64,
    pub failures: u64,
    /// Whether the local version now equals `version`
    pub advanced: bool,
}

#[derive(Clone)]
pub struct Updater {
    session: Session,
    root: PathBuf,
    version_file: VersionFile,
}

impl Updater {
    pub fn new(session: Session, root: impl Into<PathBuf>, version_file: VersionFile) -> Self {
        Self {
            session,
            root: root.into(),
            version_file,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compare the server's latest version with the local one.
    pub async fn check(&self) -> Result<UpdateStatus> {
        let Some(latest) = self.session.request_manifest(None).await? else {
            return Ok(UpdateStatus::NoManifest);
        };
        let local = self.version_file.read().await?;

        if local.as_deref() == Some(latest.version.as_str()) {
            Ok(UpdateStatus::UpToDate {
                version: latest.version,
            })
        } else {
            Ok(UpdateStatus::Outdated {
                local,
                latest: latest.version,
            })
        }
    }

    /// Fetch a manifest (latest when `version` is `None`) and diff the tree.
    pub async fn plan(&self, version: Option<&str>) -> Result<(ManifestRecord, IntegrityReport)> {
        let manifest = self
            .session
            .request_manifest(version)
            .await?
            .ok_or(ClientError::ManifestNotFound)?;

        let root = self.root.clone();
        let checked = manifest.clone();
        let protected = self.protected_paths();
        let report = tokio::task::spawn_blocking(move || {
            integrity::check_excluding(&checked, &root, &protected)
        })
        .await
        .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;

        Ok((manifest, report))
    }

    /// Client state files inside the sync root, kept out of mirror pruning.
    fn protected_paths(&self) -> BTreeSet<String> {
        [self.version_file.path().to_path_buf(), self.version_file.tmp_path()]
            .iter()
            .filter_map(|path| path.strip_prefix(&self.root).ok())
            .map(|relative| normalize_path(&relative.to_string_lossy()))
            .collect()
    }

    /// Run a full pass. Individual failures are counted, not fatal; the
    /// local version only advances when every download succeeded.
    pub async fn run(&self, version: Option<&str>) -> Result<UpdateOutcome> {
        let (manifest, report) = self.plan(version).await?;
        let progress = self.session.progress();
        progress.start(report.total());

        tracing::info!(
            version = %manifest.version,
            "Update pass: {} to delete, {} to download",
            report.to_delete.len(),
            report.to_download.len()
        );

        let mut deleted = 0;
        for relative in &report.to_delete {
            let path = self.root.join(relative);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::debug!("Deleted {}", relative);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to delete {}: {}", path.display(), e),
            }
            progress.advance();
        }

        let mut downloaded = 0;
        for entry in &report.to_download {
            let dest = self.root.join(normalize_path(&entry.target_path));
            let result = match self.session.request_file(&entry.source_path, &dest).await {
                Ok(download) if download.content_hash == entry.content_hash => Ok(download),
                Ok(download) => Err(ClientError::HashMismatch {
                    path: dest.clone(),
                    expected: entry.content_hash.clone(),
                    actual: download.content_hash,
                }),
                Err(e) => Err(e),
            };

            match result {
                Ok(download) => {
                    downloaded += 1;
                    tracing::info!(
                        "Downloaded {} ({})",
                        entry.target_path,
                        format_bytes(download.bytes)
                    );
                }
                Err(e) => {
                    progress.record_failure();
                    tracing::warn!("Failed to download {}: {}", entry.source_path, e);
                }
            }
            progress.advance();
        }

        let failures = progress.failures();
        let advanced = failures == 0;
        progress.finish();
        if advanced {
            self.version_file.write(&manifest.version).await?;
            tracing::info!("Local version is now {}", manifest.version);
        } else {
            tracing::warn!(
                "{} downloads failed, keeping the local version unchanged",
                failures
            );
        }

        Ok(UpdateOutcome {
            version: manifest.version,
            deleted,
            downloaded,
            failures,
            advanced,
        })
    }

    /// Run the pass on a background task.
    pub fn spawn(self, version: Option<String>) -> JoinHandle<Result<UpdateOutcome>> {
        tokio::spawn(async move { self.run(version.as_deref()).await })
    }
}
