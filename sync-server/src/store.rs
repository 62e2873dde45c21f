//! Async facade over the manifest table.
//!
//! Reads check out pooled connections concurrently; writes are serialized
//! through one store-wide lock. All SQLite work runs on the blocking pool.

use crate::db::connection::{create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::manifest;
use anyhow::anyhow;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use sync_proto::{ManifestRecord, PathGroup};

#[derive(Clone)]
pub struct ManifestStore {
    db: DbPool,
    write_lock: Arc<Mutex<()>>,
}

impl ManifestStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Open (creating if needed) the database at `db_path` and migrate it.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let db = create_pool(db_path)?;
        migrate(&db)?;
        Ok(Self::new(db))
    }

    pub fn pool(&self) -> &DbPool {
        &self.db
    }

    /// Store a new record. `Ok(false)` if the version already exists.
    pub async fn add(&self, record: ManifestRecord) -> anyhow::Result<bool> {
        self.write(move |conn| manifest::insert(conn, &record)).await
    }

    /// Replace time and description; groups are kept when `groups` is `None`.
    /// `Ok(false)` if the version does not exist.
    pub async fn edit(
        &self,
        version: &str,
        time: &str,
        description: &str,
        groups: Option<Vec<PathGroup>>,
    ) -> anyhow::Result<bool> {
        let (version, time, description) =
            (version.to_string(), time.to_string(), description.to_string());
        self.write(move |conn| {
            manifest::update(conn, &version, &time, &description, groups.as_deref())
        })
        .await
    }

    /// `Ok(false)` if no such version was stored.
    pub async fn remove(&self, version: &str) -> anyhow::Result<bool> {
        let version = version.to_string();
        self.write(move |conn| manifest::delete(conn, &version)).await
    }

    /// Delete the most recent record, returning its version.
    pub async fn remove_latest(&self) -> anyhow::Result<Option<String>> {
        self.write(|conn| {
            let Some(latest) = manifest::find_latest(conn)? else {
                return Ok(None);
            };
            manifest::delete(conn, &latest.version)?;
            Ok(Some(latest.version))
        })
        .await
    }

    /// Delete every record, returning how many were removed.
    pub async fn clear(&self) -> anyhow::Result<usize> {
        self.write(manifest::delete_all).await
    }

    pub async fn get_by_version(&self, version: &str) -> anyhow::Result<Option<ManifestRecord>> {
        let version = version.to_string();
        self.read(move |conn| manifest::find_by_version(conn, &version))
            .await
    }

    pub async fn get_latest(&self) -> anyhow::Result<Option<ManifestRecord>> {
        self.read(manifest::find_latest).await
    }

    /// Versions, most recent first.
    pub async fn list_versions(&self) -> anyhow::Result<Vec<String>> {
        self.read(manifest::find_versions).await
    }

    /// Full records, most recent first.
    pub async fn list_records(&self) -> anyhow::Result<Vec<ManifestRecord>> {
        self.read(manifest::find_all).await
    }

    async fn read<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| anyhow!(e))?
    }

    async fn write<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let lock = self.write_lock.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock
                .lock()
                .map_err(|_| anyhow!("Manifest store write lock poisoned"))?;
            let conn = db.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| anyhow!(e))?
    }
}
