//! The locally remembered manifest version.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone)]
pub struct VersionFile {
    path: PathBuf,
}

impl VersionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staging file used while replacing the stored version.
    pub fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    /// The stored version, or `None` if nothing was applied yet.
    pub async fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let version = contents.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace the stored version through a temporary file and rename.
    pub async fn write(&self, version: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, version).await?;
        fs::rename(&tmp, &self.path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let file = VersionFile::new(dir.path().join(".sync-version"));
        assert_eq!(file.read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let file = VersionFile::new(dir.path().join("state/.sync-version"));

        file.write("1.0").await.unwrap();
        assert_eq!(file.read().await.unwrap(), Some("1.0".to_string()));

        file.write("1.1").await.unwrap();
        assert_eq!(file.read().await.unwrap(), Some("1.1".to_string()));
        assert!(!file.tmp_path().exists());
        assert_eq!(file.tmp_path(), dir.path().join("state/.sync-version.tmp"));
    }

    #[tokio::test]
    async fn test_blank_file_reads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".sync-version");
        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(VersionFile::new(path).read().await.unwrap(), None);
    }
}
