use std::path::PathBuf;
use sync_proto::manifest::normalize_path;
use sync_proto::SyncMode;

pub const DEFAULT_PORT: u16 = 25564;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Directory that manifest `sourcePath`s are relative to.
    pub source_root: PathBuf,
    pub sync_dirs: Vec<SyncDirSpec>,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".into()));

        Self {
            port: get("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("manifest-sync.db")),
            data_dir,
            source_root: PathBuf::from(get("SOURCE_ROOT").unwrap_or_else(|| ".".into())),
            sync_dirs: get("SYNC_DIRS")
                .map(|raw| parse_sync_dirs(&raw))
                .unwrap_or_default(),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        }
    }
}

/// One configured sync directory: `targetPath:mode[:sourcePath...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDirSpec {
    pub target_path: String,
    pub mode: SyncMode,
    /// Server directories (relative to the source root) feeding this target.
    pub source_paths: Vec<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SyncDirError {
    #[error("expected targetPath:mode[:sourcePath...]")]
    MissingMode,

    #[error("target path is empty")]
    MissingTarget,

    #[error("unknown mode '{0}', expected 'mirror' or 'push'")]
    UnknownMode(String),
}

impl SyncDirSpec {
    pub fn parse(entry: &str) -> Result<Self, SyncDirError> {
        let mut fields = entry.trim().split(':');
        let target = fields.next().map(str::trim).unwrap_or_default();
        let mode = fields.next().map(str::trim).ok_or(SyncDirError::MissingMode)?;

        let target_path = clean_dir(target);
        if target_path.is_empty() {
            return Err(SyncDirError::MissingTarget);
        }
        let mode: SyncMode = mode
            .parse()
            .map_err(|_| SyncDirError::UnknownMode(mode.to_string()))?;

        let mut source_paths: Vec<String> = fields
            .map(clean_dir)
            .filter(|source| !source.is_empty())
            .collect();
        if source_paths.is_empty() {
            source_paths.push(target_path.clone());
        }

        Ok(Self {
            target_path,
            mode,
            source_paths,
        })
    }
}

/// Parse a comma-separated `SYNC_DIRS` value, skipping invalid entries.
pub fn parse_sync_dirs(raw: &str) -> Vec<SyncDirSpec> {
    raw.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .filter_map(|entry| match SyncDirSpec::parse(entry) {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!("Ignoring sync dir '{}': {}", entry.trim(), e);
                None
            }
        })
        .collect()
}

/// Normalize a configured directory; `.` names the root itself.
fn clean_dir(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    match normalize_path(raw) {
        dir if dir.is_empty() => ".".to_string(),
        dir => dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full_entry() {
        let spec = SyncDirSpec::parse("mods:mirror:clientmods:extra/").unwrap();
        assert_eq!(spec.target_path, "mods");
        assert_eq!(spec.mode, SyncMode::Mirror);
        assert_eq!(spec.source_paths, vec!["clientmods", "extra"]);
    }

    #[test]
    fn test_root_target() {
        let spec = SyncDirSpec::parse(".:mirror:pack/").unwrap();
        assert_eq!(spec.target_path, ".");
        assert_eq!(spec.source_paths, vec!["pack"]);

        let spec = SyncDirSpec::parse("./:push").unwrap();
        assert_eq!(spec.target_path, ".");
        assert_eq!(spec.source_paths, vec!["."]);
    }

    #[test]
    fn test_source_defaults_to_target() {
        let spec = SyncDirSpec::parse("config:push").unwrap();
        assert_eq!(spec.mode, SyncMode::Push);
        assert_eq!(spec.source_paths, vec!["config"]);
    }

    #[test]
    fn test_invalid_entries() {
        assert_eq!(SyncDirSpec::parse("mods"), Err(SyncDirError::MissingMode));
        assert_eq!(SyncDirSpec::parse(":mirror"), Err(SyncDirError::MissingTarget));
        assert_eq!(
            SyncDirSpec::parse("mods:sparse"),
            Err(SyncDirError::UnknownMode("sparse".to_string()))
        );
    }

    #[test]
    fn test_parse_sync_dirs_skips_invalid() {
        let specs = parse_sync_dirs("mods:mirror, bad ,config:push:cfg,");
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].target_path, "mods");
        assert_eq!(specs[1].source_paths, vec!["cfg"]);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(|_| None);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.db_path, PathBuf::from("./data").join("manifest-sync.db"));
        assert_eq!(config.source_root, PathBuf::from("."));
        assert!(config.sync_dirs.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PORT", "4000"),
            ("DATA_DIR", "/srv/sync"),
            ("SYNC_DIRS", "mods:mirror"),
        ]);
        let config = AppConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.port, 4000);
        assert_eq!(config.db_path, PathBuf::from("/srv/sync/manifest-sync.db"));
        assert_eq!(config.sync_dirs.len(), 1);
    }
}
