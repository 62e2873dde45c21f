//! Versioned manifest model.
//!
//! Field names on the wire and in storage follow the established JSON layout:
//! `{"version","time","description","paths":[{"model","targetPath","files":[...]}]}`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Timestamp format of [`ManifestRecord::time`].
pub const TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Current local time rendered in [`TIME_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

/// A versioned declaration of the files clients should converge to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub version: String,
    pub time: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "paths", default)]
    pub groups: Vec<PathGroup>,
}

impl ManifestRecord {
    /// Whether any group lists `source_path`.
    pub fn lists_source(&self, source_path: &str) -> bool {
        self.groups
            .iter()
            .flat_map(|group| group.files.iter())
            .any(|file| file.source_path == source_path)
    }

    /// Total number of file entries across all groups.
    pub fn file_count(&self) -> usize {
        self.groups.iter().map(|group| group.files.len()).sum()
    }

    /// Render a manifest reply body. `None` becomes `{}`.
    pub fn to_reply(record: Option<&ManifestRecord>) -> serde_json::Result<String> {
        match record {
            Some(record) => serde_json::to_string(record),
            None => Ok("{}".to_string()),
        }
    }

    /// Parse a manifest reply body. `{}` means no manifest was found.
    pub fn from_reply(body: &str) -> serde_json::Result<Option<ManifestRecord>> {
        let value: serde_json::Value = serde_json::from_str(body)?;
        match value.as_object() {
            Some(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value).map(Some),
        }
    }
}

/// A mode-tagged set of files sharing a client target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathGroup {
    #[serde(rename = "model")]
    pub mode: SyncMode,
    #[serde(rename = "targetPath")]
    pub target_path: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One authoritative file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileEntry {
    /// Server-relative path, the key of a file request.
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    /// Client-relative destination.
    #[serde(rename = "targetPath")]
    pub target_path: String,
    #[serde(rename = "md5")]
    pub content_hash: String,
}

/// How a group is applied on the client.
///
/// Unrecognized mode strings survive a round trip as [`SyncMode::Unknown`] so
/// a manifest written by newer code still loads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SyncMode {
    /// Add/update listed files and delete everything else under the target.
    Mirror,
    /// Add/update listed files, tolerate extra local files.
    Push,
    Unknown(String),
}

impl SyncMode {
    pub fn as_str(&self) -> &str {
        match self {
            SyncMode::Mirror => "mirror",
            SyncMode::Push => "push",
            SyncMode::Unknown(other) => other,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SyncMode::Unknown(_))
    }
}

impl From<String> for SyncMode {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "mirror" => SyncMode::Mirror,
            "push" => SyncMode::Push,
            _ => SyncMode::Unknown(value),
        }
    }
}

impl From<SyncMode> for String {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

/// Strict parse used for configuration: unknown modes are rejected.
impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match SyncMode::from(s.to_string()) {
            SyncMode::Unknown(other) => Err(format!(
                "unknown sync mode '{}', expected 'mirror' or 'push'",
                other
            )),
            mode => Ok(mode),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a path for comparison: forward slashes, no `.` or empty
/// components. A leading `/` is kept, so `"."` and `""` both become `""`.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    let joined = parts.join("/");
    if path.starts_with(['/', '\\']) {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Whether `path` resolves below the directory it is joined to: not
/// absolute, no drive prefix and no `..` component.
pub fn is_contained_path(path: &str) -> bool {
    let normalized = normalize_path(path);
    !normalized.starts_with('/')
        && !normalized
            .split('/')
            .any(|part| part == ".." || part.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ManifestRecord {
        ManifestRecord {
            version: "1.0".to_string(),
            time: "2025-01-02_03:04:05".to_string(),
            description: "first".to_string(),
            groups: vec![PathGroup {
                mode: SyncMode::Mirror,
                target_path: "mods".to_string(),
                files: vec![FileEntry {
                    source_path: "clientmods/a.jar".to_string(),
                    target_path: "mods/a.jar".to_string(),
                    content_hash: "900150983cd24fb0d6963f7d28e17f72".to_string(),
                }],
            }],
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"paths\""));
        assert!(json.contains("\"model\":\"mirror\""));
        assert!(json.contains("\"targetPath\":\"mods\""));
        assert!(json.contains("\"sourcePath\":\"clientmods/a.jar\""));
        assert!(json.contains("\"md5\""));
    }

    #[test]
    fn test_unknown_mode_is_preserved() {
        let json = r#"{"model":"sparse","targetPath":"x","files":[]}"#;
        let group: PathGroup = serde_json::from_str(json).unwrap();
        assert_eq!(group.mode, SyncMode::Unknown("sparse".to_string()));
        assert!(!group.mode.is_known());

        let back = serde_json::to_string(&group).unwrap();
        assert!(back.contains("\"model\":\"sparse\""));
    }

    #[test]
    fn test_strict_mode_parse() {
        assert_eq!("mirror".parse::<SyncMode>().unwrap(), SyncMode::Mirror);
        assert_eq!("push".parse::<SyncMode>().unwrap(), SyncMode::Push);
        assert_eq!("MIRROR".parse::<SyncMode>().unwrap(), SyncMode::Mirror);
        assert!("sparse".parse::<SyncMode>().is_err());
    }

    #[test]
    fn test_empty_reply_means_absent() {
        assert_eq!(ManifestRecord::from_reply("{}").unwrap(), None);
        assert_eq!(ManifestRecord::to_reply(None).unwrap(), "{}");
    }

    #[test]
    fn test_reply_carries_record() {
        let record = sample();
        let body = ManifestRecord::to_reply(Some(&record)).unwrap();
        assert_eq!(ManifestRecord::from_reply(&body).unwrap(), Some(record));
    }

    #[test]
    fn test_reply_rejects_garbage() {
        assert!(ManifestRecord::from_reply("not json").is_err());
        assert!(ManifestRecord::from_reply(r#"{"version":1}"#).is_err());
    }

    #[test]
    fn test_lists_source() {
        let record = sample();
        assert!(record.lists_source("clientmods/a.jar"));
        assert!(!record.lists_source("mods/a.jar"));
        assert_eq!(record.file_count(), 1);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("mods\\a.jar"), "mods/a.jar");
        assert_eq!(normalize_path("./mods/a.jar"), "mods/a.jar");
        assert_eq!(normalize_path("mods/a.jar"), "mods/a.jar");
        assert_eq!(normalize_path("mods//lib/./a.jar"), "mods/lib/a.jar");
        assert_eq!(normalize_path("mods/"), "mods");
        assert_eq!(normalize_path("."), "");
        assert_eq!(normalize_path("./"), "");
        assert_eq!(normalize_path("/srv/files"), "/srv/files");
    }

    #[test]
    fn test_contained_paths() {
        assert!(is_contained_path("mods/a.jar"));
        assert!(is_contained_path("./a.txt"));
        assert!(is_contained_path("."));
        assert!(!is_contained_path("/etc/passwd"));
        assert!(!is_contained_path("\\server\\share"));
        assert!(!is_contained_path("mods/../../outside"));
        assert!(!is_contained_path("C:\\Windows\\a.dll"));
    }

    #[test]
    fn test_timestamp_format() {
        let now = timestamp_now();
        assert!(chrono::NaiveDateTime::parse_from_str(&now, TIME_FORMAT).is_ok());
    }
}
