// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Versioned on-disk namespace
//!
//! ```text
//! <root_name>-<version>[e]/
//!   preferences/preferences.dat
//!   identification/<visitor_id>/identification.txt
//!   otel-data/<kind>/<id>.dat
//!   sessions/<session_id>/records/<index>/
//!       record.txt  metrics.txt  wireframe.txt
//!       video/ <frame>.jpg  video.mp4  config.txt
//! ```
//!
//! Namespace-level directories (the root, `preferences`, `identification`,
//! `otel-data/<kind>`, `sessions`) are created on access. Per-session and
//! per-record paths are pure: a session only comes into existence when a
//! record is written into it.

use crate::backend::BackendMode;
use std::fs;
use std::path::{Path, PathBuf};
use telestash_core::{FrameFormat, Result, StorageConfig, StorageError, TelemetryKind};

pub const PREFERENCES_DIR: &str = "preferences";
pub const PREFERENCES_FILE: &str = "preferences.dat";
pub const IDENTIFICATION_DIR: &str = "identification";
pub const IDENTIFICATION_FILE: &str = "identification.txt";
pub const OTEL_DATA_DIR: &str = "otel-data";
pub const TELEMETRY_FILE_EXT: &str = "dat";
pub const SESSIONS_DIR: &str = "sessions";
pub const RECORDS_DIR: &str = "records";
pub const VIDEO_DIR: &str = "video";
pub const VIDEO_FILE: &str = "video.mp4";
pub const VIDEO_CONFIG_FILE: &str = "config.txt";

/// Single-file blobs owned by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordBlob {
    Record,
    Metrics,
    Wireframe,
}

impl RecordBlob {
    pub fn file_name(&self) -> &'static str {
        match self {
            RecordBlob::Record => "record.txt",
            RecordBlob::Metrics => "metrics.txt",
            RecordBlob::Wireframe => "wireframe.txt",
        }
    }
}

/// Path layout under one version+mode root
#[derive(Debug, Clone)]
pub struct StorageLayout {
    base_dir: PathBuf,
    root: PathBuf,
    root_name: String,
    schema_version: u32,
    mode: BackendMode,
}

impl StorageLayout {
    /// Resolve the base directory and create the versioned root.
    ///
    /// Fails with [`StorageError::BaseDirUnavailable`] when no base directory
    /// is configured and the platform has no local data directory.
    pub fn new(config: &StorageConfig, mode: BackendMode) -> Result<Self> {
        let base_dir = match &config.base_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir().ok_or(StorageError::BaseDirUnavailable)?,
        };

        let root = base_dir.join(Self::root_dir_name(
            &config.root_name,
            config.schema_version,
            mode,
        ));
        fs::create_dir_all(&root)
            .map_err(|source| StorageError::io("creating storage root", &root, source))?;

        Ok(Self {
            base_dir,
            root,
            root_name: config.root_name.clone(),
            schema_version: config.schema_version,
            mode,
        })
    }

    pub fn root_dir_name(root_name: &str, schema_version: u32, mode: BackendMode) -> String {
        format!("{}-{}{}", root_name, schema_version, mode.root_suffix())
    }

    /// Inverse of [`Self::root_dir_name`]; `None` for names that are not a root
    pub fn parse_root_dir_name(root_name: &str, dir_name: &str) -> Option<(u32, BackendMode)> {
        let rest = dir_name.strip_prefix(root_name)?.strip_prefix('-')?;
        let (digits, mode) = match rest.strip_suffix('e') {
            Some(digits) => (digits, BackendMode::Encrypted),
            None => (rest, BackendMode::Plain),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(|version| (version, mode))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Sibling roots left behind by other schema versions or backend modes
    pub fn stale_roots(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|source| StorageError::io("listing base dir", &self.base_dir, source))?;

        let mut stale = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path == self.root || !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if Self::parse_root_dir_name(&self.root_name, name).is_some() {
                stale.push(path);
            }
        }
        stale.sort();
        Ok(stale)
    }

    pub fn preferences_file(&self) -> Result<PathBuf> {
        let dir = ensure_dir(self.root.join(PREFERENCES_DIR))?;
        Ok(dir.join(PREFERENCES_FILE))
    }

    pub fn identification_dir(&self) -> Result<PathBuf> {
        ensure_dir(self.root.join(IDENTIFICATION_DIR))
    }

    pub fn identification_file(&self, visitor_id: &str) -> Result<PathBuf> {
        validate_segment("visitor id", visitor_id)?;
        Ok(self
            .identification_dir()?
            .join(visitor_id)
            .join(IDENTIFICATION_FILE))
    }

    pub fn telemetry_dir(&self, kind: TelemetryKind) -> Result<PathBuf> {
        ensure_dir(self.root.join(OTEL_DATA_DIR).join(kind.as_str()))
    }

    pub fn telemetry_file(&self, kind: TelemetryKind, id: &str) -> Result<PathBuf> {
        validate_segment("telemetry id", id)?;
        Ok(self
            .telemetry_dir(kind)?
            .join(format!("{}.{}", id, TELEMETRY_FILE_EXT)))
    }

    pub fn sessions_dir(&self) -> Result<PathBuf> {
        ensure_dir(self.root.join(SESSIONS_DIR))
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        validate_segment("session id", session_id)?;
        Ok(self.root.join(SESSIONS_DIR).join(session_id))
    }

    pub fn records_dir(&self, session_id: &str) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(RECORDS_DIR))
    }

    pub fn record_dir(&self, session_id: &str, index: u32) -> Result<PathBuf> {
        Ok(self.records_dir(session_id)?.join(index.to_string()))
    }

    pub fn record_blob(&self, session_id: &str, index: u32, blob: RecordBlob) -> Result<PathBuf> {
        Ok(self.record_dir(session_id, index)?.join(blob.file_name()))
    }

    pub fn video_dir(&self, session_id: &str, index: u32) -> Result<PathBuf> {
        Ok(self.record_dir(session_id, index)?.join(VIDEO_DIR))
    }

    pub fn video_frame_file(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        format: FrameFormat,
    ) -> Result<PathBuf> {
        Ok(self
            .video_dir(session_id, index)?
            .join(format!("{}.{}", frame_index, format.extension())))
    }

    pub fn video_file(&self, session_id: &str, index: u32) -> Result<PathBuf> {
        Ok(self.video_dir(session_id, index)?.join(VIDEO_FILE))
    }

    pub fn video_config_file(&self, session_id: &str, index: u32) -> Result<PathBuf> {
        Ok(self.video_dir(session_id, index)?.join(VIDEO_CONFIG_FILE))
    }
}

/// Idempotent `create_dir_all` returning the directory
pub fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir)
        .map_err(|source| StorageError::io("creating directory", &dir, source))?;
    Ok(dir)
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|source| StorageError::io("creating parent directory", parent, source))?;
    }
    Ok(())
}

/// Identifiers become path components; reject anything that could escape
/// its directory.
pub fn validate_segment(what: &str, value: &str) -> Result<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidArgument(format!(
            "{} must be a single path segment, got {:?}",
            what, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(temp_dir: &TempDir, version: u32, mode: BackendMode) -> StorageLayout {
        let mut config = StorageConfig::with_base_dir(temp_dir.path());
        config.schema_version = version;
        StorageLayout::new(&config, mode).unwrap()
    }

    #[test]
    fn test_root_name_encodes_version_and_mode() {
        assert_eq!(
            StorageLayout::root_dir_name("telestash", 3, BackendMode::Plain),
            "telestash-3"
        );
        assert_eq!(
            StorageLayout::root_dir_name("telestash", 3, BackendMode::Encrypted),
            "telestash-3e"
        );
    }

    #[test]
    fn test_parse_root_dir_name() {
        assert_eq!(
            StorageLayout::parse_root_dir_name("telestash", "telestash-12e"),
            Some((12, BackendMode::Encrypted))
        );
        assert_eq!(
            StorageLayout::parse_root_dir_name("telestash", "telestash-1"),
            Some((1, BackendMode::Plain))
        );
        assert_eq!(StorageLayout::parse_root_dir_name("telestash", "telestash-"), None);
        assert_eq!(StorageLayout::parse_root_dir_name("telestash", "telestash-e"), None);
        assert_eq!(StorageLayout::parse_root_dir_name("telestash", "other-1"), None);
        assert_eq!(StorageLayout::parse_root_dir_name("telestash", "telestash-1x"), None);
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir, 2, BackendMode::Encrypted);
        assert!(layout.root().is_dir());
        assert_eq!(layout.root(), temp_dir.path().join("telestash-2e"));
    }

    #[test]
    fn test_namespace_dirs_are_created_on_access() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir, 1, BackendMode::Plain);

        let prefs = layout.preferences_file().unwrap();
        assert!(prefs.parent().unwrap().is_dir());
        assert!(!prefs.exists());

        let span = layout.telemetry_file(TelemetryKind::Span, "abc").unwrap();
        assert_eq!(span, layout.root().join("otel-data/span/abc.dat"));
        assert!(span.parent().unwrap().is_dir());

        assert!(layout.sessions_dir().unwrap().is_dir());
    }

    #[test]
    fn test_session_paths_are_pure() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir, 1, BackendMode::Plain);

        let frame = layout
            .video_frame_file("s1", 4, 2, FrameFormat::Jpeg)
            .unwrap();
        assert_eq!(
            frame,
            layout.root().join("sessions/s1/records/4/video/2.jpg")
        );
        assert!(!layout.session_dir("s1").unwrap().exists());
    }

    #[test]
    fn test_rejects_escaping_ids() {
        let temp_dir = TempDir::new().unwrap();
        let layout = layout(&temp_dir, 1, BackendMode::Plain);

        for bad in ["", ".", "..", "a/b", "a\\b"] {
            let err = layout.session_dir(bad).unwrap_err();
            assert_eq!(err.kind(), telestash_core::ErrorKind::InvalidArgument);
        }
    }

    #[test]
    fn test_stale_roots_excludes_current() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("telestash-1")).unwrap();
        fs::create_dir(temp_dir.path().join("telestash-2e")).unwrap();
        fs::create_dir(temp_dir.path().join("unrelated")).unwrap();
        fs::write(temp_dir.path().join("telestash-9"), b"file, not dir").unwrap();

        let layout = layout(&temp_dir, 2, BackendMode::Plain);
        let stale = layout.stale_roots().unwrap();

        assert_eq!(
            stale,
            vec![
                temp_dir.path().join("telestash-1"),
                temp_dir.path().join("telestash-2e"),
            ]
        );
    }
}
