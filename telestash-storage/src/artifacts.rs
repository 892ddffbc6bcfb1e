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

//! Telemetry artifact and identification blobs
//!
//! Span and log payloads are stored one file per id under
//! `otel-data/<kind>/<id>.dat`; the visitor identification blob lives under
//! `identification/<visitor_id>/`.

use crate::backend::StorageBackend;
use crate::files::BlobFiles;
use crate::paths::{StorageLayout, TELEMETRY_FILE_EXT};
use crate::quota::DirectorySizeCache;
use std::fs;
use std::sync::Arc;
use telestash_core::{Result, StorageError, TelemetryKind};

pub struct ArtifactRepository {
    layout: Arc<StorageLayout>,
    files: BlobFiles,
}

impl ArtifactRepository {
    pub fn new(
        layout: Arc<StorageLayout>,
        backend: Arc<dyn StorageBackend>,
        sizes: Arc<DirectorySizeCache>,
    ) -> Self {
        Self {
            layout,
            files: BlobFiles::new(backend, sizes),
        }
    }

    pub fn write_telemetry(&self, kind: TelemetryKind, id: &str, payload: &[u8]) -> Result<()> {
        let path = self.layout.telemetry_file(kind, id)?;
        self.files.write(&path, payload)
    }

    pub fn read_telemetry(&self, kind: TelemetryKind, id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.layout.telemetry_file(kind, id)?;
        self.files.read(&path)
    }

    pub fn delete_telemetry(&self, kind: TelemetryKind, id: &str) -> Result<bool> {
        let path = self.layout.telemetry_file(kind, id)?;
        self.files.delete(&path)
    }

    pub fn has_telemetry(&self, kind: TelemetryKind, id: &str) -> Result<bool> {
        Ok(self.layout.telemetry_file(kind, id)?.is_file())
    }

    /// Ids with a stored payload for `kind`, sorted
    pub fn telemetry_ids(&self, kind: TelemetryKind) -> Result<Vec<String>> {
        let dir = self.layout.telemetry_dir(kind)?;
        let entries = fs::read_dir(&dir)
            .map_err(|source| StorageError::io("listing telemetry", &dir, source))?;

        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != TELEMETRY_FILE_EXT {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_string)
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn write_identification(&self, visitor_id: &str, payload: &[u8]) -> Result<()> {
        let path = self.layout.identification_file(visitor_id)?;
        self.files.write(&path, payload)
    }

    pub fn read_identification(&self, visitor_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.layout.identification_file(visitor_id)?;
        self.files.read(&path)
    }

    /// Removes the visitor's whole identification directory
    pub fn delete_identification(&self, visitor_id: &str) -> Result<bool> {
        let path = self.layout.identification_file(visitor_id)?;
        let Some(dir) = path.parent() else {
            return Ok(false);
        };
        self.files.delete_tree(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendMode, LocalFsBackend};
    use std::time::Duration;
    use telestash_core::StorageConfig;
    use tempfile::TempDir;

    fn repository(temp_dir: &TempDir) -> ArtifactRepository {
        let config = StorageConfig::with_base_dir(temp_dir.path());
        let layout = Arc::new(StorageLayout::new(&config, BackendMode::Plain).unwrap());
        ArtifactRepository::new(
            layout,
            Arc::new(LocalFsBackend::new()),
            Arc::new(DirectorySizeCache::new(16, Duration::from_secs(60))),
        )
    }

    #[test]
    fn test_telemetry_is_scoped_by_kind() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        repo.write_telemetry(TelemetryKind::Span, "abc", b"span").unwrap();
        repo.write_telemetry(TelemetryKind::Log, "abc", b"log").unwrap();

        assert_eq!(repo.read_telemetry(TelemetryKind::Span, "abc").unwrap().unwrap(), b"span");
        assert_eq!(repo.read_telemetry(TelemetryKind::Log, "abc").unwrap().unwrap(), b"log");
        assert_eq!(repo.telemetry_ids(TelemetryKind::Span).unwrap(), vec!["abc"]);

        assert!(repo.delete_telemetry(TelemetryKind::Span, "abc").unwrap());
        assert!(!repo.has_telemetry(TelemetryKind::Span, "abc").unwrap());
        assert!(repo.has_telemetry(TelemetryKind::Log, "abc").unwrap());
        assert!(!repo.delete_telemetry(TelemetryKind::Span, "abc").unwrap());
    }

    #[test]
    fn test_identification_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        assert_eq!(repo.read_identification("visitor").unwrap(), None);
        repo.write_identification("visitor", b"device-1").unwrap();
        assert_eq!(repo.read_identification("visitor").unwrap().unwrap(), b"device-1");

        assert!(repo.delete_identification("visitor").unwrap());
        assert_eq!(repo.read_identification("visitor").unwrap(), None);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        assert!(repo.write_telemetry(TelemetryKind::Span, "../x", b"").is_err());
    }
}
