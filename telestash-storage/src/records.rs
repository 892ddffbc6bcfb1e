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

//! Record Repository - session/record lifecycle on disk
//!
//! A session is a directory under `sessions/`; it exists as soon as its first
//! record is written and disappears with a recursive delete. Each record owns
//! up to three blobs plus a `video/` sub-tree holding encoded frames, a shared
//! `config.txt` and the compiled `video.mp4`.
//!
//! Every method returns [`telestash_core::Result`] so callers can tell a
//! missing entity from corruption or an I/O fault. Reads of absent blobs are
//! `Ok(None)`, deletes of absent entities are `Ok(false)`.

use crate::backend::StorageBackend;
use crate::files::BlobFiles;
use crate::paths::{ensure_dir, RecordBlob, StorageLayout};
use crate::quota::DirectorySizeCache;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use telestash_core::{FrameFormat, Result, StorageError};

pub const MAX_FRAME_QUALITY: u8 = 100;

pub struct RecordRepository {
    layout: Arc<StorageLayout>,
    files: BlobFiles,
}

impl RecordRepository {
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

    // ---- blobs ----

    pub fn write_blob(
        &self,
        session_id: &str,
        index: u32,
        blob: RecordBlob,
        payload: &[u8],
    ) -> Result<()> {
        let path = self.layout.record_blob(session_id, index, blob)?;
        self.files.write(&path, payload)
    }

    pub fn read_blob(&self, session_id: &str, index: u32, blob: RecordBlob) -> Result<Option<Vec<u8>>> {
        let path = self.layout.record_blob(session_id, index, blob)?;
        self.files.read(&path)
    }

    pub fn write_record(&self, session_id: &str, index: u32, payload: &[u8]) -> Result<()> {
        self.write_blob(session_id, index, RecordBlob::Record, payload)
    }

    pub fn read_record(&self, session_id: &str, index: u32) -> Result<Option<Vec<u8>>> {
        self.read_blob(session_id, index, RecordBlob::Record)
    }

    pub fn write_metrics(&self, session_id: &str, index: u32, payload: &[u8]) -> Result<()> {
        self.write_blob(session_id, index, RecordBlob::Metrics, payload)
    }

    pub fn read_metrics(&self, session_id: &str, index: u32) -> Result<Option<Vec<u8>>> {
        self.read_blob(session_id, index, RecordBlob::Metrics)
    }

    pub fn write_wireframe(&self, session_id: &str, index: u32, payload: &[u8]) -> Result<()> {
        self.write_blob(session_id, index, RecordBlob::Wireframe, payload)
    }

    pub fn read_wireframe(&self, session_id: &str, index: u32) -> Result<Option<Vec<u8>>> {
        self.read_blob(session_id, index, RecordBlob::Wireframe)
    }

    /// Remove the record with all of its blobs and video sub-tree
    pub fn delete_record(&self, session_id: &str, index: u32) -> Result<bool> {
        let dir = self.layout.record_dir(session_id, index)?;
        self.files.delete_tree(&dir)
    }

    // ---- sessions ----

    pub fn session_ids(&self) -> Result<Vec<String>> {
        let sessions = self.layout.sessions_dir()?;
        let mut ids: Vec<String> = list_dirs(&sessions)?
            .into_iter()
            .filter_map(|(name, _)| name)
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn record_indexes(&self, session_id: &str) -> Result<Vec<u32>> {
        let records = self.layout.records_dir(session_id)?;
        let mut indexes: Vec<u32> = match list_dirs(&records) {
            Ok(dirs) => dirs
                .into_iter()
                .filter_map(|(name, _)| name?.parse().ok())
                .collect(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        indexes.sort_unstable();
        Ok(indexes)
    }

    /// True only when the session directory and its `records/` are both non-empty
    pub fn has_session_data(&self, session_id: &str) -> Result<bool> {
        let session = self.layout.session_dir(session_id)?;
        if !dir_has_entries(&session)? {
            return Ok(false);
        }
        dir_has_entries(&self.layout.records_dir(session_id)?)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let dir = self.layout.session_dir(session_id)?;
        self.files.delete_tree(&dir)
    }

    /// Delete the session directory with the oldest timestamp, never touching
    /// `exclude_session_id`. Returns the deleted id, or `None` when no other
    /// session exists.
    pub fn delete_oldest_session(&self, exclude_session_id: &str) -> Result<Option<String>> {
        let sessions = self.layout.sessions_dir()?;

        let oldest = list_dirs(&sessions)?
            .into_iter()
            .filter_map(|(name, path)| Some((name?, path)))
            .filter(|(name, _)| name != exclude_session_id)
            .map(|(name, path)| (session_timestamp(&path), name))
            .min();

        let Some((_, session_id)) = oldest else {
            return Ok(None);
        };

        if self.delete_session(&session_id)? {
            tracing::debug!("Evicted oldest session {}", session_id);
            Ok(Some(session_id))
        } else {
            Ok(None)
        }
    }

    // ---- video ----

    /// Store an already-encoded frame image. `quality` is the encoder quality
    /// the capture pipeline used, validated to 0..=100.
    pub fn write_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        image: &[u8],
        format: FrameFormat,
        quality: u8,
    ) -> Result<PathBuf> {
        if quality > MAX_FRAME_QUALITY {
            return Err(StorageError::InvalidArgument(format!(
                "frame quality must be within 0..={}, got {}",
                MAX_FRAME_QUALITY, quality
            )));
        }
        let path = self
            .layout
            .video_frame_file(session_id, index, frame_index, format)?;
        self.files.write(&path, image)?;
        Ok(path)
    }

    pub fn read_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        format: FrameFormat,
    ) -> Result<Option<Vec<u8>>> {
        let path = self
            .layout
            .video_frame_file(session_id, index, frame_index, format)?;
        self.files.read(&path)
    }

    pub fn delete_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        format: FrameFormat,
    ) -> Result<bool> {
        let path = self
            .layout
            .video_frame_file(session_id, index, frame_index, format)?;
        self.files.delete(&path)
    }

    /// Frame indexes present for a record, ascending
    pub fn video_frame_indexes(&self, session_id: &str, index: u32) -> Result<Vec<u32>> {
        let mut frames: Vec<u32> = self
            .video_frame_files(session_id, index)?
            .into_iter()
            .map(|(frame, _)| frame)
            .collect();
        frames.sort_unstable();
        frames.dedup();
        Ok(frames)
    }

    /// Delete every frame file, leaving `video.mp4` and `config.txt` in place.
    /// Returns the number of frames removed.
    pub fn delete_all_video_frames(&self, session_id: &str, index: u32) -> Result<usize> {
        let mut deleted = 0;
        for (_, path) in self.video_frame_files(session_id, index)? {
            if self.files.delete(&path)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    pub fn write_video_config(&self, session_id: &str, index: u32, config: &[u8]) -> Result<()> {
        let path = self.layout.video_config_file(session_id, index)?;
        self.files.write(&path, config)
    }

    pub fn read_video_config(&self, session_id: &str, index: u32) -> Result<Option<Vec<u8>>> {
        let path = self.layout.video_config_file(session_id, index)?;
        self.files.read(&path)
    }

    /// Create (or truncate) the compiled video file and return its path for
    /// the muxer to write into.
    pub fn create_video_file(&self, session_id: &str, index: u32) -> Result<PathBuf> {
        ensure_dir(self.layout.video_dir(session_id, index)?)?;
        let path = self.layout.video_file(session_id, index)?;
        File::create(&path)
            .map_err(|source| StorageError::io("creating video file", &path, source))?;
        self.files.touched(&path);
        Ok(path)
    }

    pub fn video_file(&self, session_id: &str, index: u32) -> Result<Option<PathBuf>> {
        let path = self.layout.video_file(session_id, index)?;
        Ok(path.is_file().then_some(path))
    }

    /// True once the muxer has written a non-empty video file
    pub fn is_video_file_available(&self, session_id: &str, index: u32) -> Result<bool> {
        let path = self.layout.video_file(session_id, index)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file() && metadata.len() > 0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::io("inspecting video file", &path, source)),
        }
    }

    fn video_frame_files(&self, session_id: &str, index: u32) -> Result<Vec<(u32, PathBuf)>> {
        let dir = self.layout.video_dir(session_id, index)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::io("listing video frames", &dir, source)),
        };

        Ok(entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let frame = frame_index_of(&path)?;
                path.is_file().then_some((frame, path))
            })
            .collect())
    }
}

/// `<digits>.<frame ext>`; anything else in the video directory is not a frame
fn frame_index_of(path: &Path) -> Option<u32> {
    let ext = path.extension()?.to_str()?;
    FrameFormat::from_extension(ext)?;
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Sub-directories of `dir` as (utf-8 name, path)
fn list_dirs(dir: &Path) -> Result<Vec<(Option<String>, PathBuf)>> {
    let entries =
        fs::read_dir(dir).map_err(|source| StorageError::io("listing directory", dir, source))?;
    Ok(entries
        .flatten()
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().into_string().ok(), entry.path()))
        .collect())
}

fn dir_has_entries(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StorageError::io("listing directory", dir, source)),
    }
}

/// Creation time where the filesystem records it, modification time otherwise
fn session_timestamp(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendMode, LocalFsBackend};
    use proptest::prelude::*;
    use std::time::Duration;
    use telestash_core::StorageConfig;
    use tempfile::TempDir;

    fn repository(temp_dir: &TempDir) -> RecordRepository {
        let config = StorageConfig::with_base_dir(temp_dir.path());
        let layout = Arc::new(StorageLayout::new(&config, BackendMode::Plain).unwrap());
        RecordRepository::new(
            layout,
            Arc::new(LocalFsBackend::new()),
            Arc::new(DirectorySizeCache::new(16, Duration::from_secs(60))),
        )
    }

    #[test]
    fn test_record_blobs_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        repo.write_record("s1", 0, b"payload").unwrap();
        repo.write_metrics("s1", 0, b"{\"fps\":30}").unwrap();
        repo.write_wireframe("s1", 0, b"<wireframe/>").unwrap();

        assert_eq!(repo.read_record("s1", 0).unwrap().unwrap(), b"payload");
        assert_eq!(repo.read_metrics("s1", 0).unwrap().unwrap(), b"{\"fps\":30}");
        assert_eq!(repo.read_wireframe("s1", 0).unwrap().unwrap(), b"<wireframe/>");
        assert_eq!(repo.read_record("s1", 1).unwrap(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn prop_write_then_read_returns_payload(
            session in "[a-z0-9-]{1,16}",
            index in 0u32..1000,
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let temp_dir = TempDir::new().unwrap();
            let repo = repository(&temp_dir);
            repo.write_record(&session, index, &payload).unwrap();
            prop_assert_eq!(repo.read_record(&session, index).unwrap(), Some(payload));
        }
    }

    #[test]
    fn test_delete_record_removes_subtree() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        repo.write_record("s1", 3, b"x").unwrap();
        repo.write_video_frame("s1", 3, 0, b"jpg", FrameFormat::Jpeg, 80)
            .unwrap();

        assert!(repo.delete_record("s1", 3).unwrap());
        assert_eq!(repo.read_record("s1", 3).unwrap(), None);
        assert!(repo.video_frame_indexes("s1", 3).unwrap().is_empty());
        assert!(!repo.delete_record("s1", 3).unwrap());
    }

    #[test]
    fn test_session_listing_and_record_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        assert!(repo.session_ids().unwrap().is_empty());

        repo.write_record("b", 10, b"x").unwrap();
        repo.write_record("b", 2, b"x").unwrap();
        repo.write_record("a", 0, b"x").unwrap();

        assert_eq!(repo.session_ids().unwrap(), vec!["a", "b"]);
        assert_eq!(repo.record_indexes("b").unwrap(), vec![2, 10]);
        assert!(repo.record_indexes("unknown").unwrap().is_empty());
    }

    #[test]
    fn test_has_session_data() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        assert!(!repo.has_session_data("s1").unwrap());

        repo.write_record("s1", 0, b"x").unwrap();
        assert!(repo.has_session_data("s1").unwrap());

        // session dir present but records/ empty
        repo.delete_record("s1", 0).unwrap();
        assert!(repo.layout.session_dir("s1").unwrap().is_dir());
        assert!(!repo.has_session_data("s1").unwrap());
    }

    #[test]
    fn test_delete_session() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        repo.write_record("s1", 0, b"x").unwrap();

        assert!(repo.delete_session("s1").unwrap());
        assert!(!repo.has_session_data("s1").unwrap());
        assert!(!repo.session_ids().unwrap().contains(&"s1".to_string()));
        assert!(!repo.delete_session("s1").unwrap());
    }

    #[test]
    fn test_delete_oldest_session_skips_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        repo.write_record("active", 0, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        repo.write_record("older", 0, b"x").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        repo.write_record("newer", 0, b"x").unwrap();

        assert_eq!(
            repo.delete_oldest_session("active").unwrap(),
            Some("older".to_string())
        );
        assert_eq!(
            repo.delete_oldest_session("active").unwrap(),
            Some("newer".to_string())
        );
        assert_eq!(repo.delete_oldest_session("active").unwrap(), None);
        assert_eq!(repo.session_ids().unwrap(), vec!["active"]);
    }

    #[test]
    fn test_delete_all_video_frames_keeps_video_and_config() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        for frame in 0..5 {
            repo.write_video_frame("s1", 0, frame, b"jpeg-bytes", FrameFormat::Jpeg, 75)
                .unwrap();
        }
        let video = repo.create_video_file("s1", 0).unwrap();
        std::fs::write(&video, b"mp4").unwrap();
        repo.write_video_config("s1", 0, b"{\"fps\":2}").unwrap();

        assert_eq!(repo.video_frame_indexes("s1", 0).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(repo.delete_all_video_frames("s1", 0).unwrap(), 5);

        let dir = repo.layout.video_dir("s1", 0).unwrap();
        let mut remaining: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["config.txt", "video.mp4"]);
        assert!(repo.is_video_file_available("s1", 0).unwrap());
    }

    #[test]
    fn test_delete_single_video_frame() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        for frame in 0..5 {
            repo.write_video_frame("s1", 0, frame, b"jpeg-bytes", FrameFormat::Jpeg, 75)
                .unwrap();
        }
        let video = repo.create_video_file("s1", 0).unwrap();
        std::fs::write(&video, b"mp4").unwrap();

        assert!(repo.delete_video_frame("s1", 0, 2, FrameFormat::Jpeg).unwrap());
        assert_eq!(repo.video_frame_indexes("s1", 0).unwrap(), vec![0, 1, 3, 4]);
        assert_eq!(repo.read_video_frame("s1", 0, 2, FrameFormat::Jpeg).unwrap(), None);
        assert_eq!(
            repo.read_video_frame("s1", 0, 3, FrameFormat::Jpeg).unwrap(),
            Some(b"jpeg-bytes".to_vec())
        );
        assert!(repo.is_video_file_available("s1", 0).unwrap());

        // second delete and wrong format are no-ops
        assert!(!repo.delete_video_frame("s1", 0, 2, FrameFormat::Jpeg).unwrap());
        assert!(!repo.delete_video_frame("s1", 0, 3, FrameFormat::Png).unwrap());
        assert_eq!(repo.video_frame_indexes("s1", 0).unwrap(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_concurrent_writes_to_one_record_succeed() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        for round in 0..50 {
            std::thread::scope(|scope| {
                let first = scope.spawn(|| repo.write_record("s", round, &[1u8; 2048]));
                let second = scope.spawn(|| repo.write_record("s", round, &[2u8; 2048]));
                first.join().unwrap().unwrap();
                second.join().unwrap().unwrap();
            });

            let stored = repo.read_record("s", round).unwrap().unwrap();
            assert!(stored == vec![1u8; 2048] || stored == vec![2u8; 2048]);
        }
        assert_eq!(repo.record_indexes("s").unwrap().len(), 50);
    }

    #[test]
    fn test_video_file_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);

        assert_eq!(repo.video_file("s1", 0).unwrap(), None);
        assert!(!repo.is_video_file_available("s1", 0).unwrap());

        let path = repo.create_video_file("s1", 0).unwrap();
        assert_eq!(repo.video_file("s1", 0).unwrap(), Some(path.clone()));
        // empty until the muxer writes
        assert!(!repo.is_video_file_available("s1", 0).unwrap());

        std::fs::write(&path, b"mp4").unwrap();
        assert!(repo.is_video_file_available("s1", 0).unwrap());
    }

    #[test]
    fn test_frame_quality_is_validated() {
        let temp_dir = TempDir::new().unwrap();
        let repo = repository(&temp_dir);
        let err = repo
            .write_video_frame("s1", 0, 0, b"x", FrameFormat::Png, 101)
            .unwrap_err();
        assert_eq!(err.kind(), telestash_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_frame_file_pattern() {
        assert_eq!(frame_index_of(Path::new("/v/12.jpg")), Some(12));
        assert_eq!(frame_index_of(Path::new("/v/3.webp")), Some(3));
        assert_eq!(frame_index_of(Path::new("/v/video.mp4")), None);
        assert_eq!(frame_index_of(Path::new("/v/config.txt")), None);
        assert_eq!(frame_index_of(Path::new("/v/thumb.jpg")), None);
    }
}
