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

//! Telemetry Storage - the single entry point for capture and delivery
//!
//! Construct one [`TelemetryStorage`] at process start and share it (by
//! reference or `Arc`) with the capture and delivery pipelines. All calls are
//! blocking and belong on background threads.
//!
//! This is where internal `Result`s collapse: writes and deletes return
//! `bool`, reads return `Option`, listings return an empty `Vec` on failure.
//! Every collapsed error is logged with its [`telestash_core::ErrorKind`].
//! Callers that need the distinction can go through [`TelemetryStorage::records`]
//! and [`TelemetryStorage::artifacts`].

use crate::artifacts::ArtifactRepository;
use crate::backend::StorageBackend;
use crate::buffered_ids::BufferedIdTracker;
use crate::cleanup::{spawn_cleanup, BackgroundExecutor, CleanupHandle, CleanupTask};
use crate::paths::StorageLayout;
use crate::preferences::PreferenceStore;
use crate::quota::{DirectorySizeCache, FreeSpaceProbe, FsFreeSpace, QuotaPolicy};
use crate::records::RecordRepository;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telestash_core::{FrameFormat, Result, StorageConfig, StorageError, TelemetryKind};

pub struct TelemetryStorage {
    config: StorageConfig,
    layout: Arc<StorageLayout>,
    records: RecordRepository,
    artifacts: ArtifactRepository,
    preferences: Arc<PreferenceStore>,
    buffered_ids: BufferedIdTracker,
    quota: QuotaPolicy,
    free_space: Box<dyn FreeSpaceProbe>,
}

impl TelemetryStorage {
    /// Open the versioned root for `backend`'s mode.
    ///
    /// Fails only when the configuration is invalid or no root can be created
    /// (for example when the base directory cannot be resolved).
    pub fn open(config: StorageConfig, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;

        let layout = Arc::new(StorageLayout::new(&config, backend.mode())?);
        let sizes = Arc::new(DirectorySizeCache::new(
            config.size_cache_capacity,
            Duration::from_secs(config.size_cache_ttl_secs),
        ));

        let preferences = Arc::new(
            PreferenceStore::open(layout.preferences_file()?, Arc::clone(&backend))
                .with_size_cache(Arc::clone(&sizes)),
        );

        tracing::info!(
            "Opened telemetry storage at {:?} (schema v{}, {:?})",
            layout.root(),
            layout.schema_version(),
            layout.mode()
        );

        Ok(Self {
            records: RecordRepository::new(
                Arc::clone(&layout),
                Arc::clone(&backend),
                Arc::clone(&sizes),
            ),
            artifacts: ArtifactRepository::new(
                Arc::clone(&layout),
                Arc::clone(&backend),
                Arc::clone(&sizes),
            ),
            buffered_ids: BufferedIdTracker::new(Arc::clone(&preferences)),
            quota: QuotaPolicy::new(layout.root(), config.policy, sizes),
            preferences,
            layout,
            config,
            free_space: Box::new(FsFreeSpace),
        })
    }

    /// Replace the free-space source (tests, platforms with their own API)
    pub fn with_free_space_probe(mut self, probe: impl FreeSpaceProbe + 'static) -> Self {
        self.free_space = Box::new(probe);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordRepository {
        &self.records
    }

    pub fn artifacts(&self) -> &ArtifactRepository {
        &self.artifacts
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    // ---- health signals ----

    pub fn root_dir_path(&self) -> &Path {
        self.layout.root()
    }

    /// Available bytes on the volume, queried fresh. 0 if the query fails.
    pub fn free_space(&self) -> u64 {
        match self.free_space.available_space(self.layout.root()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Free space query failed for {:?}: {}", self.layout.root(), e);
                0
            }
        }
    }

    pub fn occupied_size(&self) -> u64 {
        self.quota.occupied_size()
    }

    /// True when capture must stop writing
    pub fn is_storage_full(&self) -> bool {
        !self.quota.check(self.free_space())
    }

    // ---- records ----

    pub fn write_record(&self, session_id: &str, index: u32, payload: &[u8]) -> bool {
        succeeded("write record", self.records.write_record(session_id, index, payload))
    }

    pub fn read_record(&self, session_id: &str, index: u32) -> Option<Vec<u8>> {
        found("read record", self.records.read_record(session_id, index))
    }

    pub fn delete_record(&self, session_id: &str, index: u32) -> bool {
        deleted("delete record", self.records.delete_record(session_id, index))
    }

    pub fn write_metrics(&self, session_id: &str, index: u32, payload: &[u8]) -> bool {
        succeeded("write metrics", self.records.write_metrics(session_id, index, payload))
    }

    pub fn read_metrics(&self, session_id: &str, index: u32) -> Option<Vec<u8>> {
        found("read metrics", self.records.read_metrics(session_id, index))
    }

    pub fn write_wireframe(&self, session_id: &str, index: u32, payload: &[u8]) -> bool {
        succeeded("write wireframe", self.records.write_wireframe(session_id, index, payload))
    }

    pub fn read_wireframe(&self, session_id: &str, index: u32) -> Option<Vec<u8>> {
        found("read wireframe", self.records.read_wireframe(session_id, index))
    }

    // ---- sessions ----

    pub fn session_ids(&self) -> Vec<String> {
        listed("list sessions", self.records.session_ids())
    }

    pub fn record_indexes(&self, session_id: &str) -> Vec<u32> {
        listed("list records", self.records.record_indexes(session_id))
    }

    pub fn has_session_data(&self, session_id: &str) -> bool {
        logged("inspect session", self.records.has_session_data(session_id)).unwrap_or(false)
    }

    pub fn delete_session(&self, session_id: &str) -> bool {
        deleted("delete session", self.records.delete_session(session_id))
    }

    /// Evict the oldest session other than `active_session_id`
    pub fn delete_oldest_session(&self, active_session_id: &str) -> Option<String> {
        logged(
            "delete oldest session",
            self.records.delete_oldest_session(active_session_id),
        )
        .flatten()
    }

    // ---- video ----

    pub fn write_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        image: &[u8],
        format: FrameFormat,
        quality: u8,
    ) -> bool {
        logged(
            "write video frame",
            self.records
                .write_video_frame(session_id, index, frame_index, image, format, quality),
        )
        .is_some()
    }

    pub fn read_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        format: FrameFormat,
    ) -> Option<Vec<u8>> {
        found(
            "read video frame",
            self.records
                .read_video_frame(session_id, index, frame_index, format),
        )
    }

    pub fn delete_video_frame(
        &self,
        session_id: &str,
        index: u32,
        frame_index: u32,
        format: FrameFormat,
    ) -> bool {
        deleted(
            "delete video frame",
            self.records
                .delete_video_frame(session_id, index, frame_index, format),
        )
    }

    pub fn video_frame_indexes(&self, session_id: &str, index: u32) -> Vec<u32> {
        listed(
            "list video frames",
            self.records.video_frame_indexes(session_id, index),
        )
    }

    pub fn delete_all_video_frames(&self, session_id: &str, index: u32) -> bool {
        logged(
            "delete video frames",
            self.records.delete_all_video_frames(session_id, index),
        )
        .is_some()
    }

    pub fn write_video_config(&self, session_id: &str, index: u32, config: &[u8]) -> bool {
        succeeded(
            "write video config",
            self.records.write_video_config(session_id, index, config),
        )
    }

    pub fn read_video_config(&self, session_id: &str, index: u32) -> Option<Vec<u8>> {
        found("read video config", self.records.read_video_config(session_id, index))
    }

    pub fn create_video_file(&self, session_id: &str, index: u32) -> Option<PathBuf> {
        logged("create video file", self.records.create_video_file(session_id, index))
    }

    pub fn video_file(&self, session_id: &str, index: u32) -> Option<PathBuf> {
        found("locate video file", self.records.video_file(session_id, index))
    }

    pub fn is_video_file_available(&self, session_id: &str, index: u32) -> bool {
        logged(
            "inspect video file",
            self.records.is_video_file_available(session_id, index),
        )
        .unwrap_or(false)
    }

    // ---- telemetry artifacts ----

    pub fn write_telemetry(&self, kind: TelemetryKind, id: &str, payload: &[u8]) -> bool {
        succeeded("write telemetry", self.artifacts.write_telemetry(kind, id, payload))
    }

    pub fn read_telemetry(&self, kind: TelemetryKind, id: &str) -> Option<Vec<u8>> {
        found("read telemetry", self.artifacts.read_telemetry(kind, id))
    }

    pub fn delete_telemetry(&self, kind: TelemetryKind, id: &str) -> bool {
        deleted("delete telemetry", self.artifacts.delete_telemetry(kind, id))
    }

    pub fn telemetry_ids(&self, kind: TelemetryKind) -> Vec<String> {
        listed("list telemetry", self.artifacts.telemetry_ids(kind))
    }

    /// Write a payload and mark its id pending delivery
    pub fn buffer_telemetry(&self, kind: TelemetryKind, id: &str, payload: &[u8]) -> bool {
        self.write_telemetry(kind, id, payload) && self.add_buffered_id(kind, id)
    }

    /// Delivery acknowledged: drop the payload and the pending id
    pub fn acknowledge_telemetry(&self, kind: TelemetryKind, id: &str) -> bool {
        let removed_data = self.delete_telemetry(kind, id);
        let removed_id = self.remove_buffered_id(kind, id);
        removed_data || removed_id
    }

    pub fn write_identification(&self, visitor_id: &str, payload: &[u8]) -> bool {
        succeeded(
            "write identification",
            self.artifacts.write_identification(visitor_id, payload),
        )
    }

    pub fn read_identification(&self, visitor_id: &str) -> Option<Vec<u8>> {
        found("read identification", self.artifacts.read_identification(visitor_id))
    }

    pub fn delete_identification(&self, visitor_id: &str) -> bool {
        deleted(
            "delete identification",
            self.artifacts.delete_identification(visitor_id),
        )
    }

    // ---- buffered ids ----

    /// True when the id is recorded as pending (already present counts)
    pub fn add_buffered_id(&self, kind: TelemetryKind, id: &str) -> bool {
        logged("add buffered id", self.buffered_ids.add(kind, id)).is_some()
    }

    pub fn remove_buffered_id(&self, kind: TelemetryKind, id: &str) -> bool {
        logged("remove buffered id", self.buffered_ids.remove(kind, id)).unwrap_or(false)
    }

    pub fn buffered_ids(&self, kind: TelemetryKind) -> Vec<String> {
        self.buffered_ids.all(kind)
    }

    pub fn clear_buffered_ids(&self, kind: TelemetryKind) -> bool {
        succeeded("clear buffered ids", self.buffered_ids.clear(kind))
    }

    /// Pending ids whose payload still exists; orphans are forgotten
    pub fn recover_buffered_ids(&self, kind: TelemetryKind) -> Vec<String> {
        let artifacts = &self.artifacts;
        listed(
            "recover buffered ids",
            self.buffered_ids.reconcile(kind, |id| {
                artifacts.has_telemetry(kind, id).unwrap_or(false)
            }),
        )
    }

    // ---- maintenance ----

    /// Roots written by other schema versions or backend modes
    pub fn stale_roots(&self) -> Vec<PathBuf> {
        listed("list stale roots", self.layout.stale_roots())
    }

    /// Delete every stale root on `executor`, in bounded chunks
    pub fn schedule_stale_root_cleanup(&self, executor: &dyn BackgroundExecutor) -> CleanupHandle {
        let stale = self.stale_roots();
        if !stale.is_empty() {
            tracing::info!("Scheduling cleanup of {} stale storage roots", stale.len());
        }
        spawn_cleanup(
            CleanupTask::new(stale),
            self.config.cleanup_chunk_size,
            executor,
        )
    }
}

fn log_failure(operation: &str, e: &StorageError) {
    tracing::warn!(kind = ?e.kind(), "Failed to {}: {}", operation, e);
}

fn logged<T>(operation: &str, result: Result<T>) -> Option<T> {
    result.map_err(|e| log_failure(operation, &e)).ok()
}

fn succeeded(operation: &str, result: Result<()>) -> bool {
    logged(operation, result).is_some()
}

fn deleted(operation: &str, result: Result<bool>) -> bool {
    logged(operation, result).unwrap_or(false)
}

fn found<T>(operation: &str, result: Result<Option<T>>) -> Option<T> {
    logged(operation, result).flatten()
}

fn listed<T>(operation: &str, result: Result<Vec<T>>) -> Vec<T> {
    logged(operation, result).unwrap_or_default()
}
