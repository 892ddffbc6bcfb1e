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

//! Telestash Storage Layer
//!
//! On-device persistence for a mobile telemetry agent. Captured artifacts are
//! buffered on local storage between capture and acknowledged upload.
//!
//! ## Architecture
//!
//! - **Backend**: pluggable byte-level file I/O, plain or encrypted
//! - **Paths**: versioned, mode-tagged directory layout
//! - **Preferences**: typed key-value store with atomic commits
//! - **Quota**: occupied-size vs free-space policy with a size cache
//! - **Records**: session/record/video lifecycle
//! - **Artifacts**: span/log payloads and identification blobs
//! - **Buffered ids**: crash-safe ledger of undelivered ids
//! - **Cleanup**: bounded, resumable deletion of stale roots
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use telestash_core::{StorageConfig, TelemetryKind};
//! use telestash_storage::{LocalFsBackend, TelemetryStorage, ThreadExecutor};
//!
//! let storage = TelemetryStorage::open(StorageConfig::default(), Arc::new(LocalFsBackend::new()))?;
//! storage.schedule_stale_root_cleanup(&ThreadExecutor);
//!
//! if !storage.is_storage_full() {
//!     storage.write_record("session-1", 0, b"payload");
//!     storage.buffer_telemetry(TelemetryKind::Span, "span-1", b"{...}");
//! }
//! ```

pub mod artifacts;
pub mod backend;
pub mod buffered_ids;
pub mod cleanup;
mod files;
pub mod paths;
pub mod preferences;
pub mod quota;
pub mod records;
pub mod storage;

pub use artifacts::ArtifactRepository;
pub use backend::{BackendMode, LocalFsBackend, StorageBackend};
pub use buffered_ids::BufferedIdTracker;
pub use cleanup::{
    spawn_cleanup, BackgroundExecutor, CleanupHandle, CleanupProgress, CleanupStats, CleanupTask,
    InlineExecutor, ThreadExecutor,
};
pub use paths::{RecordBlob, StorageLayout};
pub use preferences::{PreferenceEditor, PreferenceStore};
pub use quota::{DirectorySizeCache, FreeSpaceProbe, FsFreeSpace, QuotaPolicy};
pub use records::RecordRepository;
pub use storage::TelemetryStorage;
