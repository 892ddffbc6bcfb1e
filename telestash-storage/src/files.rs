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

//! Blob file access shared by the repositories
//!
//! Wraps the backend with the bookkeeping every blob write or delete needs:
//! parent directories on write, `NotFound` folded into `None`/`false`, and
//! size-cache invalidation for the touched path.

use crate::backend::StorageBackend;
use crate::paths::ensure_parent;
use crate::quota::DirectorySizeCache;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use telestash_core::{Result, StorageError};

pub struct BlobFiles {
    backend: Arc<dyn StorageBackend>,
    sizes: Arc<DirectorySizeCache>,
}

impl BlobFiles {
    pub fn new(backend: Arc<dyn StorageBackend>, sizes: Arc<DirectorySizeCache>) -> Self {
        Self { backend, sizes }
    }

    pub fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        ensure_parent(path)?;
        self.backend
            .write_atomic(path, data)
            .map_err(|source| StorageError::io("writing file", path, source))?;
        self.sizes.invalidate(path);
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match self.backend.read(path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::io("reading file", path, source)),
        }
    }

    pub fn delete(&self, path: &Path) -> Result<bool> {
        match self.backend.delete(path) {
            Ok(()) => {
                self.sizes.invalidate(path);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::io("deleting file", path, source)),
        }
    }

    /// Recursive delete; `false` when `dir` was already gone
    pub fn delete_tree(&self, dir: &Path) -> Result<bool> {
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                self.sizes.invalidate(dir);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::io("deleting directory", dir, source)),
        }
    }

    /// Record a change made outside the backend (e.g. a file handed to a muxer)
    pub fn touched(&self, path: &Path) {
        self.sizes.invalidate(path);
    }
}
