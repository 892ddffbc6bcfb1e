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

//! Preference Store - small typed key-value store backed by one file
//!
//! The whole map is loaded once at construction and kept in memory. Mutations
//! are staged on a [`PreferenceEditor`] and take effect only on `commit`,
//! which rewrites the backing file through a temp file + rename.
//!
//! File layout:
//!
//! ```text
//! magic "TPRF" | format version u32 LE | crc32 u32 LE | bincode(map)
//! ```
//!
//! An unreadable file (missing, wrong magic/version, CRC mismatch, decode
//! failure) loads as an empty store.

use crate::backend::StorageBackend;
use crate::paths::ensure_parent;
use crate::quota::DirectorySizeCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telestash_core::{PreferenceKey, PreferenceType, PreferenceValue, Result, StorageError};

const PREFERENCES_MAGIC: &[u8; 4] = b"TPRF";
const PREFERENCES_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

pub struct PreferenceStore {
    path: PathBuf,
    backend: Arc<dyn StorageBackend>,
    values: RwLock<HashMap<String, PreferenceValue>>,
    /// One commit at a time
    write_lock: Mutex<()>,
    sizes: Option<Arc<DirectorySizeCache>>,
}

impl PreferenceStore {
    /// Open the store, loading whatever the backing file holds.
    pub fn open(path: impl AsRef<Path>, backend: Arc<dyn StorageBackend>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = load_values(&path, backend.as_ref());
        tracing::debug!("Loaded {} preferences from {:?}", values.len(), path);

        Self {
            path,
            backend,
            values: RwLock::new(values),
            write_lock: Mutex::new(()),
            sizes: None,
        }
    }

    /// Invalidate `sizes` for the backing file on every commit
    pub fn with_size_cache(mut self, sizes: Arc<DirectorySizeCache>) -> Self {
        self.sizes = Some(sizes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<PreferenceValue> {
        self.values.read().get(key).cloned()
    }

    /// Typed read; a value stored under a different type reads as absent
    pub fn get_typed<T: PreferenceType>(&self, key: &PreferenceKey<T>) -> Option<T> {
        self.values.read().get(key.name()).and_then(T::from_value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    pub fn all(&self) -> HashMap<String, PreferenceValue> {
        self.values.read().clone()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn edit(&self) -> PreferenceEditor<'_> {
        PreferenceEditor {
            store: self,
            clear: false,
            ops: Vec::new(),
        }
    }

    fn commit(&self, clear: bool, ops: Vec<EditOp>) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut next = if clear {
            HashMap::new()
        } else {
            self.values.read().clone()
        };
        for op in ops {
            match op {
                EditOp::Put(key, value) => {
                    next.insert(key, value);
                }
                EditOp::Remove(key) => {
                    next.remove(&key);
                }
            }
        }

        self.persist(&next)?;
        *self.values.write() = next;
        Ok(())
    }

    fn persist(&self, values: &HashMap<String, PreferenceValue>) -> Result<()> {
        let payload = bincode::serialize(values)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut data = Vec::with_capacity(HEADER_LEN + payload.len());
        data.extend_from_slice(PREFERENCES_MAGIC);
        data.extend_from_slice(&PREFERENCES_FORMAT_VERSION.to_le_bytes());
        data.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        data.extend_from_slice(&payload);

        ensure_parent(&self.path)?;
        self.backend
            .write_atomic(&self.path, &data)
            .map_err(|source| StorageError::io("committing preferences", &self.path, source))?;
        if let Some(sizes) = &self.sizes {
            sizes.invalidate(&self.path);
        }
        Ok(())
    }
}

enum EditOp {
    Put(String, PreferenceValue),
    Remove(String),
}

/// Staged preference mutations.
///
/// `clear` empties the store before the other staged operations apply,
/// wherever it appears in the chain.
#[must_use = "staged preference changes are discarded unless committed"]
pub struct PreferenceEditor<'a> {
    store: &'a PreferenceStore,
    clear: bool,
    ops: Vec<EditOp>,
}

impl<'a> PreferenceEditor<'a> {
    pub fn put(mut self, key: impl Into<String>, value: PreferenceValue) -> Self {
        self.ops.push(EditOp::Put(key.into(), value));
        self
    }

    pub fn put_typed<T: PreferenceType>(self, key: &PreferenceKey<T>, value: T) -> Self {
        self.put(key.name(), value.into_value())
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.push(EditOp::Remove(key.into()));
        self
    }

    pub fn clear(mut self) -> Self {
        self.clear = true;
        self
    }

    /// Apply staged changes and persist them before returning
    pub fn commit(self) -> Result<()> {
        if !self.clear && self.ops.is_empty() {
            return Ok(());
        }
        self.store.commit(self.clear, self.ops)
    }

    /// Like [`Self::commit`], logging instead of returning a failure
    pub fn apply(self) {
        let path = self.store.path.clone();
        if let Err(e) = self.commit() {
            tracing::warn!("Failed to apply preferences at {:?}: {}", path, e);
        }
    }
}

fn load_values(path: &Path, backend: &dyn StorageBackend) -> HashMap<String, PreferenceValue> {
    let data = match backend.read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!("Failed to read preferences at {:?}, starting empty: {}", path, e);
            return HashMap::new();
        }
    };

    match decode_values(path, &data) {
        Ok(values) => values,
        Err(e) => {
            tracing::warn!("{}, starting empty", e);
            HashMap::new()
        }
    }
}

fn decode_values(path: &Path, data: &[u8]) -> Result<HashMap<String, PreferenceValue>> {
    if data.len() < HEADER_LEN {
        return Err(StorageError::corrupt(path, "truncated preferences header"));
    }
    if &data[0..4] != PREFERENCES_MAGIC {
        return Err(StorageError::corrupt(path, "invalid preferences magic"));
    }

    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != PREFERENCES_FORMAT_VERSION {
        return Err(StorageError::corrupt(
            path,
            format!(
                "preferences format version mismatch ({} vs {})",
                version, PREFERENCES_FORMAT_VERSION
            ),
        ));
    }

    let stored_crc = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let payload = &data[HEADER_LEN..];
    if crc32fast::hash(payload) != stored_crc {
        return Err(StorageError::corrupt(path, "CRC mismatch in preferences"));
    }

    bincode::deserialize(payload).map_err(|e| StorageError::corrupt(path, e.to_string()))
}
