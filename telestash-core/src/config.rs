// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration for the storage engine
//!
//! Loaded with priority: environment > TOML file > defaults. The storage
//! policy is pure configuration; the engine never mutates it.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MB: u64 = 1024 * 1024;

/// Default quota: never occupy more than 1000 MB
pub const DEFAULT_MAX_OCCUPIED_SPACE_BYTES: u64 = 1000 * MB;

/// Default quota: never occupy more than 20% of the remaining free space
pub const DEFAULT_MAX_OCCUPIED_SPACE_PERCENTAGE: f64 = 0.2;

/// Default headroom: stop writing once free space drops to 50 MB
pub const DEFAULT_MIN_FREE_SPACE_BYTES: u64 = 50 * MB;

/// Bumping this orphans every root written by an older build
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_ROOT_NAME: &str = "telestash";

/// Disk quota applied to a directory subtree
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoragePolicy {
    #[serde(default = "default_max_occupied_space_bytes")]
    pub max_occupied_space_bytes: u64,

    /// Fraction (0, 1] of the current free space the subtree may occupy
    #[serde(default = "default_max_occupied_space_percentage")]
    pub max_occupied_space_percentage_of_free: f64,

    #[serde(default = "default_min_free_space_bytes")]
    pub min_free_space_bytes: u64,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            max_occupied_space_bytes: DEFAULT_MAX_OCCUPIED_SPACE_BYTES,
            max_occupied_space_percentage_of_free: DEFAULT_MAX_OCCUPIED_SPACE_PERCENTAGE,
            min_free_space_bytes: DEFAULT_MIN_FREE_SPACE_BYTES,
        }
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory the versioned root lives in.
    /// None = platform local data directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Prefix of the versioned root directory name
    #[serde(default = "default_root_name")]
    pub root_name: String,

    /// On-disk schema version burned into the root directory name
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default)]
    pub policy: StoragePolicy,

    /// How long a computed directory size may be served from cache
    #[serde(default = "default_size_cache_ttl_secs")]
    pub size_cache_ttl_secs: u64,

    /// Maximum number of directories with a cached size
    #[serde(default = "default_size_cache_capacity")]
    pub size_cache_capacity: u64,

    /// Deletions performed per step by background cleanup
    #[serde(default = "default_cleanup_chunk_size")]
    pub cleanup_chunk_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            root_name: default_root_name(),
            schema_version: default_schema_version(),
            policy: StoragePolicy::default(),
            size_cache_ttl_secs: default_size_cache_ttl_secs(),
            size_cache_capacity: default_size_cache_capacity(),
            cleanup_chunk_size: default_cleanup_chunk_size(),
        }
    }
}

fn default_max_occupied_space_bytes() -> u64 {
    DEFAULT_MAX_OCCUPIED_SPACE_BYTES
}

fn default_max_occupied_space_percentage() -> f64 {
    DEFAULT_MAX_OCCUPIED_SPACE_PERCENTAGE
}

fn default_min_free_space_bytes() -> u64 {
    DEFAULT_MIN_FREE_SPACE_BYTES
}

fn default_root_name() -> String {
    DEFAULT_ROOT_NAME.to_string()
}

fn default_schema_version() -> u32 {
    DEFAULT_SCHEMA_VERSION
}

fn default_size_cache_ttl_secs() -> u64 {
    30
}

fn default_size_cache_capacity() -> u64 {
    256
}

fn default_cleanup_chunk_size() -> usize {
    64
}

impl StorageConfig {
    /// Configuration rooted at an explicit directory, defaults otherwise
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| StorageError::io("reading config file", path, source))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from environment variables
    ///
    /// Supported environment variables:
    /// - TELESTASH_BASE_DIR: Directory holding the versioned root
    /// - TELESTASH_ROOT_NAME: Root directory prefix (default: telestash)
    /// - TELESTASH_SCHEMA_VERSION: Schema version (default: 1)
    /// - TELESTASH_MAX_OCCUPIED_BYTES: Quota ceiling in bytes
    /// - TELESTASH_MAX_OCCUPIED_PERCENTAGE: Quota as a fraction of free space
    /// - TELESTASH_MIN_FREE_BYTES: Required free-space headroom in bytes
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading storage configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from a variable lookup. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("TELESTASH_BASE_DIR") {
            self.base_dir = Some(PathBuf::from(dir));
        }

        if let Some(name) = lookup("TELESTASH_ROOT_NAME") {
            self.root_name = name;
        }

        if let Some(val) = lookup("TELESTASH_SCHEMA_VERSION").and_then(|v| v.parse().ok()) {
            self.schema_version = val;
        }

        if let Some(val) = lookup("TELESTASH_MAX_OCCUPIED_BYTES").and_then(|v| v.parse().ok()) {
            self.policy.max_occupied_space_bytes = val;
        }

        if let Some(val) =
            lookup("TELESTASH_MAX_OCCUPIED_PERCENTAGE").and_then(|v| v.parse().ok())
        {
            self.policy.max_occupied_space_percentage_of_free = val;
        }

        if let Some(val) = lookup("TELESTASH_MIN_FREE_BYTES").and_then(|v| v.parse().ok()) {
            self.policy.min_free_space_bytes = val;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_name.is_empty() || self.root_name.contains(['/', '\\']) {
            return Err(StorageError::Config(format!(
                "root_name must be a single non-empty path segment, got {:?}",
                self.root_name
            )));
        }

        let pct = self.policy.max_occupied_space_percentage_of_free;
        if !(pct > 0.0 && pct <= 1.0) {
            return Err(StorageError::Config(format!(
                "max_occupied_space_percentage_of_free must be in (0, 1], got {}",
                pct
            )));
        }

        if self.cleanup_chunk_size == 0 {
            return Err(StorageError::Config(
                "cleanup_chunk_size must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
