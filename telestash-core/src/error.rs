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

//! Error types shared by every Telestash crate

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Coarse classification of a [`StorageError`], kept for diagnostics after the
/// facade has collapsed an error into a boolean or an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Corrupt,
    Io,
    InvalidArgument,
    BaseDirUnavailable,
    Config,
    Serialization,
}

/// Errors that can occur in the storage engine
#[derive(Debug, Error)]
pub enum StorageError {
    /// The file or directory does not exist
    #[error("Not found: {path}")]
    NotFound { path: PathBuf },

    /// Persisted bytes exist but cannot be decoded
    #[error("Corrupt data at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Any other filesystem failure (permission denied, disk full, ...)
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Caller supplied an identifier or parameter the engine refuses
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No platform data directory could be resolved
    #[error("Base storage directory could not be resolved")]
    BaseDirUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Wrap an I/O error, folding `ErrorKind::NotFound` into [`StorageError::NotFound`].
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { path };
        }
        Self::Io {
            operation,
            path,
            source,
        }
    }

    #[must_use]
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Corrupt { .. } => ErrorKind::Corrupt,
            Self::Io { .. } => ErrorKind::Io,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::BaseDirUnavailable => ErrorKind::BaseDirUnavailable,
            Self::Config(_) => ErrorKind::Config,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<toml::de::Error> for StorageError {
    fn from(e: toml::de::Error) -> Self {
        StorageError::Config(e.to_string())
    }
}
