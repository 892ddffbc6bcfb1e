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

//! Pluggable byte-level file backends
//!
//! The engine picks one backend at construction and keeps it for the process
//! lifetime. Plain and encrypted backends produce differently named roots, so
//! data written under one mode is never visible to the other.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension of in-flight atomic writes
pub const TEMP_FILE_EXT: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
    Plain,
    Encrypted,
}

impl BackendMode {
    /// Suffix appended to the versioned root directory name
    pub fn root_suffix(&self) -> &'static str {
        match self {
            BackendMode::Plain => "",
            BackendMode::Encrypted => "e",
        }
    }
}

/// Byte-level read/write/delete over a path.
///
/// Encrypted implementations are provided by the host application, which owns
/// the key material; the engine only talks to this trait.
pub trait StorageBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Write through a sibling temp file then rename over `path`, so a crash
    /// leaves either the old or the new contents, never a torn file. Each call
    /// gets its own temp file; concurrent writers to one path race only on
    /// the rename, and the last rename wins.
    fn write_atomic(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let temp_path = temp_sibling(path);
        if let Err(e) = self.write(&temp_path, data) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        fs::rename(&temp_path, path).inspect_err(|_| {
            let _ = fs::remove_file(&temp_path);
        })
    }
}

/// `<name>.<pid>-<seq>.tmp`, unique per write within and across processes
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}-{}.{}", std::process::id(), seq, TEMP_FILE_EXT));
    path.with_file_name(name)
}

/// Plain local filesystem backend
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFsBackend;

impl LocalFsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for LocalFsBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Plain
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        file.sync_all()
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob.dat");
        let backend = LocalFsBackend::new();

        backend.write_atomic(&path, b"first").unwrap();
        backend.write_atomic(&path, b"second").unwrap();

        assert_eq!(backend.read(&path).unwrap(), b"second");
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["blob.dat"]);
    }

    #[test]
    fn test_concurrent_writers_to_one_path_all_succeed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("record.txt");
        let payloads: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 4096]).collect();

        for _ in 0..50 {
            let handles: Vec<_> = payloads
                .iter()
                .cloned()
                .map(|payload| {
                    let path = path.clone();
                    std::thread::spawn(move || LocalFsBackend::new().write_atomic(&path, &payload))
                })
                .collect();
            for handle in handles {
                handle.join().unwrap().unwrap();
            }

            let contents = fs::read(&path).unwrap();
            assert!(payloads.contains(&contents));
        }

        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = LocalFsBackend::new()
            .delete(&temp_dir.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_temp_sibling_names_are_unique() {
        let path = Path::new("/a/b/preferences.dat");
        let first = temp_sibling(path);
        let second = temp_sibling(path);

        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
        assert_eq!(first.extension().unwrap(), TEMP_FILE_EXT);
        assert!(first
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("preferences.dat."));
    }
}
