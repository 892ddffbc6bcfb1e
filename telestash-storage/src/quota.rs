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

//! Disk quota policy
//!
//! A directory is within policy while
//! `occupied < min(max_bytes, percentage * free)` and `free > min_free`.
//! Occupied size comes from a recursive walk and is cached per directory with
//! a TTL; every write or delete invalidates the cached size of each ancestor
//! of the touched path. Free space is queried fresh on every check.

use moka::sync::Cache;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use telestash_core::StoragePolicy;
use walkdir::WalkDir;

/// Source of the filesystem's available space
pub trait FreeSpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> io::Result<u64>;
}

/// Free space as reported by the OS for the volume holding `path`
#[derive(Debug, Default, Clone, Copy)]
pub struct FsFreeSpace;

impl FreeSpaceProbe for FsFreeSpace {
    fn available_space(&self, path: &Path) -> io::Result<u64> {
        fs2::available_space(path)
    }
}

/// Bounded cache of recursive directory sizes
pub struct DirectorySizeCache {
    cache: Cache<PathBuf, u64>,
}

impl DirectorySizeCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Cached size of `dir`, walking the tree on a miss
    pub fn occupied_size(&self, dir: &Path) -> u64 {
        if let Some(size) = self.cache.get(dir) {
            return size;
        }
        let size = compute_dir_size(dir);
        self.cache.insert(dir.to_path_buf(), size);
        size
    }

    /// Drop the cached size of `path` and every directory above it
    pub fn invalidate(&self, path: &Path) {
        for ancestor in path.ancestors() {
            self.cache.invalidate(ancestor);
        }
    }
}

/// Sum of file sizes under `dir`. Missing trees count as empty; unreadable
/// entries are skipped.
pub fn compute_dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;
    for entry in WalkDir::new(dir) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                Ok(metadata) => total = total.saturating_add(metadata.len()),
                Err(e) => tracing::warn!("Skipping {:?} in size walk: {}", entry.path(), e),
            },
            Ok(_) => {}
            Err(e) => {
                let missing = e
                    .io_error()
                    .is_some_and(|err| err.kind() == io::ErrorKind::NotFound);
                if !missing {
                    tracing::warn!("Size walk error under {:?}: {}", dir, e);
                }
            }
        }
    }
    total
}

/// Pure quota arithmetic
pub fn within_policy(policy: &StoragePolicy, occupied_bytes: u64, free_space_bytes: u64) -> bool {
    let by_free = policy.max_occupied_space_percentage_of_free * free_space_bytes as f64;
    let limit = (policy.max_occupied_space_bytes as f64).min(by_free);
    (occupied_bytes as f64) < limit && free_space_bytes > policy.min_free_space_bytes
}

/// A [`StoragePolicy`] bound to the directory it governs
pub struct QuotaPolicy {
    directory: PathBuf,
    policy: StoragePolicy,
    sizes: Arc<DirectorySizeCache>,
}

impl QuotaPolicy {
    pub fn new(
        directory: impl Into<PathBuf>,
        policy: StoragePolicy,
        sizes: Arc<DirectorySizeCache>,
    ) -> Self {
        Self {
            directory: directory.into(),
            policy,
            sizes,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn policy(&self) -> &StoragePolicy {
        &self.policy
    }

    pub fn occupied_size(&self) -> u64 {
        self.sizes.occupied_size(&self.directory)
    }

    /// True while the directory may keep growing
    pub fn check(&self, free_space_bytes: u64) -> bool {
        let occupied = self.occupied_size();
        let ok = within_policy(&self.policy, occupied, free_space_bytes);
        if !ok {
            tracing::debug!(
                "Quota exceeded for {:?}: occupied={} free={}",
                self.directory,
                occupied,
                free_space_bytes
            );
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn policy() -> StoragePolicy {
        StoragePolicy {
            max_occupied_space_bytes: 1000 * MB,
            max_occupied_space_percentage_of_free: 0.2,
            min_free_space_bytes: 50 * MB,
        }
    }

    fn sizes() -> Arc<DirectorySizeCache> {
        Arc::new(DirectorySizeCache::new(16, Duration::from_secs(60)))
    }

    #[test]
    fn test_policy_boundaries() {
        let policy = policy();
        // limited by percentage: 0.2 * 1000 MB = 200 MB
        assert!(within_policy(&policy, 199 * MB, 1000 * MB));
        assert!(!within_policy(&policy, 200 * MB, 1000 * MB));
        // limited by absolute cap
        assert!(within_policy(&policy, 999 * MB, 10_000 * MB));
        assert!(!within_policy(&policy, 1000 * MB, 10_000 * MB));
        // free space headroom
        assert!(!within_policy(&policy, 0, 50 * MB));
        assert!(within_policy(&policy, 0, 50 * MB + 1));
    }

    proptest! {
        // a quarter is exact in f64, so the checks below can use integers
        #[test]
        fn prop_check_matches_inequalities(occupied in 0u64..2_000 * MB, free in 0u64..20_000 * MB) {
            let policy = StoragePolicy {
                max_occupied_space_bytes: 1000 * MB,
                max_occupied_space_percentage_of_free: 0.25,
                min_free_space_bytes: 50 * MB,
            };
            let under_cap = occupied < 1000 * MB;
            let under_share = occupied * 4 < free;
            let has_headroom = free > 50 * MB;
            prop_assert_eq!(
                within_policy(&policy, occupied, free),
                under_cap && under_share && has_headroom
            );
        }

        #[test]
        fn prop_default_policy_refuses_over_limit(occupied in 0u64..2_000 * MB, free in 0u64..20_000 * MB) {
            let policy = policy();
            if occupied >= 1000 * MB || occupied * 5 >= free + 5 || free <= 50 * MB {
                prop_assert!(!within_policy(&policy, occupied, free));
            }
            if occupied < 1000 * MB && occupied * 5 + 5 < free && free > 50 * MB {
                prop_assert!(within_policy(&policy, occupied, free));
            }
        }
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
        std::fs::write(temp_dir.path().join("x.dat"), vec![0u8; 10]).unwrap();
        std::fs::write(temp_dir.path().join("a/b/y.dat"), vec![0u8; 32]).unwrap();

        assert_eq!(compute_dir_size(temp_dir.path()), 42);
        assert_eq!(compute_dir_size(&temp_dir.path().join("missing")), 0);
    }

    #[test]
    fn test_cached_size_is_invalidated_by_nested_write() {
        let temp_dir = TempDir::new().unwrap();
        let cache = sizes();
        let nested = temp_dir.path().join("sessions/s1");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(cache.occupied_size(temp_dir.path()), 0);

        let file = nested.join("record.txt");
        std::fs::write(&file, vec![1u8; 100]).unwrap();
        // stale until invalidated
        assert_eq!(cache.occupied_size(temp_dir.path()), 0);

        cache.invalidate(&file);
        assert_eq!(cache.occupied_size(temp_dir.path()), 100);
    }

    #[test]
    fn test_quota_policy_check() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("blob"), vec![0u8; 1024]).unwrap();

        let quota = QuotaPolicy::new(
            temp_dir.path(),
            StoragePolicy {
                max_occupied_space_bytes: 2048,
                max_occupied_space_percentage_of_free: 0.5,
                min_free_space_bytes: 100,
            },
            sizes(),
        );

        assert_eq!(quota.occupied_size(), 1024);
        assert!(quota.check(4096));
        // 0.5 * 2048 = 1024, not strictly below
        assert!(!quota.check(2048));
        assert!(!quota.check(100));
    }

    #[test]
    fn test_fs_free_space_reports_something() {
        let temp_dir = TempDir::new().unwrap();
        assert!(FsFreeSpace.available_space(temp_dir.path()).unwrap() > 0);
    }
}
