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

//! Bounded, resumable tree deletion
//!
//! Removing an old storage root can touch thousands of files. Instead of one
//! blocking `remove_dir_all`, a [`CleanupTask`] keeps an explicit work queue
//! and deletes at most `max_ops` entries per [`CleanupTask::step`], so the
//! work can be chunked onto a background executor and cancelled between
//! chunks.

use parking_lot::{Condvar, Mutex};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Execution context supplied by the host for work that must not run on the
/// calling thread.
pub trait BackgroundExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs each job on a fresh named thread
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl BackgroundExecutor for ThreadExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        if let Err(e) = std::thread::Builder::new()
            .name("telestash-cleanup".to_string())
            .spawn(job)
        {
            tracing::warn!("Failed to spawn cleanup thread: {}", e);
        }
    }
}

/// Runs each job immediately on the caller's thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl BackgroundExecutor for InlineExecutor {
    fn execute(&self, job: Box<dyn FnOnce() + Send + 'static>) {
        job();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub files_removed: u64,
    pub dirs_removed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupProgress {
    /// Work remains; call `step` again
    Pending,
    Done,
    Cancelled,
}

enum Pending {
    Visit(PathBuf),
    RemoveDir(PathBuf),
}

pub struct CleanupTask {
    queue: Vec<Pending>,
    cancel: Arc<AtomicBool>,
    stats: CleanupStats,
}

impl CleanupTask {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            queue: roots.into_iter().map(Pending::Visit).collect(),
            cancel: Arc::new(AtomicBool::new(false)),
            stats: CleanupStats::default(),
        }
    }

    /// Flag checked between deletions; setting it stops the task
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn stats(&self) -> CleanupStats {
        self.stats
    }

    /// Perform at most `max_ops` deletions
    pub fn step(&mut self, max_ops: usize) -> CleanupProgress {
        let mut ops = 0;
        while ops < max_ops {
            if self.cancel.load(Ordering::Relaxed) {
                return CleanupProgress::Cancelled;
            }
            let Some(item) = self.queue.pop() else {
                return CleanupProgress::Done;
            };
            match item {
                Pending::Visit(path) => {
                    let metadata = match fs::symlink_metadata(&path) {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            self.record_error(&path, e);
                            continue;
                        }
                    };
                    if metadata.is_dir() {
                        self.queue.push(Pending::RemoveDir(path.clone()));
                        match fs::read_dir(&path) {
                            Ok(entries) => self
                                .queue
                                .extend(entries.flatten().map(|e| Pending::Visit(e.path()))),
                            Err(e) => self.record_error(&path, e),
                        }
                    } else {
                        match fs::remove_file(&path) {
                            Ok(()) => self.stats.files_removed += 1,
                            Err(e) => self.record_error(&path, e),
                        }
                        ops += 1;
                    }
                }
                Pending::RemoveDir(path) => {
                    match fs::remove_dir(&path) {
                        Ok(()) => self.stats.dirs_removed += 1,
                        Err(e) => self.record_error(&path, e),
                    }
                    ops += 1;
                }
            }
        }

        if self.queue.is_empty() {
            CleanupProgress::Done
        } else {
            CleanupProgress::Pending
        }
    }

    pub fn run_to_completion(&mut self, chunk: usize) -> CleanupProgress {
        loop {
            match self.step(chunk) {
                CleanupProgress::Pending => continue,
                other => return other,
            }
        }
    }

    fn record_error(&mut self, path: &std::path::Path, e: io::Error) {
        if e.kind() == io::ErrorKind::NotFound {
            return;
        }
        self.stats.errors += 1;
        tracing::warn!("Cleanup failed for {:?}: {}", path, e);
    }
}

#[derive(Default)]
struct HandleState {
    finished: bool,
    outcome: Option<CleanupProgress>,
    stats: CleanupStats,
}

/// Observer for a cleanup dispatched with [`spawn_cleanup`]
#[derive(Clone)]
pub struct CleanupHandle {
    cancel: Arc<AtomicBool>,
    state: Arc<(Mutex<HandleState>, Condvar)>,
}

impl CleanupHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.state.0.lock().finished
    }

    /// `Done` or `Cancelled` once finished
    pub fn outcome(&self) -> Option<CleanupProgress> {
        self.state.0.lock().outcome
    }

    pub fn stats(&self) -> CleanupStats {
        self.state.0.lock().stats
    }

    /// Block until the task finishes or `timeout` elapses; true if finished
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        cvar.wait_while_for(&mut state, |s| !s.finished, timeout);
        state.finished
    }
}

/// Run `task` on `executor` in chunks of `chunk` deletions
pub fn spawn_cleanup(
    mut task: CleanupTask,
    chunk: usize,
    executor: &dyn BackgroundExecutor,
) -> CleanupHandle {
    let handle = CleanupHandle {
        cancel: task.cancel_flag(),
        state: Arc::new((Mutex::new(HandleState::default()), Condvar::new())),
    };

    let state = Arc::clone(&handle.state);
    executor.execute(Box::new(move || {
        let outcome = loop {
            let progress = task.step(chunk.max(1));
            state.0.lock().stats = task.stats();
            if progress != CleanupProgress::Pending {
                break progress;
            }
        };

        let stats = task.stats();
        tracing::info!(
            "Cleanup {:?}: {} files, {} dirs removed, {} errors",
            outcome,
            stats.files_removed,
            stats.dirs_removed,
            stats.errors
        );

        let (lock, cvar) = &*state;
        let mut guard = lock.lock();
        guard.finished = true;
        guard.outcome = Some(outcome);
        guard.stats = stats;
        cvar.notify_all();
    }));

    handle
}
