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

//! Telestash CLI
//!
//! Inspection and maintenance of an on-device telemetry storage root.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use telestash_core::{StorageConfig, TelemetryKind};
use telestash_storage::{InlineExecutor, LocalFsBackend, TelemetryStorage};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "telestash")]
#[command(about = "Telestash - on-device telemetry storage", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base directory holding the storage roots
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show root location and space usage
    Info,

    /// List session ids
    Sessions,

    /// List record indexes of a session
    Records {
        /// Session ID
        session: String,
    },

    /// Delete the oldest session, never the one given
    PruneOldest {
        /// Session to keep (the active one)
        #[arg(long)]
        keep: String,
    },

    /// Delete a session and everything under it
    DeleteSession {
        /// Session ID
        id: String,
    },

    /// List buffered ids awaiting delivery
    Buffered {
        /// Telemetry kind (span, log, session-replay)
        kind: TelemetryKind,
    },

    /// Forget all buffered ids of a kind
    ClearBuffered {
        /// Telemetry kind (span, log, session-replay)
        kind: TelemetryKind,
    },

    /// Delete roots left by other schema versions or backend modes
    Cleanup,
}

#[derive(Serialize)]
struct StorageInfo {
    root: PathBuf,
    schema_version: u32,
    free_space_bytes: u64,
    occupied_bytes: u64,
    storage_full: bool,
    stale_roots: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = StorageConfig::load(cli.config.clone()).context("Failed to load config")?;
    if let Some(base_dir) = &cli.base_dir {
        config.base_dir = Some(base_dir.clone());
    }

    let storage = TelemetryStorage::open(config, Arc::new(LocalFsBackend::new()))
        .context("Failed to open storage")?;

    match cli.command {
        Commands::Info => {
            let stats = StorageInfo {
                root: storage.root_dir_path().to_path_buf(),
                schema_version: storage.config().schema_version,
                free_space_bytes: storage.free_space(),
                occupied_bytes: storage.occupied_size(),
                storage_full: storage.is_storage_full(),
                stale_roots: storage.stale_roots(),
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Telestash Storage");
                println!("=================");
                println!("  Root: {}", stats.root.display());
                println!("  Schema: v{}", stats.schema_version);
                println!("  Free space: {:.2} MB", to_mb(stats.free_space_bytes));
                println!("  Occupied: {:.2} MB", to_mb(stats.occupied_bytes));
                println!("  Full: {}", if stats.storage_full { "yes" } else { "no" });
                if !stats.stale_roots.is_empty() {
                    println!("  Stale roots:");
                    for root in &stats.stale_roots {
                        println!("    {}", root.display());
                    }
                }
            }
        }

        Commands::Sessions => {
            let sessions = storage.session_ids();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else if sessions.is_empty() {
                println!("No sessions stored.");
            } else {
                println!("Sessions ({}):", sessions.len());
                for session in &sessions {
                    println!("  {} ({} records)", session, storage.record_indexes(session).len());
                }
            }
        }

        Commands::Records { session } => {
            let indexes = storage.record_indexes(&session);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&indexes)?);
            } else {
                println!("Records of {}: {}", session, indexes.len());
                for index in indexes {
                    let frames = storage.video_frame_indexes(&session, index).len();
                    let video = storage.is_video_file_available(&session, index);
                    println!(
                        "  #{} - frames: {}, video: {}",
                        index,
                        frames,
                        if video { "yes" } else { "no" }
                    );
                }
            }
        }

        Commands::PruneOldest { keep } => {
            let deleted = storage.delete_oldest_session(&keep);
            if cli.json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                match deleted {
                    Some(session) => println!("✓ Deleted session {}", session),
                    None => println!("No session other than {} to delete", keep),
                }
            }
        }

        Commands::DeleteSession { id } => {
            let deleted = storage.delete_session(&id);
            if cli.json {
                println!("{}", serde_json::json!({ "session": id, "deleted": deleted }));
            } else if deleted {
                println!("✓ Deleted session {}", id);
            } else {
                println!("✗ Session {} not found", id);
            }
        }

        Commands::Buffered { kind } => {
            let ids = storage.buffered_ids(kind);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                println!("Buffered {} ids: {}", kind, ids.len());
                for id in ids {
                    println!("  {}", id);
                }
            }
        }

        Commands::ClearBuffered { kind } => {
            let cleared = storage.clear_buffered_ids(kind);
            if cli.json {
                println!("{}", serde_json::json!({ "kind": kind.as_str(), "cleared": cleared }));
            } else if cleared {
                println!("✓ Cleared buffered {} ids", kind);
            } else {
                anyhow::bail!("Failed to clear buffered {} ids", kind);
            }
        }

        Commands::Cleanup => {
            let handle = storage.schedule_stale_root_cleanup(&InlineExecutor);
            let stats = handle.stats();
            info!("Stale root cleanup finished: {:?}", handle.outcome());
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "files_removed": stats.files_removed,
                        "dirs_removed": stats.dirs_removed,
                        "errors": stats.errors,
                    })
                );
            } else {
                println!(
                    "✓ Removed {} files and {} directories ({} errors)",
                    stats.files_removed, stats.dirs_removed, stats.errors
                );
            }
        }
    }

    Ok(())
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
