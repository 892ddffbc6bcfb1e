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

//! Telestash Core
//!
//! Shared types for the on-device telemetry persistence engine: the error
//! type, engine configuration, telemetry kinds and typed preference keys.

pub mod config;
pub mod error;
pub mod preference;
pub mod telemetry;

pub use config::{
    StorageConfig, StoragePolicy, DEFAULT_MAX_OCCUPIED_SPACE_BYTES,
    DEFAULT_MAX_OCCUPIED_SPACE_PERCENTAGE, DEFAULT_MIN_FREE_SPACE_BYTES, DEFAULT_ROOT_NAME,
    DEFAULT_SCHEMA_VERSION,
};
pub use error::{ErrorKind, Result, StorageError};
pub use preference::{PreferenceKey, PreferenceType, PreferenceValue};
pub use telemetry::{FrameFormat, TelemetryKind};
