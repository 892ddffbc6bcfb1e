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

//! Telemetry kinds and captured artifact formats

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scope of a buffered telemetry artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetryKind {
    Span,
    Log,
    SessionReplay,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 3] = [
        TelemetryKind::Span,
        TelemetryKind::Log,
        TelemetryKind::SessionReplay,
    ];

    /// Stable name used in directory names and preference keys
    pub fn as_str(&self) -> &'static str {
        match self {
            TelemetryKind::Span => "span",
            TelemetryKind::Log => "log",
            TelemetryKind::SessionReplay => "session-replay",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TelemetryKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StorageError::InvalidArgument(format!("unknown telemetry kind: {s}")))
    }
}

/// Image encoding of a session-replay video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl FrameFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpg",
            FrameFormat::Png => "png",
            FrameFormat::Webp => "webp",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "jpg" | "jpeg" => Some(FrameFormat::Jpeg),
            "png" => Some(FrameFormat::Png),
            "webp" => Some(FrameFormat::Webp),
            _ => None,
        }
    }
}
