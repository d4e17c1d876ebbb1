// Kiosk Content Core - resumable content delivery for VR kiosks
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download progress and workflow events
//!
//! # Progress Information
//! - Item title and its position in the manifest
//! - Bytes downloaded / total bytes of the item
//! - Percentage complete
//!
//! Progress is emitted when an item starts and after every fetched chunk.

use serde::{Deserialize, Serialize};

/// Lifecycle of the download workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    /// No session
    Idle,
    /// Walking the manifest
    Running,
    /// Every item is on disk
    Completed,
    /// Stopped on request; chunk files are kept for resume
    Cancelled,
    /// No recovery possible, the host must start again
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Cancelled | WorkflowState::Failed
        )
    }
}

/// Progress snapshot for the item being downloaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub item_title: String,

    /// Position of the item in the manifest
    pub item_index: usize,
    pub item_count: usize,

    pub bytes_downloaded: u64,

    /// Total bytes of the item (0 if unknown)
    pub bytes_total: u64,
}

impl DownloadProgress {
    pub fn new(item_title: impl Into<String>, item_index: usize, item_count: usize, bytes_total: u64) -> Self {
        Self {
            item_title: item_title.into(),
            item_index,
            item_count,
            bytes_downloaded: 0,
            bytes_total,
        }
    }

    /// Percentage complete (0.0 - 100.0)
    pub fn percent_complete(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_downloaded as f64 / self.bytes_total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        let mb = bytes as f64 / 1_000_000.0;
        format!("{:.1} MB", mb)
    }

    /// Format progress as display string
    pub fn display_string(&self) -> String {
        format!(
            "{} ({}/{}): {:.1}% ({} / {})",
            self.item_title,
            self.item_index + 1,
            self.item_count,
            self.percent_complete(),
            Self::bytes_string(self.bytes_downloaded),
            Self::bytes_string(self.bytes_total)
        )
    }
}

/// Events published by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DownloadEvent {
    /// A network download of an item begins
    DownloadingStarted { title: String },
    ProgressChanged(DownloadProgress),
    /// The item's artifact is complete under its final name
    ItemCompleted { title: String, bytes: u64 },
    StateChanged(WorkflowState),
}
