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


//! Resumable chunked content download
//!
//! Content is fetched in fixed-size byte ranges, each persisted as its own
//! temp file, then merged into the final artifact. Chunk files double as the
//! resume state: a file with the expected length is never fetched again.

pub mod chunks;
pub mod fetcher;
pub mod merger;
pub mod orchestrator;
pub mod progress;
pub mod session;

// Re-export commonly used types
pub use chunks::{ChunkDescriptor, ChunkStore};
pub use fetcher::{HttpRangeFetcher, RangeFetcher, RemoteLength};
pub use merger::{ArtifactMerger, ArtifactTransform, MarkerTransform};
pub use orchestrator::{DownloadOrchestrator, DownloadOrchestratorBuilder};
pub use progress::{DownloadEvent, DownloadProgress, WorkflowState};
pub use session::{DownloadSession, SessionSnapshot};
