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


//! Chunk planning and the on-disk chunk namespace
//!
//! A chunk file's length is the only record of its completion. Nothing else is
//! persisted, so the state after a crash is always re-derived from the
//! directory listing.

use crate::error::Result;
use crate::file::manager::FileManager;
use crate::file::paths::{is_chunk_file_of, is_temp_file_name, PathBuilder};
use std::path::{Path, PathBuf};

/// One byte range of an item and the temp file holding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDescriptor {
    pub owner_title: String,
    pub index: usize,
    pub byte_start: u64,
    /// Inclusive
    pub byte_end: u64,
    pub temp_path: PathBuf,
}

impl ChunkDescriptor {
    pub fn expected_length(&self) -> u64 {
        self.byte_end - self.byte_start + 1
    }
}

/// Temp chunk files inside one content location
#[derive(Debug, Clone)]
pub struct ChunkStore {
    paths: PathBuilder,
}

impl ChunkStore {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathBuilder::new(location),
        }
    }

    pub fn location(&self) -> &Path {
        self.paths.location()
    }

    pub fn chunk_path(&self, title: &str, index: usize) -> PathBuf {
        self.paths.chunk_path(title, index)
    }

    /// Split `total` bytes into ranges of `chunk_size`, the last one shorter
    pub fn plan(&self, title: &str, total: u64, chunk_size: u64) -> Vec<ChunkDescriptor> {
        if total == 0 || chunk_size == 0 {
            return Vec::new();
        }

        let estimated = total.div_ceil(chunk_size) as usize;
        let mut chunks = Vec::with_capacity(estimated);
        let mut start = 0;
        let mut index = 0;

        while start < total {
            let end = (start + chunk_size - 1).min(total - 1);
            chunks.push(ChunkDescriptor {
                owner_title: title.to_string(),
                index,
                byte_start: start,
                byte_end: end,
                temp_path: self.chunk_path(title, index),
            });
            index += 1;
            start = end + 1;
        }

        chunks
    }

    /// True iff the file exists and its length equals `expected_length` exactly
    pub async fn is_chunk_complete(&self, path: &Path, expected_length: u64) -> bool {
        FileManager::verify_file_integrity(path, expected_length).await
    }

    /// Paths of the complete chunks in index order, stopping at the first gap
    ///
    /// Chunks after a missing or short one are not usable for a merge; the
    /// range walk re-fetches from the gap onward.
    pub async fn list_completed_chunks_in_order(&self, plan: &[ChunkDescriptor]) -> Vec<PathBuf> {
        let mut completed = Vec::with_capacity(plan.len());
        for chunk in plan {
            if !self.is_chunk_complete(&chunk.temp_path, chunk.expected_length()).await {
                break;
            }
            completed.push(chunk.temp_path.clone());
        }
        completed
    }

    /// Delete every chunk file of one item
    pub async fn purge_item(&self, title: &str) -> Result<usize> {
        let removed =
            FileManager::delete_matching(self.location(), |name| is_chunk_file_of(name, title)).await?;
        tracing::debug!(title, removed, "Purged item chunks");
        Ok(removed)
    }

    /// Delete every temp-pattern file in the content location
    pub async fn purge_stray_temp_files(&self) -> Result<usize> {
        FileManager::delete_matching(self.location(), is_temp_file_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_plan_25_mib_in_10_mib_chunks() {
        let store = ChunkStore::new("/content");
        let plan = store.plan("ocean", 25 * MIB, 10 * MIB);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].byte_start, 0);
        assert_eq!(plan[0].byte_end, 10 * MIB - 1);
        assert_eq!(plan[1].expected_length(), 10 * MIB);
        assert_eq!(plan[2].byte_start, 20 * MIB);
        assert_eq!(plan[2].byte_end, 25 * MIB - 1);
        assert_eq!(plan[2].expected_length(), 5 * MIB);
        assert_eq!(plan[2].temp_path, PathBuf::from("/content/ocean_part2.tmp"));
        assert_eq!(plan.iter().map(|c| c.expected_length()).sum::<u64>(), 25 * MIB);
    }

    #[test]
    fn test_plan_exact_multiple_and_empty() {
        let store = ChunkStore::new("/content");
        assert_eq!(store.plan("a", 20, 10).len(), 2);
        assert_eq!(store.plan("a", 1, 10).len(), 1);
        assert!(store.plan("a", 0, 10).is_empty());
    }

    #[tokio::test]
    async fn test_chunk_completeness_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let path = store.chunk_path("a", 0);
        let expected = 100;

        fs::write(&path, vec![1u8; 99]).await.unwrap();
        assert!(!store.is_chunk_complete(&path, expected).await);

        fs::write(&path, vec![1u8; 100]).await.unwrap();
        assert!(store.is_chunk_complete(&path, expected).await);

        fs::write(&path, vec![1u8; 101]).await.unwrap();
        assert!(!store.is_chunk_complete(&path, expected).await);

        assert!(!store.is_chunk_complete(&store.chunk_path("a", 9), expected).await);
    }

    #[tokio::test]
    async fn test_completed_chunks_stop_at_gap() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        let plan = store.plan("a", 40, 10);

        fs::write(&plan[0].temp_path, vec![0u8; 10]).await.unwrap();
        fs::write(&plan[1].temp_path, vec![0u8; 10]).await.unwrap();
        fs::write(&plan[3].temp_path, vec![0u8; 10]).await.unwrap();

        let completed = store.list_completed_chunks_in_order(&plan).await;
        assert_eq!(completed, vec![plan[0].temp_path.clone(), plan[1].temp_path.clone()]);
    }

    #[tokio::test]
    async fn test_purge_item_leaves_other_items() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        for name in ["a_part0.tmp", "a_part1.tmp", "ab_part0.tmp", "a.mp4"] {
            fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        assert_eq!(store.purge_item("a").await.unwrap(), 2);
        assert!(dir.path().join("ab_part0.tmp").exists());
        assert!(dir.path().join("a.mp4").exists());

        assert_eq!(store.purge_stray_temp_files().await.unwrap(), 1);
        assert!(dir.path().join("a.mp4").exists());
    }

    #[tokio::test]
    async fn test_purge_item_spares_title_with_part_suffix() {
        let dir = TempDir::new().unwrap();
        let store = ChunkStore::new(dir.path());
        for name in ["a_part0.tmp", "a_part_part0.tmp", "a_part_part1.tmp"] {
            fs::write(dir.path().join(name), b"x").await.unwrap();
        }

        assert_eq!(store.purge_item("a").await.unwrap(), 1);
        assert!(!dir.path().join("a_part0.tmp").exists());
        assert!(dir.path().join("a_part_part0.tmp").exists());
        assert!(dir.path().join("a_part_part1.tmp").exists());

        assert_eq!(store.purge_item("a_part").await.unwrap(), 2);
    }
}
