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


//! Chunk merge into the final artifact
//!
//! # Algorithm
//! 1. Concatenate chunks in index order into `{final}.tmp`
//! 2. Verify the staged length
//! 3. Apply the optional transform to the staged file on the blocking pool
//! 4. Rename the staged file over the final name
//! 5. Delete the chunks
//!
//! The final name only ever refers to a complete artifact. Any failure removes
//! the staged file and keeps the chunks, so the next pass can merge again.

use crate::error::{KioskError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::staging_path;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Merge output buffer (1 MiB)
const MERGE_BUFFER_SIZE: usize = 1024 * 1024;

/// Marker byte written in front of video artifacts
pub const VIDEO_MARKER: u8 = 0x01;

/// One-time rewrite of a merged artifact
///
/// Runs on the blocking pool; implementations use plain `std::fs`.
pub trait ArtifactTransform: Send + Sync {
    /// Rewrite `path` in place
    fn apply(&self, path: &Path) -> Result<()>;

    /// Bytes the transform adds to the artifact
    fn added_len(&self) -> u64;
}

/// Prefixes the file with a single marker byte
///
/// The media player on the kiosk skips the marker; other players refuse the
/// file. It is a placeholder, not protection.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerTransform;

impl MarkerTransform {
    /// Original content of a marked artifact
    pub fn strip(bytes: &[u8]) -> &[u8] {
        match bytes.first() {
            Some(&VIDEO_MARKER) => &bytes[1..],
            _ => bytes,
        }
    }
}

impl ArtifactTransform for MarkerTransform {
    fn apply(&self, path: &Path) -> Result<()> {
        let marked = staging_path(path);
        let result = (|| -> std::io::Result<()> {
            let mut source = std::fs::File::open(path)?;
            let mut target = std::io::BufWriter::with_capacity(MERGE_BUFFER_SIZE, std::fs::File::create(&marked)?);
            target.write_all(&[VIDEO_MARKER])?;

            let mut buffer = vec![0u8; MERGE_BUFFER_SIZE];
            loop {
                let read = source.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                target.write_all(&buffer[..read])?;
            }
            target.flush()?;
            target.get_ref().sync_all()?;
            drop(target);
            drop(source);
            std::fs::rename(&marked, path)
        })();

        result.map_err(|e| {
            let _ = std::fs::remove_file(&marked);
            KioskError::MergeFailed(format!("Marker transform failed for {}: {}", path.display(), e))
        })
    }

    fn added_len(&self) -> u64 {
        1
    }
}

/// Concatenates verified chunks into final artifacts
#[derive(Debug, Clone)]
pub struct ArtifactMerger {
    yield_every: usize,
}

impl ArtifactMerger {
    pub fn new(yield_every: usize) -> Self {
        Self {
            yield_every: yield_every.max(1),
        }
    }

    /// Merge `chunks` in order into `final_path`
    ///
    /// `expected_len` is the content length before the transform. Returns the
    /// length of the final file.
    pub async fn merge(
        &self,
        chunks: &[PathBuf],
        final_path: &Path,
        expected_len: u64,
        transform: Option<Arc<dyn ArtifactTransform>>,
    ) -> Result<u64> {
        let staging = staging_path(final_path);

        let placed = match self.stage(chunks, &staging, expected_len, transform).await {
            Ok(final_len) => FileManager::rename_into_place(&staging, final_path)
                .await
                .map(|()| final_len),
            Err(e) => Err(e),
        };
        let final_len = match placed {
            Ok(final_len) => final_len,
            Err(e) => {
                let _ = FileManager::safe_delete(&staging).await;
                return Err(e);
            }
        };

        for chunk in chunks {
            if let Err(e) = FileManager::safe_delete(chunk).await {
                tracing::warn!(chunk = %chunk.display(), error = %e, "Could not delete merged chunk");
            }
        }
        tracing::info!(path = %final_path.display(), bytes = final_len, chunks = chunks.len(), "Artifact merged");
        Ok(final_len)
    }

    async fn stage(
        &self,
        chunks: &[PathBuf],
        staging: &Path,
        expected_len: u64,
        transform: Option<Arc<dyn ArtifactTransform>>,
    ) -> Result<u64> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(staging)
            .await
            .map_err(|e| KioskError::MergeFailed(format!("Failed to open {}: {}", staging.display(), e)))?;
        let mut writer = BufWriter::with_capacity(MERGE_BUFFER_SIZE, file);

        let mut copied = 0u64;
        for (i, chunk) in chunks.iter().enumerate() {
            let mut source = File::open(chunk)
                .await
                .map_err(|_| KioskError::ChunkMissing(chunk.display().to_string()))?;
            copied += tokio::io::copy(&mut source, &mut writer)
                .await
                .map_err(|e| KioskError::MergeFailed(format!("Copy of {} failed: {}", chunk.display(), e)))?;

            if (i + 1) % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| KioskError::MergeFailed(format!("Flush failed: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| KioskError::MergeFailed(format!("Sync failed: {}", e)))?;
        drop(writer);

        if copied != expected_len {
            return Err(KioskError::FileSizeMismatch {
                expected: expected_len,
                actual: copied,
            });
        }

        let Some(transform) = transform else {
            return Ok(copied);
        };

        let added = transform.added_len();
        let target = staging.to_path_buf();
        tokio::task::spawn_blocking(move || transform.apply(&target))
            .await
            .map_err(|e| KioskError::internal(format!("Transform task failed: {}", e)))??;

        Ok(copied + added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    const MIB: usize = 1024 * 1024;

    fn source_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn write_chunks(dir: &Path, data: &[u8], chunk_size: usize) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for (i, part) in data.chunks(chunk_size).enumerate() {
            let path = dir.join(format!("clip_part{}.tmp", i));
            fs::write(&path, part).await.unwrap();
            paths.push(path);
        }
        paths
    }

    struct FailingTransform;

    impl ArtifactTransform for FailingTransform {
        fn apply(&self, _path: &Path) -> Result<()> {
            Err(KioskError::MergeFailed("disk full".into()))
        }

        fn added_len(&self) -> u64 {
            0
        }
    }

    #[tokio::test]
    async fn test_merge_25_mib_round_trip() {
        let dir = TempDir::new().unwrap();
        let data = source_bytes(25 * MIB);
        let chunks = write_chunks(dir.path(), &data, 10 * MIB).await;
        assert_eq!(chunks.len(), 3);

        let final_path = dir.path().join("clip.png");
        let len = ArtifactMerger::new(10)
            .merge(&chunks, &final_path, data.len() as u64, None)
            .await
            .unwrap();

        assert_eq!(len, 25 * MIB as u64);
        assert_eq!(fs::read(&final_path).await.unwrap(), data);
        assert!(chunks.iter().all(|c| !c.exists()));
        assert!(!staging_path(&final_path).exists());
    }

    #[tokio::test]
    async fn test_merge_with_marker() {
        let dir = TempDir::new().unwrap();
        let data = source_bytes(25 * MIB);
        let chunks = write_chunks(dir.path(), &data, 10 * MIB).await;

        let final_path = dir.path().join("clip.mp4");
        let len = ArtifactMerger::new(1)
            .merge(&chunks, &final_path, data.len() as u64, Some(Arc::new(MarkerTransform)))
            .await
            .unwrap();

        assert_eq!(len, 25 * MIB as u64 + 1);
        let merged = fs::read(&final_path).await.unwrap();
        assert_eq!(merged.len(), 25 * MIB + 1);
        assert_eq!(merged[0], VIDEO_MARKER);
        assert_eq!(MarkerTransform::strip(&merged), &data[..]);
    }

    #[tokio::test]
    async fn test_vanished_chunk_leaves_no_final_file() {
        let dir = TempDir::new().unwrap();
        let data = source_bytes(30);
        let chunks = write_chunks(dir.path(), &data, 10).await;
        fs::remove_file(&chunks[1]).await.unwrap();

        let final_path = dir.path().join("clip.mp4");
        let result = ArtifactMerger::new(10).merge(&chunks, &final_path, 30, None).await;

        assert!(matches!(result, Err(KioskError::ChunkMissing(_))));
        assert!(!final_path.exists());
        assert!(!staging_path(&final_path).exists());
        assert!(chunks[0].exists());
        assert!(chunks[2].exists());
    }

    #[tokio::test]
    async fn test_length_mismatch_and_failed_transform_leave_no_final_file() {
        let dir = TempDir::new().unwrap();
        let data = source_bytes(30);
        let chunks = write_chunks(dir.path(), &data, 10).await;
        let final_path = dir.path().join("clip.mp4");
        let merger = ArtifactMerger::new(10);

        let short = merger.merge(&chunks, &final_path, 31, None).await;
        assert!(matches!(short, Err(KioskError::FileSizeMismatch { expected: 31, actual: 30 })));
        assert!(!final_path.exists());

        let failed = merger
            .merge(&chunks, &final_path, 30, Some(Arc::new(FailingTransform)))
            .await;
        assert!(failed.is_err());
        assert!(!final_path.exists());
        assert!(chunks.iter().all(|c| c.exists()));
    }

    #[tokio::test]
    async fn test_failed_rename_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let data = source_bytes(30);
        let chunks = write_chunks(dir.path(), &data, 10).await;

        // A non-empty directory cannot be replaced by a file
        let final_path = dir.path().join("clip.mp4");
        fs::create_dir(&final_path).await.unwrap();
        fs::write(final_path.join("keep"), b"x").await.unwrap();

        let result = ArtifactMerger::new(10).merge(&chunks, &final_path, 30, None).await;

        assert!(matches!(result, Err(KioskError::FileIoError(_))));
        assert!(!staging_path(&final_path).exists());
        assert!(final_path.is_dir());
        assert!(chunks.iter().all(|c| c.exists()));
    }

    #[test]
    fn test_strip_unmarked() {
        assert_eq!(MarkerTransform::strip(&[2, 3]), &[2, 3]);
        assert_eq!(MarkerTransform::strip(&[VIDEO_MARKER, 3]), &[3]);
        assert_eq!(MarkerTransform::strip(&[]), &[] as &[u8]);
    }
}
