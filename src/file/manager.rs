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


//! File primitives for the content directory
//!
//! # Key Operations
//! - Safe delete (retry, missing file is not an error)
//! - Atomic rename into place
//! - Existence and size checks
//! - Directory sweeps with a name predicate

use crate::error::{KioskError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// File manager for safe file operations
#[derive(Debug, Default, Clone, Copy)]
pub struct FileManager;

impl FileManager {
    /// Safe delete operation with retry
    ///
    /// Media players on the kiosk may briefly hold files open, so a failed
    /// delete is retried a few times before giving up.
    pub async fn safe_delete(path: &Path) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match Self::safe_delete_once(path).await {
                Ok(()) => return Ok(()),
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(KioskError::FileIoError(format!(
                        "Failed to delete file after {} attempts: {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        path.display(),
                        e
                    )));
                }
                Err(_) => {
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            }
        }
    }

    /// Try to delete file once
    async fn safe_delete_once(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KioskError::FileIoError(format!(
                "Delete failed: {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Ensure directory exists, creating parent directories as needed
    pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
        if fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::create_dir_all(path).await.map_err(|e| {
            KioskError::StorageUnavailable(format!(
                "Failed to create directory {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Check if file exists
    pub async fn file_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Length of a regular file, `None` if it does not exist
    pub async fn file_len(path: &Path) -> Option<u64> {
        match fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Some(metadata.len()),
            _ => None,
        }
    }

    /// Verify file integrity by checking size
    pub async fn verify_file_integrity(path: &Path, expected_size: u64) -> bool {
        Self::file_len(path).await == Some(expected_size)
    }

    /// Replace `destination` with `source` in one rename
    ///
    /// Both paths must be on the same filesystem; callers stage next to the
    /// destination so observers see either nothing or the complete file.
    pub async fn rename_into_place(source: &Path, destination: &Path) -> Result<()> {
        fs::rename(source, destination).await.map_err(|e| {
            KioskError::FileIoError(format!(
                "Rename failed: {} -> {}: {}",
                source.display(),
                destination.display(),
                e
            ))
        })
    }

    /// Regular files directly inside `dir`
    pub async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let mut entries = fs::read_dir(dir).await.map_err(|e| {
            KioskError::FileIoError(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            KioskError::FileIoError(format!(
                "Failed to read directory entry in {}: {}",
                dir.display(),
                e
            ))
        })? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file {
                files.push(entry.path());
            }
        }

        Ok(files)
    }

    /// Delete every file in `dir` whose name satisfies `predicate`
    ///
    /// Returns how many files were removed. Individual delete failures are
    /// logged and skipped so one locked file does not stop the sweep.
    pub async fn delete_matching<F>(dir: &Path, predicate: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        if !Self::file_exists(dir).await {
            return Ok(0);
        }

        let mut count = 0;
        for path in Self::list_files(dir).await? {
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !predicate(name) {
                continue;
            }
            match Self::safe_delete(&path).await {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Could not delete file"),
            }
        }

        Ok(count)
    }
}
