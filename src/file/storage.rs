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


//! Storage governance
//!
//! Chooses where content lives (removable card first, platform download
//! directory otherwise), reports usable free space after the safety margin
//! and sweeps files the control server no longer lists.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::file::manager::FileManager;
use crate::file::paths::{is_temp_file_name, name_matches_any_title};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::Disks;

/// Raw free space of the filesystem holding a path
pub trait SpaceProbe: Send + Sync {
    /// `None` when the space cannot be determined
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Space probe backed by the OS disk list
///
/// Picks the disk with the longest mount point that contains the path.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSpaceProbe;

impl SpaceProbe for SysinfoSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        let mut best: Option<(usize, u64)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point();
            if target.starts_with(mount) {
                let score = mount.as_os_str().len();
                match best {
                    Some((best_score, _)) if best_score >= score => {}
                    _ => best = Some((score, disk.available_space())),
                }
            }
        }

        best.map(|(_, available)| available)
    }
}

/// Content location and capacity rules
#[derive(Clone)]
pub struct StorageGovernor {
    config: StorageConfig,
    probe: Arc<dyn SpaceProbe>,
}

impl StorageGovernor {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_probe(config, Arc::new(SysinfoSpaceProbe))
    }

    pub fn with_probe(config: StorageConfig, probe: Arc<dyn SpaceProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Card mount point if configured and present
    fn usable_sd_card(&self) -> Option<PathBuf> {
        let raw = self.config.sd_card_path.as_ref()?;
        let trimmed = raw
            .to_string_lossy()
            .trim_end_matches(|c| c == '/' || c == '\\' || c == ' ')
            .to_string();
        if trimmed.is_empty() {
            return None;
        }
        let path = PathBuf::from(trimmed);
        path.is_dir().then_some(path)
    }

    /// Root of the active storage target, before the gallery folder
    pub fn storage_root(&self) -> PathBuf {
        self.usable_sd_card()
            .unwrap_or_else(|| self.config.primary_path.clone())
    }

    /// Content directory path without touching the filesystem
    pub fn content_location(&self) -> PathBuf {
        self.storage_root().join(&self.config.gallery_folder_name)
    }

    /// Content directory, created if absent
    pub async fn resolve_content_location(&self) -> Result<PathBuf> {
        let location = self.content_location();
        FileManager::ensure_directory_exists(&location).await?;
        Ok(location)
    }

    /// Free space minus the safety margin
    ///
    /// Negative values mean there is no usable space. A failed probe reports 0.
    pub fn free_space_bytes(&self) -> i64 {
        let root = self.storage_root();
        match self.probe.available_bytes(&root) {
            Some(raw) => {
                let usable = raw as i128 - self.config.safety_margin_bytes as i128;
                usable.clamp(i64::MIN as i128, i64::MAX as i128) as i64
            }
            None => {
                tracing::warn!(root = %root.display(), "Could not determine free space");
                0
            }
        }
    }

    /// Delete every content file whose name does not start with a kept title
    ///
    /// Chunk files share their item's title prefix, so in-progress chunks of
    /// listed items survive.
    pub async fn clean_all_except(&self, keep_titles: &HashSet<String>) -> Result<usize> {
        let location = self.content_location();
        let removed =
            FileManager::delete_matching(&location, |name| !name_matches_any_title(name, keep_titles)).await?;
        if removed > 0 {
            tracing::info!(removed, location = %location.display(), "Removed content not in manifest");
        }
        Ok(removed)
    }

    /// Delete every partial-download artifact
    pub async fn delete_temp_artifacts(&self) -> Result<usize> {
        let location = self.content_location();
        let removed = FileManager::delete_matching(&location, is_temp_file_name).await?;
        tracing::debug!(removed, "Deleted temp artifacts");
        Ok(removed)
    }

    /// Delete all content, used when the device has no session assigned
    pub async fn clean_all(&self) -> Result<usize> {
        let location = self.content_location();
        let removed = FileManager::delete_matching(&location, |_| true).await?;
        tracing::info!(removed, location = %location.display(), "Cleared content folder");
        Ok(removed)
    }
}

impl std::fmt::Debug for StorageGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGovernor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    const GIB: u64 = 1024 * 1024 * 1024;

    struct FixedProbe(Option<u64>);

    impl SpaceProbe for FixedProbe {
        fn available_bytes(&self, _path: &Path) -> Option<u64> {
            self.0
        }
    }

    fn governor(root: &Path, raw: Option<u64>) -> StorageGovernor {
        let config = StorageConfig {
            primary_path: root.to_path_buf(),
            ..StorageConfig::default()
        };
        StorageGovernor::with_probe(config, Arc::new(FixedProbe(raw)))
    }

    #[test]
    fn test_free_space_subtracts_margin() {
        let dir = TempDir::new().unwrap();
        assert_eq!(governor(dir.path(), Some(6 * GIB)).free_space_bytes(), GIB as i64);
    }

    #[test]
    fn test_free_space_may_be_negative() {
        let dir = TempDir::new().unwrap();
        assert_eq!(governor(dir.path(), Some(4 * GIB)).free_space_bytes(), -(GIB as i64));
    }

    #[test]
    fn test_free_space_probe_failure_is_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(governor(dir.path(), None).free_space_bytes(), 0);
    }

    #[tokio::test]
    async fn test_resolve_prefers_sd_card() {
        let primary = TempDir::new().unwrap();
        let card = TempDir::new().unwrap();

        let mut config = StorageConfig {
            primary_path: primary.path().to_path_buf(),
            sd_card_path: Some(PathBuf::from(format!("{}/ ", card.path().display()))),
            ..StorageConfig::default()
        };
        let on_card = StorageGovernor::with_probe(config.clone(), Arc::new(FixedProbe(None)))
            .resolve_content_location()
            .await
            .unwrap();
        assert_eq!(on_card, card.path().join("RCMS Gallery"));
        assert!(on_card.is_dir());

        config.sd_card_path = Some(card.path().join("unmounted"));
        let fallback = StorageGovernor::with_probe(config, Arc::new(FixedProbe(None)))
            .resolve_content_location()
            .await
            .unwrap();
        assert_eq!(fallback, primary.path().join("RCMS Gallery"));
    }

    #[tokio::test]
    async fn test_clean_all_except_respects_manifest() {
        let dir = TempDir::new().unwrap();
        let gov = governor(dir.path(), None);
        let location = gov.resolve_content_location().await.unwrap();
        for name in ["a.mp4", "b.mp4", "c.png", "a_part1.tmp", "b_part0.tmp"] {
            fs::write(location.join(name), b"x").await.unwrap();
        }

        let keep: HashSet<String> = ["a", "c"].iter().map(|s| s.to_string()).collect();
        let removed = gov.clean_all_except(&keep).await.unwrap();

        assert_eq!(removed, 2);
        assert!(location.join("a.mp4").exists());
        assert!(location.join("c.png").exists());
        assert!(location.join("a_part1.tmp").exists());
        assert!(!location.join("b.mp4").exists());
        assert!(!location.join("b_part0.tmp").exists());
    }

    #[tokio::test]
    async fn test_delete_temp_artifacts_and_clean_all() {
        let dir = TempDir::new().unwrap();
        let gov = governor(dir.path(), None);
        let location = gov.resolve_content_location().await.unwrap();
        for name in ["a.mp4", "a_part0.tmp", "b.mp4.TMP"] {
            fs::write(location.join(name), b"x").await.unwrap();
        }

        assert_eq!(gov.delete_temp_artifacts().await.unwrap(), 2);
        assert!(location.join("a.mp4").exists());

        assert_eq!(gov.clean_all().await.unwrap(), 1);
        assert!(!location.join("a.mp4").exists());
    }
}
