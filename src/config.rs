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


//! Configuration for the content downloader
//!
//! The host passes a JSON document on initialization. Every section and field
//! has a default, so a partial document (or `{}`) is valid.
//!
//! ```json
//! {
//!   "control": { "production": true, "device_token": "abc" },
//!   "storage": { "primary_path": "/storage/emulated/0/Download" }
//! }
//! ```

use crate::error::{KioskError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Size of one byte range (10 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Absolute timeout for one range request, in minutes (24 hours)
pub const DEFAULT_REQUEST_TIMEOUT_MINUTES: u64 = 1440;

/// Bytes requested when probing the total content length
pub const DEFAULT_PROBE_RANGE_BYTES: u64 = 1024;

/// Merge yields to the scheduler after this many chunks
pub const DEFAULT_MERGE_YIELD_EVERY: usize = 10;

/// Pause before re-pulling the manifest after an aborted item
pub const DEFAULT_RESTART_DELAY_MILLIS: u64 = 3000;

/// Headroom kept free on the content storage (5 GiB)
pub const DEFAULT_SAFETY_MARGIN_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Folder created inside the selected storage root
pub const DEFAULT_GALLERY_FOLDER: &str = "RCMS Gallery";

const DEFAULT_DEV_BASE_URL: &str = "https://dev.vrvr.global/api";
const DEFAULT_PROD_BASE_URL: &str = "https://st.vrvr.global/api";
const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 30;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    pub downloader: DownloaderConfig,
    pub control: ControlServerConfig,
    pub storage: StorageConfig,
}

impl KioskConfig {
    /// Parse configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| KioskError::InvalidConfiguration(format!("Invalid JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            KioskError::InvalidConfiguration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.downloader.chunk_size == 0 {
            return Err(KioskError::InvalidConfiguration("chunk_size must be greater than zero".into()));
        }
        if self.downloader.probe_range_bytes == 0 {
            return Err(KioskError::InvalidConfiguration("probe_range_bytes must be greater than zero".into()));
        }
        if self.downloader.merge_yield_every == 0 {
            return Err(KioskError::InvalidConfiguration("merge_yield_every must be greater than zero".into()));
        }
        if self.storage.primary_path.as_os_str().is_empty() {
            return Err(KioskError::InvalidConfiguration("storage.primary_path is empty".into()));
        }
        if self.storage.gallery_folder_name.trim().is_empty() {
            return Err(KioskError::InvalidConfiguration("storage.gallery_folder_name is empty".into()));
        }
        Ok(())
    }
}

/// Download workflow tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Byte length of every range except the last
    pub chunk_size: u64,

    /// Absolute timeout of one range request
    pub request_timeout_minutes: u64,

    /// Length of the range used to discover the total size
    pub probe_range_bytes: u64,

    /// Yield to the runtime after this many merged chunks
    pub merge_yield_every: usize,

    /// Delay before an outer restart
    pub restart_delay_millis: u64,

    /// Prefix video artifacts with the one-byte marker
    pub apply_video_marker: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout_minutes: DEFAULT_REQUEST_TIMEOUT_MINUTES,
            probe_range_bytes: DEFAULT_PROBE_RANGE_BYTES,
            merge_yield_every: DEFAULT_MERGE_YIELD_EVERY,
            restart_delay_millis: DEFAULT_RESTART_DELAY_MILLIS,
            apply_video_marker: true,
        }
    }
}

impl DownloaderConfig {
    pub fn builder() -> DownloaderConfigBuilder {
        DownloaderConfigBuilder::new()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_minutes.saturating_mul(60))
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_millis)
    }
}

/// Builder for DownloaderConfig
#[derive(Debug)]
pub struct DownloaderConfigBuilder {
    config: DownloaderConfig,
}

impl DownloaderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: DownloaderConfig::default(),
        }
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn request_timeout_minutes(mut self, minutes: u64) -> Self {
        self.config.request_timeout_minutes = minutes;
        self
    }

    pub fn probe_range_bytes(mut self, bytes: u64) -> Self {
        self.config.probe_range_bytes = bytes;
        self
    }

    pub fn merge_yield_every(mut self, chunks: usize) -> Self {
        self.config.merge_yield_every = chunks;
        self
    }

    pub fn restart_delay(mut self, delay: Duration) -> Self {
        self.config.restart_delay_millis = delay.as_millis() as u64;
        self
    }

    pub fn apply_video_marker(mut self, enable: bool) -> Self {
        self.config.apply_video_marker = enable;
        self
    }

    pub fn build(self) -> DownloaderConfig {
        self.config
    }
}

impl Default for DownloaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote control server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlServerConfig {
    /// Use the production endpoint instead of the development one
    pub production: bool,
    pub dev_base_url: String,
    pub prod_base_url: String,

    /// Token issued to this device at registration
    pub device_token: String,

    pub request_timeout_secs: u64,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self {
            production: false,
            dev_base_url: DEFAULT_DEV_BASE_URL.to_string(),
            prod_base_url: DEFAULT_PROD_BASE_URL.to_string(),
            device_token: String::new(),
            request_timeout_secs: DEFAULT_CONTROL_TIMEOUT_SECS,
        }
    }
}

impl ControlServerConfig {
    /// Base URL selected by the `production` flag
    pub fn base_url(&self) -> &str {
        if self.production {
            &self.prod_base_url
        } else {
            &self.dev_base_url
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Content storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mount point of the removable card, if the host found one
    pub sd_card_path: Option<PathBuf>,

    /// Platform download directory used when no card is usable
    pub primary_path: PathBuf,

    pub gallery_folder_name: String,

    /// Bytes subtracted from the raw free space
    pub safety_margin_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sd_card_path: None,
            primary_path: PathBuf::from("."),
            gallery_folder_name: DEFAULT_GALLERY_FOLDER.to_string(),
            safety_margin_bytes: DEFAULT_SAFETY_MARGIN_BYTES,
        }
    }
}
