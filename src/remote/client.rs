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


//! Remote control server client
//!
//! # Endpoints
//! - `GET  {base}/remote-devices/content-to-upload` - current manifest
//! - `POST {base}/remote-devices/exchange-info` - device state report
//!
//! Both requests authenticate with a `device_token` header.

use crate::config::ControlServerConfig;
use crate::error::{KioskError, Result};
use crate::manifest::ContentManifest;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MANIFEST_PATH: &str = "/remote-devices/content-to-upload";
pub const EXCHANGE_PATH: &str = "/remote-devices/exchange-info";

const DEVICE_TOKEN_HEADER: &str = "device_token";

/// Remote control server as seen by the download workflow
#[async_trait]
pub trait ControlServer: Send + Sync {
    /// Current manifest
    async fn fetch_manifest(&self) -> Result<ContentManifest>;

    /// Report device and download state, returning the server's instructions
    async fn send_exchange(&self, report: &ExchangeReport) -> Result<ExchangeInfo>;
}

// ============================================================================
// Exchange report (device -> server)
// ============================================================================

/// Body of the exchange POST
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExchangeReport {
    pub settings: DeviceSettings,
    pub player: Option<PlayerReport>,

    /// Present only while an item is being downloaded or accounted
    pub loading_info: Option<LoadingInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSettings {
    /// Usable bytes after the safety margin (may be negative)
    pub free_memory: i64,
    /// Battery level in percent
    pub charge: i32,
    pub volume: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerReport {
    pub current_duration: i64,
    #[serde(serialize_with = "numeric_id")]
    pub current_content_id: String,
    pub playback_state: PlaybackState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadingInfo {
    #[serde(serialize_with = "numeric_id")]
    pub loading_content_id: String,
    pub loaded_bytes_of_total: i64,
    pub last_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
    #[serde(other)]
    Unknown,
}

/// The server stores content ids as integers; send them as numbers when possible
fn numeric_id<S: Serializer>(id: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    match id.parse::<i64>() {
        Ok(n) => serializer.serialize_i64(n),
        Err(_) => serializer.serialize_str(id),
    }
}

// ============================================================================
// Exchange response (server -> device)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExchangeInfo {
    /// Empty or missing when no session is assigned to this device
    pub session_title: Option<String>,
    pub volume: Option<String>,
    pub player: Option<PlayerCommand>,
    pub management: Option<ManagementInfo>,
}

impl ExchangeInfo {
    pub fn has_session(&self) -> bool {
        self.session_title.as_deref().map_or(false, |t| !t.is_empty())
    }

    /// Management action requested by the server, if any
    pub fn action(&self) -> Option<ManagementAction> {
        self.management.as_ref().and_then(|m| m.action)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerCommand {
    pub id: Option<String>,
    pub title: Option<String>,
    pub current_duration: Option<String>,
    pub format: Option<String>,
    pub playback_state: Option<PlaybackState>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManagementInfo {
    pub need_centering: bool,
    #[serde(deserialize_with = "lenient_action")]
    pub action: Option<ManagementAction>,
}

/// Unknown actions are ignored instead of failing the whole response
fn lenient_action<'de, D>(deserializer: D) -> std::result::Result<Option<ManagementAction>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|a| ManagementAction::parse(&a).ok()))
}

/// Action the control server asks the device to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagementAction {
    #[serde(rename = "sync")]
    Sync,
    #[serde(rename = "rewind")]
    Rewind,
    #[serde(rename = "upload")]
    StartDownload,
    #[serde(rename = "stop upload")]
    StopDownload,
}

impl ManagementAction {
    pub fn parse(action: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(action.trim().to_string()))
            .map_err(|_| KioskError::invalid_input(format!("Unknown management action: {}", action)))
    }
}

// ============================================================================
// Device telemetry
// ============================================================================

/// Device state included in every exchange report
pub trait DeviceTelemetry: Send + Sync {
    fn battery_level(&self) -> i32;
    fn volume(&self) -> Option<i32>;
    fn player(&self) -> Option<PlayerReport>;
}

/// Telemetry for hosts that do not report device state
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetry;

impl DeviceTelemetry for NoTelemetry {
    fn battery_level(&self) -> i32 {
        0
    }

    fn volume(&self) -> Option<i32> {
        None
    }

    fn player(&self) -> Option<PlayerReport> {
        None
    }
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// Control server reached over HTTPS
#[derive(Debug, Clone)]
pub struct HttpControlServer {
    client: Client,
    base_url: String,
}

impl HttpControlServer {
    pub fn new(config: &ControlServerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            DEVICE_TOKEN_HEADER,
            HeaderValue::from_str(&config.device_token)
                .map_err(|e| KioskError::InvalidConfiguration(format!("Invalid device token: {}", e)))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_body(response: Response, path: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            KioskError::control_failed(
                format!("Failed to read response body: {}", e),
                Some(status.as_u16()),
                Some(path.to_string()),
            )
        })?;

        if !status.is_success() {
            return Err(KioskError::control_failed(
                format!("Request failed: {}", body),
                Some(status.as_u16()),
                Some(path.to_string()),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl ControlServer for HttpControlServer {
    async fn fetch_manifest(&self) -> Result<ContentManifest> {
        let response = self
            .client
            .get(self.endpoint(MANIFEST_PATH))
            .send()
            .await
            .map_err(|e| KioskError::control_failed(e.to_string(), None, Some(MANIFEST_PATH.to_string())))?;

        let body = Self::read_body(response, MANIFEST_PATH).await?;
        let manifest = ContentManifest::from_json(&body)?;
        tracing::debug!(items = manifest.len(), "Fetched content manifest");
        Ok(manifest)
    }

    async fn send_exchange(&self, report: &ExchangeReport) -> Result<ExchangeInfo> {
        let response = self
            .client
            .post(self.endpoint(EXCHANGE_PATH))
            .header(CONTENT_TYPE, "application/json")
            .json(report)
            .send()
            .await
            .map_err(|e| KioskError::control_failed(e.to_string(), None, Some(EXCHANGE_PATH.to_string())))?;

        let body = Self::read_body(response, EXCHANGE_PATH).await?;
        if body.trim().is_empty() {
            return Ok(ExchangeInfo::default());
        }
        Ok(serde_json::from_str(&body)?)
    }
}
