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


//! Byte-range fetching over HTTP
//!
//! # Behavior
//! - One attempt per call, no retry; the orchestrator restarts the item instead
//! - Body is streamed straight into the destination, truncating it first
//! - On failure the destination is left as is; a short file fails the length
//!   check on the next pass
//!
//! # Size probe
//! The total length comes from a small range request: `Content-Range: bytes 0-1023/TOTAL`
//! on a 206. Hosts that ignore `Range` answer 200, in which case `Content-Length`
//! is the full size and the content can only be fetched as one whole-body range.

use crate::config::DownloaderConfig;
use crate::error::{KioskError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Write buffer for chunk files
const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Size of remote content as reported by the size probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteLength {
    pub total: u64,

    /// False when the host answered the probe with the whole body
    pub accepts_ranges: bool,
}

impl RemoteLength {
    pub fn ranged(total: u64) -> Self {
        Self { total, accepts_ranges: true }
    }

    pub fn whole_body(total: u64) -> Self {
        Self { total, accepts_ranges: false }
    }
}

/// Fetches byte ranges of remote content
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Total length of the remote content
    async fn probe_total_length(&self, url: &str) -> Result<RemoteLength>;

    /// Fetch `start..=end` into `destination`, returning the bytes written
    async fn fetch(&self, url: &str, start: u64, end: u64, destination: &Path) -> Result<u64>;
}

/// Range fetcher backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpRangeFetcher {
    client: Client,
    probe_range_bytes: u64,
}

impl HttpRangeFetcher {
    pub fn new(config: &DownloaderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config.probe_range_bytes))
    }

    pub fn with_client(client: Client, probe_range_bytes: u64) -> Self {
        Self {
            client,
            probe_range_bytes: probe_range_bytes.max(1),
        }
    }

    /// Shared client, reused by the URL resolver
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn classify(e: reqwest::Error) -> KioskError {
        let transient = e.is_timeout() || e.is_connect() || e.is_request() || e.is_body();
        KioskError::network_error(e.to_string(), transient)
    }
}

#[async_trait]
impl RangeFetcher for HttpRangeFetcher {
    async fn probe_total_length(&self, url: &str) -> Result<RemoteLength> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", self.probe_range_bytes - 1))
            .send()
            .await
            .map_err(Self::classify)?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
                .map(RemoteLength::ranged)
                .ok_or_else(|| KioskError::ContentLengthUnknown(url.to_string())),
            StatusCode::OK => response
                .content_length()
                .map(RemoteLength::whole_body)
                .ok_or_else(|| KioskError::ContentLengthUnknown(url.to_string())),
            status => Err(KioskError::UnexpectedStatusCode {
                status_code: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn fetch(&self, url: &str, start: u64, end: u64, destination: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(KioskError::UnexpectedStatusCode {
                status_code: status.as_u16(),
                url: url.to_string(),
            });
        }

        // A 200 carries the whole resource; only usable if it is exactly this range
        if status == StatusCode::OK && (start != 0 || response.content_length() != Some(end - start + 1)) {
            return Err(KioskError::RangeNotHonored { start, end });
        }

        let file = File::create(destination).await.map_err(|e| {
            KioskError::FileIoError(format!("Failed to create {}: {}", destination.display(), e))
        })?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(Self::classify)?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        Ok(written)
    }
}

/// Total from `bytes START-END/TOTAL`; `None` for `*` or malformed headers
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    let (unit, rest) = header.trim().split_once(' ')?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.trim().parse::<u64>().ok()
}
