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


//! Download URL resolution
//!
//! Most content hosts accept range requests on the URL from the manifest.
//! Public links of the cloud-disk provider point at an HTML page instead and
//! must be exchanged for a direct link first.

use crate::error::{KioskError, Result};
use crate::manifest::ContentItem;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// Host whose public links need resolving
pub const CLOUD_DISK_HOST: &str = "disk.yandex.ru";

/// Endpoint returning a direct link for a public resource
pub const CLOUD_DISK_API: &str = "https://cloud-api.yandex.net/v1/disk/public/resources/download";

/// Turns a manifest URL into one that accepts range requests
#[async_trait]
pub trait UrlResolver: Send + Sync {
    async fn resolve(&self, item: &ContentItem) -> Result<String>;
}

/// Uses the manifest URL as is
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughResolver;

#[async_trait]
impl UrlResolver for PassthroughResolver {
    async fn resolve(&self, item: &ContentItem) -> Result<String> {
        Ok(item.source_url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DirectLinkResponse {
    href: String,
}

/// Rewrites cloud-disk public links, passes everything else through
#[derive(Debug, Clone)]
pub struct CloudDiskResolver {
    client: Client,
    api_url: String,
}

impl CloudDiskResolver {
    pub fn new(client: Client) -> Self {
        Self::with_api_url(client, CLOUD_DISK_API)
    }

    /// Resolver calling a different API endpoint
    pub fn with_api_url(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    /// True for URLs hosted on the cloud disk
    pub fn needs_resolution(source_url: &str) -> bool {
        Url::parse(source_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(CLOUD_DISK_HOST)))
            .unwrap_or(false)
    }

    fn lookup_url(&self, public_key: &str) -> String {
        format!("{}?public_key={}", self.api_url, urlencoding::encode(public_key))
    }
}

#[async_trait]
impl UrlResolver for CloudDiskResolver {
    async fn resolve(&self, item: &ContentItem) -> Result<String> {
        if !Self::needs_resolution(&item.source_url) {
            return Ok(item.source_url.clone());
        }

        let lookup = self.lookup_url(&item.source_url);
        let response = self
            .client
            .get(&lookup)
            .send()
            .await
            .map_err(|e| KioskError::UrlResolutionFailed(format!("{}: {}", item.title, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KioskError::UrlResolutionFailed(format!(
                "{}: lookup returned {}",
                item.title, status
            )));
        }

        let body: DirectLinkResponse = response
            .json()
            .await
            .map_err(|e| KioskError::UrlResolutionFailed(format!("{}: {}", item.title, e)))?;

        if body.href.is_empty() {
            return Err(KioskError::UrlResolutionFailed(format!("{}: empty direct link", item.title)));
        }

        tracing::debug!(title = %item.title, "Resolved cloud-disk link");
        Ok(body.href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ContentKind;

    #[test]
    fn test_needs_resolution() {
        assert!(CloudDiskResolver::needs_resolution("https://disk.yandex.ru/i/abc123"));
        assert!(!CloudDiskResolver::needs_resolution("https://cdn.example.com/a.mp4"));
        assert!(!CloudDiskResolver::needs_resolution("https://disk.yandex.ru.evil.com/x"));
        assert!(!CloudDiskResolver::needs_resolution("not a url"));
    }

    #[test]
    fn test_lookup_url_encodes_public_key() {
        let resolver = CloudDiskResolver::new(Client::new());
        assert_eq!(
            resolver.lookup_url("https://disk.yandex.ru/i/a b"),
            "https://cloud-api.yandex.net/v1/disk/public/resources/download?public_key=https%3A%2F%2Fdisk.yandex.ru%2Fi%2Fa%20b"
        );
    }

    #[tokio::test]
    async fn test_other_hosts_pass_through() {
        let resolver = CloudDiskResolver::new(Client::new());
        let item = ContentItem::new("1", "a", ContentKind::Video2D, "https://cdn.example.com/a.mp4");
        assert_eq!(resolver.resolve(&item).await.unwrap(), "https://cdn.example.com/a.mp4");
        assert_eq!(PassthroughResolver.resolve(&item).await.unwrap(), "https://cdn.example.com/a.mp4");
    }
}
