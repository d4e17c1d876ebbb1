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


//! Content manifest data model
//!
//! # Wire format
//! `GET /remote-devices/content-to-upload` returns a bare JSON array:
//!
//! ```json
//! [
//!   { "id": 12, "title": "ocean", "format": "3D", "url": "https://...", "preview_url": "https://..." }
//! ]
//! ```
//!
//! `id` arrives as a number from some server versions and as a string from
//! others; both are accepted and normalized to a string.

use crate::error::{KioskError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;

/// Kind of content, derived from the `format` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    Video2D,
    Video3D,
    Image,
}

impl ContentKind {
    /// Map the server's `format` string
    ///
    /// Only "2D" and "3D" are videos; any other value is treated as an image.
    pub fn from_format(format: &str) -> Self {
        match format.trim() {
            "2D" => ContentKind::Video2D,
            "3D" => ContentKind::Video3D,
            _ => ContentKind::Image,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, ContentKind::Video2D | ContentKind::Video3D)
    }

    /// Extension of the final artifact
    pub fn extension(&self) -> &'static str {
        if self.is_video() {
            "mp4"
        } else {
            "png"
        }
    }
}

/// Manifest entry as sent by the control server
#[derive(Debug, Clone, Deserialize)]
pub struct ContentItemDto {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub format: String,
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

/// One piece of content the control server wants on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,

    /// Filename stem of every file belonging to this item
    pub title: String,

    pub kind: ContentKind,
    pub source_url: String,

    /// Direct download URL, populated by the URL resolver
    pub resolved_url: Option<String>,

    pub preview_url: Option<String>,
}

impl ContentItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: ContentKind, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
            source_url: source_url.into(),
            resolved_url: None,
            preview_url: None,
        }
    }

    /// URL to fetch ranges from: the resolved one if present
    pub fn download_url(&self) -> &str {
        self.resolved_url.as_deref().unwrap_or(&self.source_url)
    }
}

impl From<ContentItemDto> for ContentItem {
    fn from(dto: ContentItemDto) -> Self {
        Self {
            id: dto.id,
            kind: ContentKind::from_format(&dto.format),
            title: dto.title,
            source_url: dto.url,
            resolved_url: None,
            preview_url: dto.preview_url.filter(|u| !u.is_empty()),
        }
    }
}

/// Ordered list of content items
///
/// Two manifests are equivalent when they hold the same number of items and
/// the same set of titles; order is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    items: Vec<ContentItem>,
}

impl ContentManifest {
    /// Build a manifest, rejecting titles that cannot serve as filename stems
    pub fn new(items: Vec<ContentItem>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            validate_title(&item.title)?;
            if !seen.insert(item.title.as_str()) {
                return Err(KioskError::invalid_manifest(
                    format!("Duplicate title '{}'", item.title),
                    None,
                ));
            }
        }
        Ok(Self { items })
    }

    /// Parse the control server's JSON body
    pub fn from_json(body: &str) -> Result<Self> {
        let dtos: Vec<ContentItemDto> = serde_json::from_str(body).map_err(|e| {
            KioskError::invalid_manifest(
                format!("Failed to parse manifest: {}", e),
                Some(body.chars().take(512).collect()),
            )
        })?;
        Self::new(dtos.into_iter().map(ContentItem::from).collect())
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn titles(&self) -> HashSet<String> {
        self.items.iter().map(|i| i.title.clone()).collect()
    }

    /// Same count and same title set
    pub fn is_equivalent(&self, other: &ContentManifest) -> bool {
        if self.items.len() != other.items.len() {
            return false;
        }
        let ours: HashSet<&str> = self.items.iter().map(|i| i.title.as_str()).collect();
        other.items.iter().all(|i| ours.contains(i.title.as_str()))
    }
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(KioskError::invalid_manifest("Empty content title", None));
    }
    if title.contains('/') || title.contains('\\') || title == "." || title == ".." {
        return Err(KioskError::invalid_manifest(
            format!("Title '{}' cannot be used as a filename", title),
            None,
        ));
    }
    Ok(())
}
