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


//! On-disk naming convention
//!
//! Existing kiosks already hold content laid out with these names, so they
//! must not change:
//! - final artifact: `{location}/{title}.mp4` (video) or `{location}/{title}.png` (image)
//! - chunk: `{location}/{title}_part{index}.tmp`
//! - merge staging: `{location}/{title}.mp4.tmp`
//!
//! Everything ending in `.tmp` (any case) is a partial-download artifact.

use crate::manifest::ContentItem;
use std::path::{Path, PathBuf};

/// Extension marking partial-download artifacts
pub const TEMP_EXTENSION: &str = "tmp";

/// Builds paths inside one content location
#[derive(Debug, Clone)]
pub struct PathBuilder {
    location: PathBuf,
}

impl PathBuilder {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Final artifact path for an item
    pub fn artifact_path(&self, item: &ContentItem) -> PathBuf {
        self.location
            .join(format!("{}.{}", item.title, item.kind.extension()))
    }

    /// Temp file holding one byte range of an item
    pub fn chunk_path(&self, title: &str, index: usize) -> PathBuf {
        self.location
            .join(format!("{}_part{}.{}", title, index, TEMP_EXTENSION))
    }
}

/// Merge target that is renamed over the final path on success
pub fn staging_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_EXTENSION);
    final_path.with_file_name(name)
}

/// True for names with the temp extension, compared case-insensitively
pub fn is_temp_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(TEMP_EXTENSION))
        .unwrap_or(false)
}

/// True only for `{title}_part{index}.tmp`, so `a` never claims `a_part_part0.tmp`
pub fn is_chunk_file_of(name: &str, title: &str) -> bool {
    let Some(index) = name
        .strip_prefix(title)
        .and_then(|rest| rest.strip_prefix("_part"))
        .and_then(|rest| rest.strip_suffix(TEMP_EXTENSION))
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
}

/// True when `name` belongs to one of the kept titles
///
/// Matching is by prefix, the same rule older kiosk builds used, so a title
/// that is a prefix of another also protects the longer one's files.
pub fn name_matches_any_title<'a, I>(name: &str, titles: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    titles.into_iter().any(|t| name.starts_with(t.as_str()))
}
