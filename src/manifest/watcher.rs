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


//! Manifest drift detection

use crate::error::Result;
use crate::manifest::ContentManifest;
use crate::remote::ControlServer;
use std::sync::Arc;

/// Re-polls the control server and compares against a baseline manifest
///
/// Called before every range that still has to be fetched, so drift is noticed
/// within one range latency.
#[derive(Clone)]
pub struct ManifestWatcher {
    server: Arc<dyn ControlServer>,
}

impl ManifestWatcher {
    pub fn new(server: Arc<dyn ControlServer>) -> Self {
        Self { server }
    }

    /// True when the current manifest differs in count or title set
    ///
    /// A failed poll is returned as an error; the caller decides how to treat
    /// it (the orchestrator restarts the item, same as drift).
    pub async fn has_manifest_changed(&self, baseline: &ContentManifest) -> Result<bool> {
        let current = self.server.fetch_manifest().await?;
        let changed = !baseline.is_equivalent(&current);
        if changed {
            tracing::info!(
                baseline_items = baseline.len(),
                current_items = current.len(),
                "Content manifest changed on the control server"
            );
        }
        Ok(changed)
    }
}

impl std::fmt::Debug for ManifestWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestWatcher").finish_non_exhaustive()
    }
}
