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


//! Download workflow state machine
//!
//! # States
//! `Idle -> Running -> {Completed, Cancelled, Failed} -> Idle`
//!
//! # One pass
//! 1. Pull the manifest and keep it as the baseline
//! 2. Delete content that is not in the baseline
//! 3. For each item in order:
//!    - existing artifact: account its size, report, next item
//!    - otherwise resolve the URL, probe the size, walk the ranges
//!    - before each missing range, check for manifest drift
//!    - verify the byte total, merge, report
//!
//! Any failure inside an item (drift, fetch error, size mismatch, merge error)
//! ends the pass; after `restart_delay` a new pass starts from item 0. Chunk
//! files on disk make the new pass skip the ranges already fetched.
//!
//! Only a manifest that cannot be obtained at all fails the workflow.

use crate::config::{DownloaderConfig, KioskConfig};
use crate::download::chunks::{ChunkDescriptor, ChunkStore};
use crate::download::fetcher::{HttpRangeFetcher, RangeFetcher};
use crate::download::merger::{ArtifactMerger, ArtifactTransform, MarkerTransform};
use crate::download::progress::{DownloadEvent, DownloadProgress, WorkflowState};
use crate::download::session::{DownloadSession, SessionSnapshot};
use crate::error::{KioskError, Result};
use crate::file::manager::FileManager;
use crate::file::paths::PathBuilder;
use crate::file::storage::StorageGovernor;
use crate::manifest::{ContentItem, ContentManifest, ManifestWatcher};
use crate::remote::{
    CloudDiskResolver, ControlServer, DeviceSettings, DeviceTelemetry, ExchangeInfo, ExchangeReport,
    HttpControlServer, LoadingInfo, ManagementAction, NoTelemetry, PassthroughResolver, UrlResolver,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// How a single item ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    /// Artifact is on disk (or the item was skipped)
    Done,
    /// Abandon the pass and start over from item 0
    Restart(String),
    Cancelled,
}

/// Drives the manifest through fetch, verify and merge
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: DownloaderConfig,
    control: Arc<dyn ControlServer>,
    watcher: ManifestWatcher,
    fetcher: Arc<dyn RangeFetcher>,
    resolver: Arc<dyn UrlResolver>,
    storage: StorageGovernor,
    telemetry: Arc<dyn DeviceTelemetry>,
    session: Arc<DownloadSession>,
    merger: ArtifactMerger,
}

impl DownloadOrchestrator {
    pub fn builder() -> DownloadOrchestratorBuilder {
        DownloadOrchestratorBuilder::new()
    }

    /// Orchestrator talking to the real control server and content hosts
    pub fn from_config(config: KioskConfig) -> Result<Self> {
        config.validate()?;
        let control = Arc::new(HttpControlServer::new(&config.control)?);
        let fetcher = HttpRangeFetcher::new(&config.downloader)?;
        let resolver = Arc::new(CloudDiskResolver::new(fetcher.client().clone()));

        Self::builder()
            .config(config.downloader)
            .control_server(control)
            .range_fetcher(Arc::new(fetcher))
            .url_resolver(resolver)
            .storage(StorageGovernor::new(config.storage))
            .build()
    }

    pub fn session(&self) -> Arc<DownloadSession> {
        self.inner.session.clone()
    }

    pub fn storage(&self) -> &StorageGovernor {
        &self.inner.storage
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.session.watch()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.session.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.is_active()
    }

    /// Start the workflow on the current runtime
    ///
    /// Returns `None` without doing anything when a workflow is already running.
    pub fn start(&self) -> Option<JoinHandle<WorkflowState>> {
        if !self.inner.session.try_activate() {
            tracing::debug!("Download already running, start ignored");
            return None;
        }
        let this = self.clone();
        Some(tokio::spawn(async move { this.drive().await }))
    }

    /// Run the workflow on the calling task
    ///
    /// Returns `None` when a workflow is already running.
    pub async fn run(&self) -> Option<WorkflowState> {
        if !self.inner.session.try_activate() {
            return None;
        }
        Some(self.drive().await)
    }

    /// Request cooperative cancellation; false when idle
    ///
    /// The workflow stops at its next check point (before a range or between
    /// items); an in-flight request is not interrupted.
    pub fn stop(&self) -> bool {
        let requested = self.inner.session.request_cancel();
        if requested {
            tracing::info!("Download stop requested");
        }
        requested
    }

    /// Apply an action sent by the control server
    ///
    /// Returns whether the action changed the workflow.
    pub fn apply_management_action(&self, action: ManagementAction) -> bool {
        match action {
            ManagementAction::StartDownload => self.start().is_some(),
            ManagementAction::StopDownload => self.stop(),
            ManagementAction::Sync | ManagementAction::Rewind => {
                tracing::debug!(?action, "Player action ignored by the downloader");
                false
            }
        }
    }

    /// Exchange state with the control server outside of a download
    ///
    /// Clears the content folder when no session is assigned to the device
    /// and nothing is downloading, then applies the returned management action.
    pub async fn sync_with_control_server(&self) -> Result<ExchangeInfo> {
        let info = self.inner.control.send_exchange(&self.exchange_report().await).await?;

        if !info.has_session() && !self.is_running() {
            self.inner.storage.clean_all().await?;
        }
        if let Some(action) = info.action() {
            self.apply_management_action(action);
        }
        Ok(info)
    }

    async fn drive(&self) -> WorkflowState {
        let session = &self.inner.session;
        let (state, error) = match self.run_passes().await {
            Ok(state) => (state, None),
            Err(e) => {
                tracing::error!(error = %e, "Download workflow failed");
                (WorkflowState::Failed, Some(e.to_string()))
            }
        };
        session.release(state, error);
        tracing::info!(?state, "Download workflow finished");
        state
    }

    async fn run_passes(&self) -> Result<WorkflowState> {
        let inner = &self.inner;

        'pass: loop {
            if inner.session.is_cancel_requested() {
                return Ok(WorkflowState::Cancelled);
            }

            let manifest = inner.control.fetch_manifest().await?;
            let location = inner.storage.resolve_content_location().await?;
            tracing::info!(items = manifest.len(), location = %location.display(), "Starting download pass");

            if let Err(e) = inner.storage.clean_all_except(&manifest.titles()).await {
                tracing::warn!(error = %e, "Could not remove content missing from manifest");
            }

            let chunks = ChunkStore::new(&location);
            let paths = PathBuilder::new(&location);
            inner.session.update(|s| s.item_count = manifest.len());

            for (index, item) in manifest.items().iter().enumerate() {
                if inner.session.is_cancel_requested() {
                    return Ok(WorkflowState::Cancelled);
                }

                let outcome = self.process_item(&manifest, index, item, &chunks, &paths).await;
                inner.session.update(|s| {
                    s.is_downloading = false;
                    s.current_content_id = None;
                });

                match outcome {
                    ItemOutcome::Done => {}
                    ItemOutcome::Cancelled => return Ok(WorkflowState::Cancelled),
                    ItemOutcome::Restart(reason) => {
                        tracing::warn!(title = %item.title, %reason, "Restarting download pass");
                        tokio::time::sleep(inner.config.restart_delay()).await;
                        continue 'pass;
                    }
                }
            }

            if let Err(e) = chunks.purge_stray_temp_files().await {
                tracing::warn!(error = %e, "Could not remove stray temp files");
            }
            return Ok(WorkflowState::Completed);
        }
    }

    async fn process_item(
        &self,
        manifest: &ContentManifest,
        index: usize,
        item: &ContentItem,
        chunks: &ChunkStore,
        paths: &PathBuilder,
    ) -> ItemOutcome {
        let inner = &self.inner;
        let count = manifest.len();
        let artifact = paths.artifact_path(item);
        let marked = item.kind.is_video() && inner.config.apply_video_marker;

        inner.session.update(|s| {
            s.is_downloading = true;
            s.current_content_id = Some(item.id.clone());
            s.current_item_index = Some(index);
            s.is_last_content = index + 1 == count;
            s.downloaded_size = 0;
        });

        if let Some(len) = FileManager::file_len(&artifact).await {
            let size = if marked { len.saturating_sub(1) } else { len };
            tracing::debug!(title = %item.title, size, "Artifact already on disk");
            inner.session.update(|s| s.downloaded_size = size);
            self.report_exchange().await;
            return ItemOutcome::Done;
        }

        let mut item = item.clone();
        item.resolved_url = match inner.resolver.resolve(&item).await {
            Ok(url) => Some(url),
            Err(e) => return ItemOutcome::Restart(e.to_string()),
        };
        let url = item.download_url();

        let remote = match inner.fetcher.probe_total_length(url).await {
            Ok(remote) => remote,
            Err(e) => return ItemOutcome::Restart(e.to_string()),
        };
        let total = remote.total;
        if total == 0 {
            tracing::warn!(title = %item.title, "Content host reports zero length, skipping item");
            return ItemOutcome::Done;
        }

        // A host that ignores Range only ever serves the whole body
        let chunk_size = if remote.accepts_ranges {
            inner.config.chunk_size
        } else {
            tracing::warn!(title = %item.title, total, "Content host ignores byte ranges, fetching in one piece");
            total
        };

        let plan = chunks.plan(&item.title, total, chunk_size);
        tracing::info!(title = %item.title, total, chunks = plan.len(), "Downloading item");

        inner.session.emit(DownloadEvent::DownloadingStarted {
            title: item.title.clone(),
        });
        let mut progress = DownloadProgress::new(item.title.clone(), index, count, total);
        self.publish_progress(&progress);

        match self.walk_ranges(manifest, url, &plan, chunks, &mut progress).await {
            ItemOutcome::Done => {}
            other => return other,
        }

        if progress.bytes_downloaded != total {
            let mismatch = KioskError::FileSizeMismatch {
                expected: total,
                actual: progress.bytes_downloaded,
            };
            if let Err(e) = chunks.purge_item(&item.title).await {
                tracing::warn!(title = %item.title, error = %e, "Could not purge chunks");
            }
            return ItemOutcome::Restart(mismatch.to_string());
        }

        let completed = chunks.list_completed_chunks_in_order(&plan).await;
        if completed.len() != plan.len() {
            return ItemOutcome::Restart(format!(
                "chunk {} of {} is incomplete",
                completed.len(),
                item.title
            ));
        }

        let transform: Option<Arc<dyn ArtifactTransform>> = if marked {
            Some(Arc::new(MarkerTransform))
        } else {
            None
        };
        let bytes = match inner.merger.merge(&completed, &artifact, total, transform).await {
            Ok(bytes) => bytes,
            Err(e) => return ItemOutcome::Restart(e.to_string()),
        };

        inner.session.update(|s| s.downloaded_size = total);
        self.report_exchange().await;
        inner.session.emit(DownloadEvent::ItemCompleted {
            title: item.title.clone(),
            bytes,
        });
        ItemOutcome::Done
    }

    /// Fetch every range not already complete on disk, in order
    async fn walk_ranges(
        &self,
        baseline: &ContentManifest,
        url: &str,
        plan: &[ChunkDescriptor],
        chunks: &ChunkStore,
        progress: &mut DownloadProgress,
    ) -> ItemOutcome {
        let inner = &self.inner;

        for chunk in plan {
            if inner.session.is_cancel_requested() {
                return ItemOutcome::Cancelled;
            }

            if chunks
                .is_chunk_complete(&chunk.temp_path, chunk.expected_length())
                .await
            {
                progress.bytes_downloaded += chunk.expected_length();
                let downloaded = progress.bytes_downloaded;
                inner.session.update(|s| s.downloaded_size = downloaded);
                continue;
            }

            match inner.watcher.has_manifest_changed(baseline).await {
                Ok(false) => {}
                Ok(true) => return ItemOutcome::Restart("manifest changed".to_string()),
                Err(e) => return ItemOutcome::Restart(format!("manifest check failed: {}", e)),
            }

            match inner
                .fetcher
                .fetch(url, chunk.byte_start, chunk.byte_end, &chunk.temp_path)
                .await
            {
                Ok(written) => {
                    tracing::debug!(
                        title = %chunk.owner_title,
                        chunk = chunk.index,
                        offset = chunk.byte_start,
                        written,
                        "Chunk fetched"
                    );
                    progress.bytes_downloaded += written;
                    self.publish_progress(progress);
                }
                Err(e) => {
                    return ItemOutcome::Restart(format!("chunk {} failed: {}", chunk.index, e));
                }
            }
        }

        ItemOutcome::Done
    }

    fn publish_progress(&self, progress: &DownloadProgress) {
        tracing::debug!(progress = %progress.display_string(), "Download progress");
        let snapshot_progress = progress.clone();
        self.inner.session.update(|s| {
            s.downloaded_size = snapshot_progress.bytes_downloaded;
            s.last_progress = Some(snapshot_progress);
        });
        self.inner
            .session
            .emit(DownloadEvent::ProgressChanged(progress.clone()));
    }

    async fn exchange_report(&self) -> ExchangeReport {
        let storage = self.inner.storage.clone();
        let free_memory = tokio::task::spawn_blocking(move || storage.free_space_bytes())
            .await
            .unwrap_or(0);

        let snapshot = self.inner.session.snapshot();
        let loading_info = if snapshot.is_downloading {
            snapshot.current_content_id.map(|id| LoadingInfo {
                loading_content_id: id,
                loaded_bytes_of_total: snapshot.downloaded_size as i64,
                last_content: snapshot.is_last_content,
            })
        } else {
            None
        };

        let telemetry = &self.inner.telemetry;
        ExchangeReport {
            settings: DeviceSettings {
                free_memory,
                charge: telemetry.battery_level(),
                volume: telemetry.volume(),
            },
            player: telemetry.player(),
            loading_info,
        }
    }

    /// Failures are logged only; reporting never blocks a download
    async fn report_exchange(&self) {
        let report = self.exchange_report().await;
        if let Err(e) = self.inner.control.send_exchange(&report).await {
            tracing::warn!(error = %e, "Exchange report failed");
        }
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("config", &self.inner.config)
            .field("storage", &self.inner.storage)
            .finish_non_exhaustive()
    }
}

/// Builder for DownloadOrchestrator
///
/// A control server, a range fetcher and a storage governor are required;
/// everything else has a default.
#[derive(Default)]
pub struct DownloadOrchestratorBuilder {
    config: DownloaderConfig,
    control: Option<Arc<dyn ControlServer>>,
    fetcher: Option<Arc<dyn RangeFetcher>>,
    resolver: Option<Arc<dyn UrlResolver>>,
    storage: Option<StorageGovernor>,
    telemetry: Option<Arc<dyn DeviceTelemetry>>,
    session: Option<Arc<DownloadSession>>,
}

impl DownloadOrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: DownloaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn control_server(mut self, control: Arc<dyn ControlServer>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn range_fetcher(mut self, fetcher: Arc<dyn RangeFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn url_resolver(mut self, resolver: Arc<dyn UrlResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn storage(mut self, storage: StorageGovernor) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn DeviceTelemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Share an existing session, e.g. with a fetcher that observes it
    pub fn session(mut self, session: Arc<DownloadSession>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn build(self) -> Result<DownloadOrchestrator> {
        if self.config.chunk_size == 0 {
            return Err(KioskError::InvalidConfiguration("chunk_size must be greater than zero".into()));
        }
        let control = self
            .control
            .ok_or_else(|| KioskError::InvalidConfiguration("control server is required".into()))?;
        let fetcher = self
            .fetcher
            .ok_or_else(|| KioskError::InvalidConfiguration("range fetcher is required".into()))?;
        let storage = self
            .storage
            .ok_or_else(|| KioskError::InvalidConfiguration("storage governor is required".into()))?;

        let merger = ArtifactMerger::new(self.config.merge_yield_every);
        Ok(DownloadOrchestrator {
            inner: Arc::new(Inner {
                watcher: ManifestWatcher::new(control.clone()),
                control,
                fetcher,
                resolver: self.resolver.unwrap_or_else(|| Arc::new(PassthroughResolver)),
                storage,
                telemetry: self.telemetry.unwrap_or_else(|| Arc::new(NoTelemetry)),
                session: self.session.unwrap_or_default(),
                merger,
                config: self.config,
            }),
        })
    }
}
