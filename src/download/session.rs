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


//! Download session state
//!
//! One `DownloadSession` is shared (behind an `Arc`) by the orchestrator and
//! anything that wants to observe it. The `active` flag enforces a single
//! workflow at a time; readable state is published through a watch channel
//! and events through a broadcast channel.

use crate::download::progress::{DownloadEvent, DownloadProgress, WorkflowState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, watch};

/// Buffered events per subscriber before old ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Readable session state for the host UI
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: WorkflowState,
    pub is_active: bool,

    /// An item is being downloaded or accounted
    pub is_downloading: bool,
    pub current_content_id: Option<String>,
    pub is_last_content: bool,

    /// Bytes of the current item on disk
    pub downloaded_size: u64,

    pub current_item_index: Option<usize>,
    pub item_count: usize,
    pub last_progress: Option<DownloadProgress>,

    /// Display text of the error that failed the last run
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: WorkflowState::Idle,
            is_active: false,
            is_downloading: false,
            current_content_id: None,
            is_last_content: false,
            downloaded_size: 0,
            current_item_index: None,
            item_count: 0,
            last_progress: None,
            last_error: None,
        }
    }
}

/// Session shared between the orchestrator and observers
#[derive(Debug)]
pub struct DownloadSession {
    active: AtomicBool,
    cancel_requested: AtomicBool,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<DownloadEvent>,
}

impl DownloadSession {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            active: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            snapshot,
            events,
        }
    }

    /// Claim the session; false if a workflow is already active
    pub fn try_activate(&self) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.cancel_requested.store(false, Ordering::Release);
        self.snapshot.send_modify(|s| {
            *s = SessionSnapshot {
                state: WorkflowState::Running,
                is_active: true,
                ..SessionSnapshot::default()
            };
        });
        self.emit(DownloadEvent::StateChanged(WorkflowState::Running));
        true
    }

    /// End the workflow with a terminal state
    pub fn release(&self, state: WorkflowState, error: Option<String>) {
        debug_assert!(state.is_terminal(), "released with non-terminal state {:?}", state);
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.is_active = false;
            s.is_downloading = false;
            s.last_error = error;
        });
        self.cancel_requested.store(false, Ordering::Release);
        self.active.store(false, Ordering::Release);
        self.emit(DownloadEvent::StateChanged(state));
    }

    /// Ask the active workflow to stop; false (no-op) when idle
    pub fn request_cancel(&self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.cancel_requested.store(true, Ordering::Release);
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every snapshot change
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn update<F>(&self, modify: F)
    where
        F: FnOnce(&mut SessionSnapshot),
    {
        self.snapshot.send_modify(modify);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for DownloadSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_activation() {
        let session = DownloadSession::new();
        assert!(session.try_activate());
        assert!(!session.try_activate());
        assert!(session.snapshot().is_active);

        session.release(WorkflowState::Completed, None);
        assert!(!session.is_active());
        assert_eq!(session.snapshot().state, WorkflowState::Completed);
        assert!(session.try_activate());
    }

    #[test]
    fn test_cancel_is_noop_when_idle() {
        let session = DownloadSession::new();
        assert!(!session.request_cancel());
        assert!(!session.is_cancel_requested());

        session.try_activate();
        assert!(session.request_cancel());
        assert!(session.is_cancel_requested());

        session.release(WorkflowState::Cancelled, None);
        assert!(!session.is_cancel_requested());
    }

    #[test]
    fn test_activation_resets_previous_error() {
        let session = DownloadSession::new();
        session.try_activate();
        session.update(|s| s.downloaded_size = 42);
        session.release(WorkflowState::Failed, Some("offline".into()));
        assert_eq!(session.snapshot().last_error.as_deref(), Some("offline"));

        session.try_activate();
        let snapshot = session.snapshot();
        assert_eq!(snapshot.last_error, None);
        assert_eq!(snapshot.downloaded_size, 0);
        assert_eq!(snapshot.state, WorkflowState::Running);
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let session = DownloadSession::new();
        let mut events = session.subscribe();
        let mut watcher = session.watch();

        session.try_activate();

        assert_eq!(
            events.recv().await.unwrap(),
            DownloadEvent::StateChanged(WorkflowState::Running)
        );
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().is_active);
    }
}
