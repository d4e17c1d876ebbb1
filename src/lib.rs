//! Kiosk content core
//!
//! Resumable, chunked delivery of the media a VR kiosk plays. The control
//! server publishes a manifest; this crate keeps the content directory in
//! line with it across crashes, network loss and manifest changes.

// JNI bridge for Android
#[cfg(target_os = "android")]
mod jni_bridge;

pub mod config;
pub mod download;
pub mod error;
pub mod file;
pub mod manifest;
pub mod remote;

pub use config::KioskConfig;
pub use download::{DownloadEvent, DownloadOrchestrator, DownloadProgress, SessionSnapshot, WorkflowState};
pub use error::{KioskError, Result};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `filter` (e.g. `"kiosk_core=debug"`)
///
/// `RUST_LOG` takes precedence when set. Calling this more than once is
/// harmless; only the first subscriber is kept.
pub fn init_logging(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
