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


//! JNI bridge for Android - Exposes the content downloader to the kiosk app
//!
//! # Architecture
//! Kiosk app (Kotlin) → `com.kiosk.content.NativeDownloader` → JNI → Rust
//!
//! # Design Patterns
//! 1. **JSON Communication**: All complex data is serialized to JSON for FFI crossing
//! 2. **Error Handling**: All errors are caught and returned as JSON error responses
//! 3. **Async Runtime**: One Tokio runtime hosts the download workflow
//! 4. **No Panics**: All panics are caught to prevent crashes across FFI boundary
//!
//! # Response Format
//! All functions return JSON strings with this structure:
//! ```json
//! {
//!   "success": true,
//!   "data": { ... }
//! }
//! ```
//! Or on error:
//! ```json
//! {
//!   "success": false,
//!   "error": "Error message"
//! }
//! ```

use crate::download::DownloadOrchestrator;
use crate::error::{KioskError, Result};
use crate::remote::ManagementAction;
use crate::KioskConfig;
use jni::objects::{JClass, JString};
use jni::sys::jstring;
use jni::JNIEnv;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

const DEFAULT_LOG_FILTER: &str = "kiosk_core=info";

lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    // Orchestrator created by nativeInitialize
    static ref ORCHESTRATOR: Mutex<Option<DownloadOrchestrator>> = Mutex::new(None);
}

/// Clone of the initialized orchestrator
fn orchestrator() -> Result<DownloadOrchestrator> {
    ORCHESTRATOR
        .lock()
        .map_err(|_| KioskError::internal("Orchestrator lock poisoned"))?
        .clone()
        .ok_or_else(|| KioskError::InvalidState("nativeInitialize has not been called".to_string()))
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Convert JString to Rust String
fn jstring_to_string(env: &mut JNIEnv, jstr: JString) -> Result<String> {
    env.get_string(&jstr)
        .map(|s| s.into())
        .map_err(|e| KioskError::InvalidInput(format!("JNI string conversion failed: {}", e)))
}

/// Convert Rust result to JSON response string
fn result_to_json<T: Serialize>(result: Result<T>) -> String {
    match result {
        Ok(data) => serde_json::json!({
            "success": true,
            "data": data
        }).to_string(),
        Err(e) => error_response(&e.to_string()),
    }
}

/// Create error response JSON
fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    }).to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> String,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

fn into_jstring(env: &mut JNIEnv, response: String) -> jstring {
    env.new_string(response)
        .expect("Failed to create Java string")
        .into_raw()
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Create the orchestrator from a JSON configuration
///
/// # Arguments (JSON string)
/// ```json
/// {
///   "control": { "production": true, "device_token": "..." },
///   "storage": { "sd_card_path": "/storage/1234-ABCD", "primary_path": "/storage/emulated/0/Download" }
/// }
/// ```
///
/// Fails while a download is running.
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeInitialize(
    mut env: JNIEnv,
    _class: JClass,
    config_json: JString,
) -> jstring {
    let config_result = jstring_to_string(&mut env, config_json);

    let response = catch_panic(move || {
        result_to_json((move || -> Result<bool> {
            let config = KioskConfig::from_json_str(&config_result?)?;
            crate::init_logging(DEFAULT_LOG_FILTER);

            let mut slot = ORCHESTRATOR
                .lock()
                .map_err(|_| KioskError::internal("Orchestrator lock poisoned"))?;
            if slot.as_ref().map_or(false, |o| o.is_running()) {
                return Err(KioskError::InvalidState("Download is running".to_string()));
            }

            let _guard = RUNTIME.enter();
            *slot = Some(DownloadOrchestrator::from_config(config)?);
            tracing::info!("Content downloader initialized");
            Ok(true)
        })())
    });

    into_jstring(&mut env, response)
}

// ============================================================================
// DOWNLOAD CONTROL
// ============================================================================

/// Start the download workflow
///
/// # Returns (JSON)
/// `data` is `true` if a workflow was started, `false` if one was already running.
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeStartDownload(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| {
        result_to_json(orchestrator().map(|o| {
            let _guard = RUNTIME.enter();
            o.start().is_some()
        }))
    });

    into_jstring(&mut env, response)
}

/// Request cancellation; `data` is `false` when nothing was running
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeStopDownload(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| result_to_json(orchestrator().map(|o| o.stop())));
    into_jstring(&mut env, response)
}

/// Current session snapshot
///
/// # Returns (JSON)
/// ```json
/// {
///   "success": true,
///   "data": {
///     "state": "Running",
///     "is_downloading": true,
///     "current_content_id": "12",
///     "is_last_content": false,
///     "downloaded_size": 104857600,
///     ...
///   }
/// }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeGetDownloadStatus(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| result_to_json(orchestrator().map(|o| o.snapshot())));
    into_jstring(&mut env, response)
}

/// Apply a management action string from the control server ("upload", "stop upload", ...)
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeApplyManagementAction(
    mut env: JNIEnv,
    _class: JClass,
    action: JString,
) -> jstring {
    let action_result = jstring_to_string(&mut env, action);

    let response = catch_panic(move || {
        result_to_json((move || -> Result<bool> {
            let action = ManagementAction::parse(&action_result?)?;
            let orchestrator = orchestrator()?;
            let _guard = RUNTIME.enter();
            Ok(orchestrator.apply_management_action(action))
        })())
    });

    into_jstring(&mut env, response)
}

/// Send an exchange report and act on the response
///
/// # Returns (JSON)
/// `data` holds `has_session` and the management action, if any.
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeSyncWithControlServer(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| {
        result_to_json((|| -> Result<serde_json::Value> {
            let orchestrator = orchestrator()?;
            let info = RUNTIME.block_on(orchestrator.sync_with_control_server())?;
            Ok(serde_json::json!({
                "has_session": info.has_session(),
                "session_title": info.session_title,
                "action": info.action(),
            }))
        })())
    });

    into_jstring(&mut env, response)
}

// ============================================================================
// STORAGE
// ============================================================================

/// Usable free space in bytes (after the safety margin, may be negative)
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeGetFreeSpace(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| result_to_json(orchestrator().map(|o| o.storage().free_space_bytes())));
    into_jstring(&mut env, response)
}

/// Delete all content; refused while a download is running
#[no_mangle]
pub extern "C" fn Java_com_kiosk_content_NativeDownloader_nativeCleanContent(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let response = catch_panic(|| {
        result_to_json((|| -> Result<usize> {
            let orchestrator = orchestrator()?;
            if orchestrator.is_running() {
                return Err(KioskError::InvalidState("Download is running".to_string()));
            }
            RUNTIME.block_on(orchestrator.storage().clean_all())
        })())
    });

    into_jstring(&mut env, response)
}
