//! Error types for the kiosk content core
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by domain (control server, network, storage, merge, etc.)
//! and their display text is what the host sees as the session's `last_error`.
//!
//! ## Categories
//!
//! ### Control server
//! - Manifest or exchange request rejected → `ControlServerFailed`
//! - Manifest body could not be understood → `InvalidManifest`
//!
//! ### Content transfer
//! - Connection drops, timeouts → `NetworkError`
//! - Non-2xx from the content host → `UnexpectedStatusCode`
//! - Host ignored the requested byte range → `RangeNotHonored`
//! - Size probe could not determine the total → `ContentLengthUnknown`
//! - Public link could not be turned into a direct URL → `UrlResolutionFailed`
//!
//! ### Files and storage
//! - Accumulated bytes differ from the reported total → `FileSizeMismatch`
//! - Chunk concatenation failed → `MergeFailed`, `ChunkMissing`
//! - Content directory unusable → `StorageUnavailable`
//! - Generic I/O → `FileIoError`, `IoError`

use thiserror::Error;

/// Result type alias using our KioskError type
pub type Result<T> = std::result::Result<T, KioskError>;

/// Main error type for the kiosk content core
#[derive(Error, Debug)]
pub enum KioskError {
    // ===== Control Server Errors =====

    /// Control server rejected or failed a request
    #[error("Control server request failed: {message}")]
    ControlServerFailed {
        message: String,
        /// HTTP status code if available
        status_code: Option<u16>,
        /// Endpoint path that failed
        endpoint: Option<String>,
    },

    /// Manifest returned by the control server is unusable
    #[error("Invalid manifest: {message}")]
    InvalidManifest {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    // ===== Transfer Errors =====

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Content host answered with a non-success status
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// Content host returned a full body instead of the requested range
    #[error("Server did not honor range bytes={start}-{end}")]
    RangeNotHonored {
        start: u64,
        end: u64,
    },

    /// Total content length could not be determined
    #[error("Could not determine content length for {0}")]
    ContentLengthUnknown(String),

    /// Public storage link could not be resolved into a direct download URL
    #[error("URL resolution failed: {0}")]
    UrlResolutionFailed(String),

    // ===== File/Storage Errors =====

    /// Downloaded bytes do not add up to the reported total
    #[error("Download size mismatch: expected {expected} bytes, got {actual} bytes")]
    FileSizeMismatch {
        expected: u64,
        actual: u64,
    },

    /// Chunk merge could not be completed
    #[error("Merge failed: {0}")]
    MergeFailed(String),

    /// A chunk expected for the merge is not on disk
    #[error("Chunk missing: {0}")]
    ChunkMissing(String),

    /// Content directory cannot be resolved or created
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Generic file I/O error with path context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    // ===== Configuration/State Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ===== General Errors =====

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl KioskError {
    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        KioskError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        KioskError::InternalError(message.into())
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        KioskError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a ControlServerFailed error
    pub fn control_failed<S: Into<String>>(
        message: S,
        status_code: Option<u16>,
        endpoint: Option<String>,
    ) -> Self {
        KioskError::ControlServerFailed {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create an InvalidManifest error
    pub fn invalid_manifest<S: Into<String>>(message: S, response_body: Option<String>) -> Self {
        KioskError::InvalidManifest {
            message: message.into(),
            response_body,
        }
    }
}
