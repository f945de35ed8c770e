//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Cloud       │  │     Local Store         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Api            │  │  Store                  │ │
//! │  │  ConfigLoad     │  │  Transport      │  │  DeviceNotFound         │ │
//! │  │  ConfigSave     │  │  Malformed      │  │  Core                   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Executor     │  │                 Internal                    │  │
//! │  │                 │  │                                             │  │
//! │  │  CycleRejected  │  │  Serialization, ShuttingDown, ChannelError  │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-device task bodies never propagate these: they are logged and turned
//! into [`crate::coordinator::TaskOutcome::Failed`].

use beacon_core::CoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Cloud Error
// =============================================================================

/// Error reported by a [`crate::ports::CloudClient`] implementation.
#[derive(Debug, Clone, Error)]
pub enum CloudError {
    /// The cloud answered with an error code.
    #[error("Cloud API error {code}: {message}")]
    Api { code: String, message: String },

    /// The request never got an answer (network, TLS, timeout).
    #[error("Cloud transport error: {0}")]
    Transport(String),

    /// The answer could not be understood.
    #[error("Malformed cloud response: {0}")]
    Malformed(String),
}

impl CloudError {
    /// Error code the cloud returns when deleting an unknown device.
    pub const DEVICE_NOT_FOUND: &'static str = "device_not_found";

    /// Returns true if the cloud reported the given error code.
    pub fn has_code(&self, expected: &str) -> bool {
        matches!(self, CloudError::Api { code, .. } if code == expected)
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Cloud Errors
    // =========================================================================
    /// A cloud call failed.
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// The cloud returned no thing spec for a device.
    #[error("No thing spec for remote device {device_id}")]
    MissingThingSpec { device_id: String },

    /// A serial number could not be resolved to a remote device.
    #[error("Remote device {identifier} not found")]
    RemoteDeviceNotFound { identifier: String },

    // =========================================================================
    // Local Store Errors
    // =========================================================================
    /// Registry, value store, bus or history store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// The device is not registered locally.
    #[error("Device {identifier} not found")]
    DeviceNotFound { identifier: String },

    /// Pure data layer error (keys, remote id, decoding).
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Executor Errors
    // =========================================================================
    /// A cycle is running and another is already queued.
    #[error("Sync cycle rejected: one cycle is running and one is queued")]
    CycleRejected,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to serialize or deserialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SyncError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        SyncError::ChannelError(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt may succeed.
    ///
    /// ## Retryable Errors
    /// - Cloud transport failures
    /// - Rejected cycles (the queued cycle will run shortly)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Cloud API errors (the cloud made a decision)
    /// - Missing devices or specs
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Cloud(CloudError::Transport(_)) | SyncError::CycleRejected
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
