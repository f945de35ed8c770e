//! # Error Types
//!
//! Domain-specific error types for beacon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  beacon-core errors (this file)                                        │
//! │  └── CoreError        - Key parsing, missing device data, decoding     │
//! │                                                                         │
//! │  beacon-sync errors (separate crate)                                   │
//! │  └── SyncError        - Cloud, store, config and executor failures     │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → logged by the task / cycle that hit it  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mapping a thing spec never fails as a whole: unsupported pieces are
//! skipped and logged. Errors here are for callers that asked for something
//! specific and could not get it.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors produced by the pure data layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key does not have the expected `{integration}.device.{identifier}` shape.
    #[error("Invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The device has never been linked to a remote device.
    ///
    /// ## When This Occurs
    /// - Device was created locally and the first sync has not run yet
    /// - The additional attributes were overwritten by another integration
    #[error("Device {identifier} has no remote device id")]
    MissingRemoteId { identifier: String },

    /// Grouped values could not be decoded into the requested type.
    #[error("Failed to decode grouped values: {0}")]
    Decode(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
