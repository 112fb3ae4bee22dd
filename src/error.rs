//! Error types for qpairkv.
//!
//! This module defines the uniform result taxonomy surfaced by both the
//! synchronous and asynchronous submission paths.

use thiserror::Error;

/// Result type alias for qpairkv operations.
///
/// This is a convenience alias for `Result<T, KvError>`.
pub type Result<T> = std::result::Result<T, KvError>;

/// Error types for key-value device operations.
///
/// Submission-time validation errors are returned immediately from `submit`
/// and never reach the completion processor. All other errors arrive through
/// a completion, either via a callback or as the return value of a
/// synchronous call.
#[derive(Error, Debug)]
pub enum KvError {
    /// Malformed key, value, or buffer sizing.
    ///
    /// This is a caller bug and is never retried by the engine.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport submission queue has no free slot.
    ///
    /// Retryable by the caller after a subsequent completion poll frees
    /// queue space.
    #[error("submission queue full")]
    QueueFull,

    /// The device is not initialized or has been torn down.
    #[error("device not ready")]
    DeviceNotReady,

    /// Device-reported hardware or firmware fault.
    ///
    /// Carries the raw transport status code verbatim. Not retried
    /// automatically; may require session teardown.
    #[error("device error: raw status {0:#06x}")]
    DeviceError(i32),

    /// The synchronous path exceeded its spin budget waiting for a
    /// completion.
    ///
    /// The underlying operation may still complete later. The caller must
    /// not assume it was cancelled, only that the result was not observed
    /// in time.
    #[error("timed out waiting for completion")]
    Timeout,

    /// The device has no free iterator cursor slots.
    ///
    /// The caller must close unused iterators before opening new ones.
    #[error("iterator limit exceeded")]
    IteratorLimitExceeded,

    /// The iterator handle was never opened or has already been closed.
    #[error("invalid iterator handle")]
    InvalidIteratorHandle,

    /// The key does not exist on the device.
    ///
    /// This is the normal, expected outcome of a retrieve or delete on an
    /// absent key, not an exceptional condition.
    #[error("key not found")]
    KeyNotFound,

    /// A store with the no-overwrite option targeted an existing key.
    ///
    /// Like [`KvError::KeyNotFound`], this is a regular outcome rather
    /// than a fault.
    #[error("key already exists")]
    KeyExists,

    /// Configuration validation failed.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error from the operating system.
    ///
    /// Surfaces from configuration file loading and emulated-device
    /// snapshot persistence.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization failed.
    ///
    /// This error occurs when reading configuration files.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
