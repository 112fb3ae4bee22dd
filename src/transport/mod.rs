//! Transport boundary: the capability interface the engine drives.
//!
//! A backend owns the physical queue pairs. The engine only fills
//! [`CommandDescriptor`] records, pops [`RawCompletion`] records, and
//! translates raw status codes through the backend's mapping table, so
//! adding a backend never touches engine logic.

use crate::command::{CommandDescriptor, Opcode};
use crate::error::{KvError, Result};

pub mod emu;

/// Static device properties reported by a backend at init time.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    /// Largest accepted key, in bytes.
    pub max_key_size: usize,
    /// Largest accepted value, in bytes.
    pub max_value_size: usize,
    /// Total device capacity, in bytes.
    pub total_capacity: u64,
    /// Number of concurrently open device-side cursors.
    pub iterator_slots: usize,
    /// Number of completion queues the backend exposes.
    pub completion_queues: usize,
}

/// Uniform outcome of translating a backend's raw completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Success,
    KeyNotFound,
    KeyExists,
    InvalidArgument,
    IteratorLimitExceeded,
    InvalidIteratorHandle,
    DeviceNotReady,
    DeviceError,
}

impl CompletionStatus {
    /// Map the uniform status into the crate taxonomy, preserving the raw
    /// code for device faults.
    pub fn into_result(self, raw: i32) -> Result<()> {
        match self {
            CompletionStatus::Success => Ok(()),
            CompletionStatus::KeyNotFound => Err(KvError::KeyNotFound),
            CompletionStatus::KeyExists => Err(KvError::KeyExists),
            CompletionStatus::InvalidArgument => Err(KvError::InvalidArgument(format!(
                "device rejected command (raw status {raw:#06x})"
            ))),
            CompletionStatus::IteratorLimitExceeded => Err(KvError::IteratorLimitExceeded),
            CompletionStatus::InvalidIteratorHandle => Err(KvError::InvalidIteratorHandle),
            CompletionStatus::DeviceNotReady => Err(KvError::DeviceNotReady),
            CompletionStatus::DeviceError => Err(KvError::DeviceError(raw)),
        }
    }
}

/// Raw completion record popped from a backend completion queue.
///
/// Carries the correlation token from the originating descriptor, the raw
/// device status, and any operation payload.
#[derive(Debug)]
pub struct RawCompletion {
    pub token: u64,
    pub opcode: Opcode,
    pub status: i32,
    /// Retrieved value bytes.
    pub value: Option<Vec<u8>>,
    /// One byte per queried key for exist batches, 1 if present.
    pub exist: Option<Vec<u8>>,
    /// Cursor handle assigned by an iterator-open command.
    pub iter_handle: Option<u16>,
    /// Key batch filled by an iterator-next command.
    pub iter_keys: Vec<Vec<u8>>,
    /// Set once the cursor has no further matching keys.
    pub iter_done: bool,
}

impl RawCompletion {
    /// A completion carrying only a status.
    pub fn status_only(token: u64, opcode: Opcode, status: i32) -> Self {
        Self {
            token,
            opcode,
            status,
            value: None,
            exist: None,
            iter_handle: None,
            iter_keys: Vec::new(),
            iter_done: false,
        }
    }
}

/// Capability interface over a queue-pair storage backend.
///
/// Backends are selected at session construction; the engine holds the
/// chosen backend behind this trait for the session's lifetime.
pub trait Transport: Send + Sync {
    /// Hand a command descriptor to the submission queue.
    ///
    /// Must not block: a full queue surfaces as `QueueFull` immediately,
    /// and a torn-down device as `DeviceNotReady`.
    fn submit(&self, descriptor: CommandDescriptor) -> Result<()>;

    /// Pop up to `max` raw completions from one completion queue.
    ///
    /// `max == 0` means everything currently available. Returns
    /// `DeviceNotReady` once the device is torn down.
    fn poll(&self, queue: usize, max: usize) -> Result<Vec<RawCompletion>>;

    /// Static device properties.
    fn info(&self) -> DeviceInfo;

    /// Backend-specific raw-status mapping table.
    fn status_table(&self) -> &'static [(i32, CompletionStatus)];

    /// Translate a raw status code through [`Transport::status_table`].
    ///
    /// Unmapped codes degrade to `DeviceError` so an unknown firmware
    /// status can never masquerade as success.
    fn translate(&self, raw: i32) -> CompletionStatus {
        self.status_table()
            .iter()
            .find(|(code, _)| *code == raw)
            .map(|(_, status)| *status)
            .unwrap_or(CompletionStatus::DeviceError)
    }

    /// Bytes currently stored on the device.
    fn used_bytes(&self) -> Result<u64>;

    /// Write-amplification factor reported by the device.
    fn waf(&self) -> Result<f32>;

    /// Tear the device down. Subsequent submits and polls fail with
    /// `DeviceNotReady`.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TableOnly;

    impl Transport for TableOnly {
        fn submit(&self, _descriptor: CommandDescriptor) -> Result<()> {
            Ok(())
        }
        fn poll(&self, _queue: usize, _max: usize) -> Result<Vec<RawCompletion>> {
            Ok(Vec::new())
        }
        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                max_key_size: 255,
                max_value_size: 1024,
                total_capacity: 1024,
                iterator_slots: 1,
                completion_queues: 1,
            }
        }
        fn status_table(&self) -> &'static [(i32, CompletionStatus)] {
            &[(0, CompletionStatus::Success), (7, CompletionStatus::KeyNotFound)]
        }
        fn used_bytes(&self) -> Result<u64> {
            Ok(0)
        }
        fn waf(&self) -> Result<f32> {
            Ok(1.0)
        }
        fn shutdown(&self) {}
    }

    #[test]
    fn test_translate_known_codes() {
        let t = TableOnly;
        assert_eq!(t.translate(0), CompletionStatus::Success);
        assert_eq!(t.translate(7), CompletionStatus::KeyNotFound);
    }

    #[test]
    fn test_translate_unknown_code_is_device_error() {
        let t = TableOnly;
        assert_eq!(t.translate(0x7777), CompletionStatus::DeviceError);
    }

    #[test]
    fn test_into_result_preserves_raw_code() {
        match CompletionStatus::DeviceError.into_result(0x42) {
            Err(KvError::DeviceError(code)) => assert_eq!(code, 0x42),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
