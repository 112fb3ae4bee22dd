//! Device-side iteration: cursor handles and the batch-next protocol.
//!
//! An iterator walks the keys of one container whose first four bytes
//! match a bitmask/pattern filter. The cursor itself lives on the device;
//! this module tracks handle lifecycle on the engine side so a handle that
//! was never opened, or was already closed, is rejected without a device
//! round trip.
//!
//! Lifecycle per handle: closed, then open via [`Device::open_iterator`],
//! then any number of next calls, then closed again via
//! [`Device::close_iterator`]. Exhaustion does not close the cursor;
//! re-querying an exhausted cursor yields an empty batch with the
//! exhausted flag set.

use crate::command::Command;
use crate::error::{KvError, Result};
use crate::session::{CompletionCallback, Device};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Opaque handle for an open device-side cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorHandle(pub(crate) u16);

impl IteratorHandle {
    /// Rebuild a handle from its raw id, e.g. one carried through a
    /// completion tag. The handle is only usable if that id is still open.
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub fn into_raw(self) -> u16 {
        self.0
    }
}

/// Key batch produced by one iterator-next completion.
#[derive(Debug, Default)]
pub struct IterBatch {
    pub keys: Vec<Vec<u8>>,
    /// Set once the cursor has no further matching keys.
    pub exhausted: bool,
}

/// Caller-presized result buffer for synchronous iterator-next calls.
///
/// The capacity bounds the total key bytes one batch may carry; the
/// device fills as many whole keys as fit.
#[derive(Debug)]
pub struct IterBuffer {
    capacity: usize,
    pub keys: Vec<Vec<u8>>,
    pub exhausted: bool,
}

impl IterBuffer {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: bytes,
            keys: Vec::new(),
            exhausted: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct IterEntry {
    container: u32,
}

/// Engine-side registry of open cursor handles.
pub(crate) struct IteratorTable {
    open: Mutex<HashMap<u16, IterEntry>>,
}

impl IteratorTable {
    pub(crate) fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, handle: u16, container: u32) {
        self.open.lock().insert(handle, IterEntry { container });
    }

    /// Look up an open handle, returning its container.
    fn ensure_open(&self, handle: u16) -> Result<u32> {
        self.open
            .lock()
            .get(&handle)
            .map(|entry| entry.container)
            .ok_or(KvError::InvalidIteratorHandle)
    }

    fn remove(&self, handle: u16) {
        self.open.lock().remove(&handle);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.open.lock().len()
    }
}

impl Device {
    /// Open a device-side cursor over `container`.
    ///
    /// Keys match when their first four bytes (big-endian, zero-padded)
    /// equal `pattern` under `bitmask`. Fails with `IteratorLimitExceeded`
    /// once the device has no free cursor slots.
    pub fn open_iterator(
        &self,
        container: u32,
        bitmask: u32,
        pattern: u32,
    ) -> Result<IteratorHandle> {
        let outcome = self.submit_sync(container, Command::IterOpen { bitmask, pattern })?;
        outcome.result?;
        let handle = match outcome.iter_handle {
            Some(handle) => handle,
            None => {
                tracing::warn!("Iterator-open completion carried no handle");
                return Err(KvError::DeviceError(-1));
            }
        };
        self.iterators.register(handle, container);
        tracing::debug!("Iterator {} open on container {}", handle, container);
        Ok(IteratorHandle(handle))
    }

    /// Fetch the next batch of matching keys into `buffer`.
    ///
    /// Valid only while the handle is open. After exhaustion further calls
    /// succeed with an empty batch and the exhausted flag set; the handle
    /// stays open until explicitly closed.
    pub fn iterator_next(&self, handle: IteratorHandle, buffer: &mut IterBuffer) -> Result<()> {
        let container = self.iterators.ensure_open(handle.0)?;
        let outcome = self.submit_sync(
            container,
            Command::IterNext {
                handle: handle.0,
                buffer_capacity: buffer.capacity(),
            },
        )?;
        outcome.result?;
        let batch = outcome.iter.unwrap_or_default();
        buffer.keys = batch.keys;
        buffer.exhausted = batch.exhausted;
        Ok(())
    }

    /// Asynchronous variant of [`Device::iterator_next`]; the batch
    /// arrives on the completion event's `iter` field.
    pub fn iterator_next_async(
        &self,
        handle: IteratorHandle,
        buffer_capacity: usize,
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<()> {
        let container = self.iterators.ensure_open(handle.0)?;
        self.submit_with_callback(
            container,
            Command::IterNext {
                handle: handle.0,
                buffer_capacity,
            },
            tag1,
            tag2,
            callback,
        )
        .map(|_| ())
    }

    /// Close a cursor and invalidate its handle.
    ///
    /// The engine-side handle transitions to closed even if the device
    /// reports a fault for the close command itself; further next calls
    /// fail with `InvalidIteratorHandle`.
    pub fn close_iterator(&self, handle: IteratorHandle) -> Result<()> {
        let container = self.iterators.ensure_open(handle.0)?;
        let outcome = self.submit_sync(container, Command::IterClose { handle: handle.0 })?;
        self.iterators.remove(handle.0);
        tracing::debug!("Iterator {} closed", handle.0);
        outcome.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rejects_unknown_handle() {
        let table = IteratorTable::new();
        assert!(matches!(
            table.ensure_open(3),
            Err(KvError::InvalidIteratorHandle)
        ));
    }

    #[test]
    fn test_table_tracks_lifecycle() {
        let table = IteratorTable::new();
        table.register(1, 9);
        assert_eq!(table.ensure_open(1).unwrap(), 9);
        assert_eq!(table.len(), 1);

        table.remove(1);
        assert!(table.ensure_open(1).is_err());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_iter_buffer_capacity_is_fixed() {
        let buffer = IterBuffer::with_capacity(4096);
        assert_eq!(buffer.capacity(), 4096);
        assert!(buffer.keys.is_empty());
        assert!(!buffer.exhausted);
    }
}
