//! In-memory emulated key-value device.
//!
//! The emulator mirrors the queue-pair shape of the real hardware: a
//! bounded submission queue, one completion queue per configured polling
//! thread, a fixed set of device-side iterator cursor slots, and raw
//! status codes translated through [`EMU_STATUS_TABLE`]. Commands queue on
//! submit and execute lazily when a completion queue is polled, so
//! completions genuinely arrive asynchronously with respect to submission.
//!
//! With persistence enabled the device writes a checksummed snapshot of
//! its containers on shutdown and replays it on the next open, skipping
//! corrupt records.

use crate::command::{Command, CommandDescriptor, StoreOption};
use crate::config::DeviceConfig;
use crate::error::{KvError, Result};
use crate::transport::{CompletionStatus, DeviceInfo, RawCompletion, Transport};
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Raw status codes reported by the emulated device.
pub const EMU_OK: i32 = 0x00;
pub const EMU_KEY_NOT_EXIST: i32 = 0x10;
pub const EMU_KEY_EXIST: i32 = 0x11;
pub const EMU_INVALID_PARAM: i32 = 0x20;
pub const EMU_VALUE_TOO_LONG: i32 = 0x21;
pub const EMU_ITERATE_LIMIT: i32 = 0x30;
pub const EMU_ITERATE_HANDLE_INVALID: i32 = 0x31;
pub const EMU_NOT_READY: i32 = 0x40;
pub const EMU_CAPACITY_EXCEEDED: i32 = 0x50;

/// Raw-status mapping table for the emulated backend.
pub const EMU_STATUS_TABLE: &[(i32, CompletionStatus)] = &[
    (EMU_OK, CompletionStatus::Success),
    (EMU_KEY_NOT_EXIST, CompletionStatus::KeyNotFound),
    (EMU_KEY_EXIST, CompletionStatus::KeyExists),
    (EMU_INVALID_PARAM, CompletionStatus::InvalidArgument),
    (EMU_VALUE_TOO_LONG, CompletionStatus::InvalidArgument),
    (EMU_ITERATE_LIMIT, CompletionStatus::IteratorLimitExceeded),
    (EMU_ITERATE_HANDLE_INVALID, CompletionStatus::InvalidIteratorHandle),
    (EMU_NOT_READY, CompletionStatus::DeviceNotReady),
    (EMU_CAPACITY_EXCEEDED, CompletionStatus::DeviceError),
];

const MAX_KEY_SIZE: usize = 255;
const MAX_VALUE_SIZE: usize = 2 * 1024 * 1024;
const ITERATOR_SLOTS: usize = 16;

/// Emulated per-operation media overhead, charged to physical writes so
/// the reported write-amplification factor behaves like real firmware.
const MEDIA_OVERHEAD_BYTES: u64 = 64;

struct EmuCursor {
    container: u32,
    bitmask: u32,
    pattern: u32,
    /// Last key handed out; the next batch resumes strictly after it.
    pos: Option<Vec<u8>>,
}

type Container = Arc<SkipMap<Vec<u8>, Vec<u8>>>;

/// In-memory emulated device backend.
pub struct EmuDevice {
    info: DeviceInfo,
    sq: Mutex<VecDeque<CommandDescriptor>>,
    sq_capacity: usize,
    cqs: Vec<Mutex<VecDeque<RawCompletion>>>,
    next_cq: AtomicUsize,
    cursors: Mutex<Vec<Option<EmuCursor>>>,
    containers: DashMap<u32, Container>,
    used: AtomicU64,
    logical_written: AtomicU64,
    physical_written: AtomicU64,
    ready: AtomicBool,
    snapshot_path: Option<PathBuf>,
}

impl EmuDevice {
    /// Initialize an emulated device from session configuration.
    ///
    /// The `emu:` scheme prefix of the device path is stripped; the
    /// remainder is the snapshot location when persistence is on.
    pub fn open(config: &DeviceConfig) -> Result<Self> {
        let path = config
            .device_path
            .strip_prefix("emu:")
            .unwrap_or(&config.device_path);

        let snapshot_path = if config.persistent && !path.is_empty() {
            Some(PathBuf::from(path))
        } else {
            None
        };

        let info = DeviceInfo {
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
            total_capacity: config.reserved_mem_mb as u64 * 1024 * 1024,
            iterator_slots: ITERATOR_SLOTS,
            completion_queues: config.completion_queues as usize,
        };

        let cqs = (0..info.completion_queues)
            .map(|_| Mutex::new(VecDeque::new()))
            .collect();

        let device = Self {
            info,
            sq: Mutex::new(VecDeque::new()),
            sq_capacity: config.queue_depth as usize,
            cqs,
            next_cq: AtomicUsize::new(0),
            cursors: Mutex::new((0..ITERATOR_SLOTS).map(|_| None).collect()),
            containers: DashMap::new(),
            used: AtomicU64::new(0),
            logical_written: AtomicU64::new(0),
            physical_written: AtomicU64::new(0),
            ready: AtomicBool::new(true),
            snapshot_path,
        };

        if let Some(path) = &device.snapshot_path {
            if path.exists() {
                device.load_snapshot(path)?;
            }
        }

        tracing::info!(
            "Emulated device ready: capacity {} MB, queue depth {}, {} completion queue(s)",
            config.reserved_mem_mb,
            config.queue_depth,
            info.completion_queues
        );
        Ok(device)
    }

    fn container(&self, id: u32) -> Container {
        self.containers
            .entry(id)
            .or_insert_with(|| Arc::new(SkipMap::new()))
            .clone()
    }

    /// Execute everything queued on the submission side, distributing
    /// completions round-robin across the completion queues.
    fn execute_pending(&self) {
        let pending: Vec<CommandDescriptor> = {
            let mut sq = self.sq.lock();
            sq.drain(..).collect()
        };

        for descriptor in pending {
            let completion = self.execute(descriptor);
            let cq = self.next_cq.fetch_add(1, Ordering::Relaxed) % self.cqs.len();
            self.cqs[cq].lock().push_back(completion);
        }
    }

    fn execute(&self, descriptor: CommandDescriptor) -> RawCompletion {
        let CommandDescriptor {
            container,
            token,
            command,
        } = descriptor;
        let opcode = command.opcode();

        match command {
            Command::Store { key, value, option } => {
                let status = self.exec_store(container, key, value, option);
                RawCompletion::status_only(token, opcode, status)
            }
            Command::Retrieve {
                key,
                buffer_capacity,
            } => {
                let mut completion = RawCompletion::status_only(token, opcode, EMU_OK);
                match self.exec_retrieve(container, &key, buffer_capacity) {
                    Ok(value) => completion.value = Some(value),
                    Err(status) => completion.status = status,
                }
                completion
            }
            Command::Delete { key } => {
                let status = self.exec_delete(container, &key);
                RawCompletion::status_only(token, opcode, status)
            }
            Command::Exist { keys } => {
                let map = self.containers.get(&container).map(|c| c.clone());
                let bits = keys
                    .iter()
                    .map(|key| match &map {
                        Some(map) => u8::from(map.contains_key(key)),
                        None => 0,
                    })
                    .collect();
                let mut completion = RawCompletion::status_only(token, opcode, EMU_OK);
                completion.exist = Some(bits);
                completion
            }
            Command::IterOpen { bitmask, pattern } => {
                let mut completion = RawCompletion::status_only(token, opcode, EMU_OK);
                match self.exec_iter_open(container, bitmask, pattern) {
                    Ok(handle) => completion.iter_handle = Some(handle),
                    Err(status) => completion.status = status,
                }
                completion
            }
            Command::IterNext {
                handle,
                buffer_capacity,
            } => {
                let mut completion = RawCompletion::status_only(token, opcode, EMU_OK);
                match self.exec_iter_next(handle, buffer_capacity) {
                    Ok((keys, done)) => {
                        completion.iter_keys = keys;
                        completion.iter_done = done;
                    }
                    Err(status) => completion.status = status,
                }
                completion
            }
            Command::IterClose { handle } => {
                let status = self.exec_iter_close(handle);
                RawCompletion::status_only(token, opcode, status)
            }
        }
    }

    fn exec_store(&self, container: u32, key: Vec<u8>, value: Vec<u8>, option: StoreOption) -> i32 {
        let map = self.container(container);
        let old_len = map.get(&key).map(|entry| entry.value().len());

        let new_value = match option {
            StoreOption::NoOverwrite => {
                if old_len.is_some() {
                    return EMU_KEY_EXIST;
                }
                value
            }
            StoreOption::Append => match map.get(&key) {
                Some(entry) => {
                    let mut combined = entry.value().clone();
                    combined.extend_from_slice(&value);
                    combined
                }
                None => value,
            },
            StoreOption::Overwrite => value,
        };

        if new_value.len() > MAX_VALUE_SIZE {
            return EMU_VALUE_TOO_LONG;
        }

        let old_footprint = old_len.map(|len| (key.len() + len) as u64).unwrap_or(0);
        let new_footprint = (key.len() + new_value.len()) as u64;
        let used = self.used.load(Ordering::Relaxed);
        if used + new_footprint.saturating_sub(old_footprint) > self.info.total_capacity {
            return EMU_CAPACITY_EXCEEDED;
        }

        let logical = new_value.len() as u64;
        let physical = logical + key.len() as u64 + MEDIA_OVERHEAD_BYTES;
        map.insert(key, new_value);

        self.used
            .fetch_add(new_footprint.wrapping_sub(old_footprint), Ordering::Relaxed);
        self.logical_written.fetch_add(logical, Ordering::Relaxed);
        self.physical_written.fetch_add(physical, Ordering::Relaxed);
        EMU_OK
    }

    fn exec_retrieve(
        &self,
        container: u32,
        key: &[u8],
        buffer_capacity: usize,
    ) -> std::result::Result<Vec<u8>, i32> {
        let map = self
            .containers
            .get(&container)
            .map(|c| c.clone())
            .ok_or(EMU_KEY_NOT_EXIST)?;
        let entry = map.get(key).ok_or(EMU_KEY_NOT_EXIST)?;
        let value = entry.value();
        if value.len() > buffer_capacity {
            return Err(EMU_VALUE_TOO_LONG);
        }
        Ok(value.clone())
    }

    fn exec_delete(&self, container: u32, key: &[u8]) -> i32 {
        let Some(map) = self.containers.get(&container).map(|c| c.clone()) else {
            return EMU_KEY_NOT_EXIST;
        };
        let result = match map.remove(key) {
            Some(entry) => {
                let footprint = (entry.key().len() + entry.value().len()) as u64;
                self.used.fetch_sub(footprint, Ordering::Relaxed);
                self.physical_written
                    .fetch_add(key.len() as u64 + MEDIA_OVERHEAD_BYTES, Ordering::Relaxed);
                EMU_OK
            }
            None => EMU_KEY_NOT_EXIST,
        };
        result
    }

    fn exec_iter_open(
        &self,
        container: u32,
        bitmask: u32,
        pattern: u32,
    ) -> std::result::Result<u16, i32> {
        let mut cursors = self.cursors.lock();
        let slot = cursors
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(EMU_ITERATE_LIMIT)?;
        cursors[slot] = Some(EmuCursor {
            container,
            bitmask,
            pattern,
            pos: None,
        });
        tracing::debug!(
            "Opened cursor {} on container {} (mask {:#010x}, pattern {:#010x})",
            slot + 1,
            container,
            bitmask,
            pattern
        );
        // Handles are 1-based so a zeroed handle is never valid.
        Ok((slot + 1) as u16)
    }

    fn exec_iter_next(
        &self,
        handle: u16,
        buffer_capacity: usize,
    ) -> std::result::Result<(Vec<Vec<u8>>, bool), i32> {
        let mut cursors = self.cursors.lock();
        let slot = (handle as usize)
            .checked_sub(1)
            .filter(|slot| *slot < cursors.len())
            .ok_or(EMU_ITERATE_HANDLE_INVALID)?;
        let cursor = cursors[slot]
            .as_mut()
            .ok_or(EMU_ITERATE_HANDLE_INVALID)?;

        let Some(map) = self.containers.get(&cursor.container).map(|c| c.clone()) else {
            return Ok((Vec::new(), true));
        };

        let lower = match &cursor.pos {
            Some(pos) => Bound::Excluded(pos.clone()),
            None => Bound::Unbounded,
        };

        let mut keys = Vec::new();
        let mut used_bytes = 0usize;
        let mut done = true;
        for entry in map.range((lower, Bound::Unbounded)) {
            let key = entry.key();
            if !filter_match(key, cursor.bitmask, cursor.pattern) {
                continue;
            }
            if used_bytes + key.len() > buffer_capacity {
                done = false;
                break;
            }
            used_bytes += key.len();
            keys.push(key.clone());
            cursor.pos = Some(key.clone());
        }

        Ok((keys, done))
    }

    fn exec_iter_close(&self, handle: u16) -> i32 {
        let mut cursors = self.cursors.lock();
        let Some(slot) = (handle as usize)
            .checked_sub(1)
            .filter(|slot| *slot < cursors.len())
        else {
            return EMU_ITERATE_HANDLE_INVALID;
        };
        if cursors[slot].take().is_none() {
            return EMU_ITERATE_HANDLE_INVALID;
        }
        tracing::debug!("Closed cursor {}", handle);
        EMU_OK
    }

    /// Load a snapshot written by a previous session.
    ///
    /// Records failing their checksum, and anything after them, are
    /// discarded with a warning; everything before remains usable.
    fn load_snapshot(&self, path: &PathBuf) -> Result<()> {
        let data = std::fs::read(path)?;
        tracing::info!("Loading snapshot {:?} ({} bytes)", path, data.len());

        let mut offset = 0usize;
        let mut loaded = 0u64;
        while offset < data.len() {
            const HEADER: usize = 4 + 2 + 4 + 4;
            if offset + HEADER > data.len() {
                tracing::warn!("Truncated snapshot header at offset {}, stopping", offset);
                break;
            }
            let container = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
            let key_len =
                u16::from_le_bytes(data[offset + 4..offset + 6].try_into().unwrap()) as usize;
            let value_len =
                u32::from_le_bytes(data[offset + 6..offset + 10].try_into().unwrap()) as usize;
            let expected_crc =
                u32::from_le_bytes(data[offset + 10..offset + 14].try_into().unwrap());
            offset += HEADER;

            if offset + key_len + value_len > data.len() {
                tracing::warn!("Truncated snapshot record at offset {}, stopping", offset);
                break;
            }
            let key = &data[offset..offset + key_len];
            let value = &data[offset + key_len..offset + key_len + value_len];
            offset += key_len + value_len;

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(key);
            hasher.update(value);
            let actual_crc = hasher.finalize();
            if actual_crc != expected_crc {
                tracing::warn!(
                    "Snapshot checksum mismatch (expected {:#x}, got {:#x}), stopping",
                    expected_crc,
                    actual_crc
                );
                break;
            }

            self.container(container)
                .insert(key.to_vec(), value.to_vec());
            self.used
                .fetch_add((key_len + value_len) as u64, Ordering::Relaxed);
            loaded += 1;
        }

        tracing::info!("Snapshot load complete: {} records", loaded);
        Ok(())
    }

    fn persist_snapshot(&self, path: &PathBuf) -> Result<()> {
        let mut out = Vec::new();
        let mut records = 0u64;
        for container in self.containers.iter() {
            let id = *container.key();
            for entry in container.value().iter() {
                let key = entry.key();
                let value = entry.value();
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(key);
                hasher.update(value);

                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&(key.len() as u16).to_le_bytes());
                out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                out.extend_from_slice(&hasher.finalize().to_le_bytes());
                out.extend_from_slice(key);
                out.extend_from_slice(value);
                records += 1;
            }
        }
        std::fs::write(path, &out)?;
        tracing::info!("Persisted snapshot {:?}: {} records", path, records);
        Ok(())
    }
}

/// Cursor filter over the first four key bytes, big-endian, zero-padded.
fn filter_match(key: &[u8], bitmask: u32, pattern: u32) -> bool {
    let mut prefix = [0u8; 4];
    let take = key.len().min(4);
    prefix[..take].copy_from_slice(&key[..take]);
    (u32::from_be_bytes(prefix) ^ pattern) & bitmask == 0
}

impl Transport for EmuDevice {
    fn submit(&self, descriptor: CommandDescriptor) -> Result<()> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(KvError::DeviceNotReady);
        }
        let mut sq = self.sq.lock();
        if sq.len() >= self.sq_capacity {
            return Err(KvError::QueueFull);
        }
        sq.push_back(descriptor);
        Ok(())
    }

    fn poll(&self, queue: usize, max: usize) -> Result<Vec<RawCompletion>> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(KvError::DeviceNotReady);
        }
        if queue >= self.cqs.len() {
            return Err(KvError::InvalidArgument(format!(
                "completion queue {} out of range ({} configured)",
                queue,
                self.cqs.len()
            )));
        }

        self.execute_pending();

        let mut cq = self.cqs[queue].lock();
        let limit = if max == 0 { cq.len() } else { max.min(cq.len()) };
        Ok(cq.drain(..limit).collect())
    }

    fn info(&self) -> DeviceInfo {
        self.info
    }

    fn status_table(&self) -> &'static [(i32, CompletionStatus)] {
        EMU_STATUS_TABLE
    }

    fn used_bytes(&self) -> Result<u64> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(KvError::DeviceNotReady);
        }
        Ok(self.used.load(Ordering::Relaxed))
    }

    fn waf(&self) -> Result<f32> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(KvError::DeviceNotReady);
        }
        let logical = self.logical_written.load(Ordering::Relaxed);
        if logical == 0 {
            return Ok(1.0);
        }
        let physical = self.physical_written.load(Ordering::Relaxed);
        Ok(physical as f32 / logical as f32)
    }

    fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.persist_snapshot(path) {
                tracing::warn!("Snapshot persistence failed: {}", e);
            }
        }
        tracing::info!("Emulated device shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Opcode;

    fn device() -> EmuDevice {
        let config = DeviceConfig::new("emu:").with_queue_depth(8);
        EmuDevice::open(&config).unwrap()
    }

    fn descriptor(token: u64, command: Command) -> CommandDescriptor {
        CommandDescriptor {
            container: 0,
            token,
            command,
        }
    }

    #[test]
    fn test_store_then_retrieve_roundtrip() {
        let dev = device();
        dev.submit(descriptor(
            1,
            Command::Store {
                key: b"alpha".to_vec(),
                value: b"one".to_vec(),
                option: StoreOption::default(),
            },
        ))
        .unwrap();
        dev.submit(descriptor(
            2,
            Command::Retrieve {
                key: b"alpha".to_vec(),
                buffer_capacity: 1024,
            },
        ))
        .unwrap();

        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].status, EMU_OK);
        assert_eq!(completions[1].opcode, Opcode::Retrieve);
        assert_eq!(completions[1].value.as_deref(), Some(&b"one"[..]));
    }

    #[test]
    fn test_retrieve_missing_key() {
        let dev = device();
        dev.submit(descriptor(
            1,
            Command::Retrieve {
                key: b"ghost".to_vec(),
                buffer_capacity: 16,
            },
        ))
        .unwrap();
        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions[0].status, EMU_KEY_NOT_EXIST);
    }

    #[test]
    fn test_no_overwrite_conflict() {
        let dev = device();
        for token in 1..=2 {
            dev.submit(descriptor(
                token,
                Command::Store {
                    key: b"dup".to_vec(),
                    value: b"v".to_vec(),
                    option: StoreOption::NoOverwrite,
                },
            ))
            .unwrap();
        }
        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions[0].status, EMU_OK);
        assert_eq!(completions[1].status, EMU_KEY_EXIST);
    }

    #[test]
    fn test_append_concatenates() {
        let dev = device();
        dev.submit(descriptor(
            1,
            Command::Store {
                key: b"log".to_vec(),
                value: b"ab".to_vec(),
                option: StoreOption::Append,
            },
        ))
        .unwrap();
        dev.submit(descriptor(
            2,
            Command::Store {
                key: b"log".to_vec(),
                value: b"cd".to_vec(),
                option: StoreOption::Append,
            },
        ))
        .unwrap();
        dev.submit(descriptor(
            3,
            Command::Retrieve {
                key: b"log".to_vec(),
                buffer_capacity: 16,
            },
        ))
        .unwrap();
        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions[2].value.as_deref(), Some(&b"abcd"[..]));
    }

    #[test]
    fn test_queue_full_at_depth() {
        let dev = device();
        for token in 0..8 {
            dev.submit(descriptor(
                token,
                Command::Delete {
                    key: b"k".to_vec(),
                },
            ))
            .unwrap();
        }
        let overflow = dev.submit(descriptor(
            99,
            Command::Delete {
                key: b"k".to_vec(),
            },
        ));
        assert!(matches!(overflow, Err(KvError::QueueFull)));

        // Draining the queue frees submission slots again.
        dev.poll(0, 1).unwrap();
        dev.submit(descriptor(
            100,
            Command::Delete {
                key: b"k".to_vec(),
            },
        ))
        .unwrap();
    }

    #[test]
    fn test_iterator_slot_limit() {
        let dev = device();
        for token in 0..ITERATOR_SLOTS as u64 + 1 {
            dev.submit(descriptor(
                token,
                Command::IterOpen {
                    bitmask: 0,
                    pattern: 0,
                },
            ))
            .unwrap();
        }
        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions.len(), ITERATOR_SLOTS + 1);
        for completion in &completions[..ITERATOR_SLOTS] {
            assert_eq!(completion.status, EMU_OK);
        }
        assert_eq!(completions[ITERATOR_SLOTS].status, EMU_ITERATE_LIMIT);
    }

    #[test]
    fn test_filter_match_prefix_semantics() {
        // Full mask: first four bytes must equal the pattern exactly.
        assert!(filter_match(b"abcd-tail", 0xFFFF_FFFF, u32::from_be_bytes(*b"abcd")));
        assert!(!filter_match(b"abce", 0xFFFF_FFFF, u32::from_be_bytes(*b"abcd")));
        // One-byte mask: only the leading byte is compared.
        assert!(filter_match(b"a999", 0xFF00_0000, u32::from_be_bytes(*b"a\0\0\0")));
        // Short keys are zero-padded before masking.
        assert!(filter_match(b"a", 0xFF00_0000, u32::from_be_bytes(*b"a\0\0\0")));
    }

    #[test]
    fn test_shutdown_rejects_traffic() {
        let dev = device();
        dev.shutdown();
        assert!(matches!(
            dev.submit(descriptor(
                1,
                Command::Delete {
                    key: b"k".to_vec()
                }
            )),
            Err(KvError::DeviceNotReady)
        ));
        assert!(matches!(dev.poll(0, 0), Err(KvError::DeviceNotReady)));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("kv.snapshot");
        let path = format!("emu:{}", snapshot.display());
        let config = DeviceConfig::new(path).with_persistence(true);

        let dev = EmuDevice::open(&config).unwrap();
        dev.submit(descriptor(
            1,
            Command::Store {
                key: b"persisted".to_vec(),
                value: b"survives".to_vec(),
                option: StoreOption::default(),
            },
        ))
        .unwrap();
        dev.poll(0, 0).unwrap();
        dev.shutdown();
        assert!(snapshot.exists());

        let dev = EmuDevice::open(&config).unwrap();
        dev.submit(descriptor(
            2,
            Command::Retrieve {
                key: b"persisted".to_vec(),
                buffer_capacity: 64,
            },
        ))
        .unwrap();
        let completions = dev.poll(0, 0).unwrap();
        assert_eq!(completions[0].value.as_deref(), Some(&b"survives"[..]));
    }

    #[test]
    fn test_corrupt_snapshot_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("kv.snapshot");
        std::fs::write(&snapshot, b"garbage that is not a snapshot").unwrap();

        let path = format!("emu:{}", snapshot.display());
        let config = DeviceConfig::new(path).with_persistence(true);
        // Open succeeds; the corrupt tail is discarded.
        let dev = EmuDevice::open(&config).unwrap();
        assert_eq!(dev.used_bytes().unwrap(), 0);
    }
}
