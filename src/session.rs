use crate::command::{Command, CommandDescriptor, Opcode, StoreOption};
use crate::config::DeviceConfig;
use crate::error::{KvError, Result};
use crate::iter::{IterBatch, IteratorTable};
use crate::metrics::Metrics;
use crate::pool::{ResourcePool, ValueBuffer};
use crate::transport::emu::EmuDevice;
use crate::transport::{DeviceInfo, RawCompletion, Transport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Completion payload delivered to a caller's callback.
///
/// The callback receives the event mutably and may move the retrieved
/// value buffer out with [`CompletionEvent::take_value`]; anything left
/// behind is recycled into the session pools as soon as the callback
/// returns.
pub struct CompletionEvent {
    pub opcode: Opcode,
    pub result: Result<()>,
    pub tag1: u64,
    pub tag2: u64,
    value: Option<ValueBuffer>,
    /// One byte per queried key for exist batches, 1 if present.
    pub exist: Option<Vec<u8>>,
    /// Key batch for iterator-next completions.
    pub iter: Option<IterBatch>,
    pub(crate) iter_handle: Option<u16>,
}

impl CompletionEvent {
    /// Retrieved value bytes, if this completion carries any.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Take ownership of the retrieved value buffer.
    ///
    /// The caller then owns its return: hand it back with
    /// [`Device::release_value`] once done.
    pub fn take_value(&mut self) -> Option<ValueBuffer> {
        self.value.take()
    }
}

/// Per-operation completion callback.
///
/// Fires exactly once, outside every engine lock, so it may itself call
/// back into submission.
pub type CompletionCallback = Box<dyn FnOnce(&mut CompletionEvent) + Send + 'static>;

/// Result of one synchronously driven operation.
pub(crate) struct SyncOutcome {
    pub(crate) result: Result<()>,
    pub(crate) value: Option<ValueBuffer>,
    pub(crate) exist: Option<Vec<u8>>,
    pub(crate) iter: Option<IterBatch>,
    pub(crate) iter_handle: Option<u16>,
}

/// Single-slot signal observed by the synchronous spin-wait.
#[derive(Default)]
struct SyncSlot(Mutex<Option<SyncOutcome>>);

impl SyncSlot {
    fn set(&self, outcome: SyncOutcome) {
        *self.0.lock() = Some(outcome);
    }

    fn take(&self) -> Option<SyncOutcome> {
        self.0.lock().take()
    }
}

/// One open device session.
///
/// Owns the transport backend, the resource pools, the in-flight context
/// table, and the iterator registry. All key-value traffic flows through
/// [`Device::process_completions`], which the caller (or its designated
/// polling threads) must invoke repeatedly; the engine owns no threads of
/// its own.
///
/// # Example
///
/// ```no_run
/// use qpairkv::{Device, DeviceConfig};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DeviceConfig::new("emu:/dev/kvemul");
///     let device = Device::open(config)?;
///
///     device.store_sync(0, b"key1", b"value1", Default::default())?;
///     let value = device.retrieve_sync(0, b"key1")?;
///     assert_eq!(&*value, b"value1");
///     device.release_value(value);
///
///     device.close()?;
///     Ok(())
/// }
/// ```
pub struct Device {
    config: DeviceConfig,
    transport: Arc<dyn Transport>,
    pub(crate) pool: ResourcePool,
    inflight: Mutex<HashMap<u64, Box<crate::pool::OpContext>>>,
    pub(crate) iterators: IteratorTable,
    metrics: Metrics,
    next_token: AtomicU64,
}

impl Device {
    /// Open a device session, selecting the backend from the configured
    /// device path.
    ///
    /// Paths with the `emu:` scheme (or naming the emulator node) open the
    /// in-memory emulated backend; anything else is rejected.
    pub fn open(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        if config.device_path.starts_with("emu:") || config.device_path.contains("kvemul") {
            let transport = Arc::new(EmuDevice::open(&config)?);
            Self::with_transport(config, transport)
        } else {
            Err(KvError::ConfigError(format!(
                "unsupported device path: {}",
                config.device_path
            )))
        }
    }

    /// Open a session over an already-initialized transport backend.
    pub fn with_transport(config: DeviceConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            "Device session open: path {}, queue depth {}, submission mask {:#x}, completion mask {:#x}",
            config.device_path,
            config.queue_depth,
            config.submission_core_mask,
            config.completion_core_mask
        );
        let max_idle = config.queue_depth as usize;
        Ok(Self {
            transport,
            pool: ResourcePool::new(max_idle),
            inflight: Mutex::new(HashMap::new()),
            iterators: IteratorTable::new(),
            metrics: Metrics::new(),
            next_token: AtomicU64::new(1),
            config,
        })
    }

    // -------------------------------------------------------------------
    // Asynchronous submission
    // -------------------------------------------------------------------

    /// Store a key-value pair; the result arrives via `callback`.
    ///
    /// Returns `Ok(())` once the command is accepted by the submission
    /// queue (pending), or an immediate submission failure.
    pub fn store(
        &self,
        container: u32,
        key: &[u8],
        value: &[u8],
        option: StoreOption,
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<()> {
        self.submit_with_callback(
            container,
            Command::Store {
                key: key.to_vec(),
                value: value.to_vec(),
                option,
            },
            tag1,
            tag2,
            callback,
        )
        .map(|_| ())
    }

    /// Retrieve the value stored under `key`; the result arrives via
    /// `callback`, which can read it with [`CompletionEvent::value`].
    pub fn retrieve(
        &self,
        container: u32,
        key: &[u8],
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<()> {
        let buffer_capacity = self.transport.info().max_value_size;
        self.submit_with_callback(
            container,
            Command::Retrieve {
                key: key.to_vec(),
                buffer_capacity,
            },
            tag1,
            tag2,
            callback,
        )
        .map(|_| ())
    }

    /// Delete `key`; the result arrives via `callback`.
    pub fn delete(
        &self,
        container: u32,
        key: &[u8],
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<()> {
        self.submit_with_callback(
            container,
            Command::Delete { key: key.to_vec() },
            tag1,
            tag2,
            callback,
        )
        .map(|_| ())
    }

    /// Check a batch of keys for existence.
    ///
    /// `result_buffer_len` must equal the batch size; the completion
    /// carries one byte per key in batch order.
    pub fn exist(
        &self,
        container: u32,
        keys: &[&[u8]],
        result_buffer_len: usize,
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<()> {
        if keys.len() != result_buffer_len {
            return Err(KvError::InvalidArgument(format!(
                "exist batch of {} keys does not match result buffer of {}",
                keys.len(),
                result_buffer_len
            )));
        }
        self.submit_with_callback(
            container,
            Command::Exist {
                keys: keys.iter().map(|key| key.to_vec()).collect(),
            },
            tag1,
            tag2,
            callback,
        )
        .map(|_| ())
    }

    /// Validate, wrap, and queue one command.
    ///
    /// Validation failures never consume a pooled context. On a rejected
    /// submit the context is reclaimed immediately, so only commands that
    /// actually reached the queue are outstanding.
    pub(crate) fn submit_with_callback(
        &self,
        container: u32,
        command: Command,
        tag1: u64,
        tag2: u64,
        callback: CompletionCallback,
    ) -> Result<u64> {
        let info = self.transport.info();
        command.validate(&info)?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let opcode = command.opcode();

        let mut ctx = self.pool.acquire_context();
        ctx.opcode = opcode;
        ctx.token = token;
        ctx.tag1 = tag1;
        ctx.tag2 = tag2;
        ctx.callback = Some(callback);
        ctx.submitted_at = Some(Instant::now());
        if opcode == Opcode::Retrieve {
            ctx.value_buffer = Some(self.pool.acquire_buffer());
        }

        self.inflight.lock().insert(token, ctx);

        let descriptor = CommandDescriptor {
            container,
            token,
            command,
        };
        match self.transport.submit(descriptor) {
            Ok(()) => {
                self.metrics.incr_submitted();
                Ok(token)
            }
            Err(e) => {
                if let Some(mut ctx) = self.inflight.lock().remove(&token) {
                    if let Some(buffer) = ctx.value_buffer.take() {
                        self.pool.release_buffer(buffer);
                    }
                    self.pool.release_context(ctx);
                }
                if matches!(e, KvError::QueueFull) {
                    self.metrics.incr_queue_full();
                }
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------
    // Synchronous submission
    // -------------------------------------------------------------------

    /// Store a key-value pair, driving completion polling until the
    /// result is observed.
    pub fn store_sync(
        &self,
        container: u32,
        key: &[u8],
        value: &[u8],
        option: StoreOption,
    ) -> Result<()> {
        let outcome = self.submit_sync(
            container,
            Command::Store {
                key: key.to_vec(),
                value: value.to_vec(),
                option,
            },
        )?;
        outcome.result
    }

    /// Retrieve a value synchronously.
    ///
    /// The returned buffer is on loan from the session pool; hand it back
    /// with [`Device::release_value`] when done with the bytes.
    pub fn retrieve_sync(&self, container: u32, key: &[u8]) -> Result<ValueBuffer> {
        let buffer_capacity = self.transport.info().max_value_size;
        let outcome = self.submit_sync(
            container,
            Command::Retrieve {
                key: key.to_vec(),
                buffer_capacity,
            },
        )?;
        outcome.result?;
        Ok(outcome.value.unwrap_or_default())
    }

    /// Delete a key synchronously.
    pub fn delete_sync(&self, container: u32, key: &[u8]) -> Result<()> {
        let outcome = self.submit_sync(container, Command::Delete { key: key.to_vec() })?;
        outcome.result
    }

    /// Check a batch of keys synchronously, writing one byte per key into
    /// `results` (1 if present).
    pub fn exist_sync(&self, container: u32, keys: &[&[u8]], results: &mut [u8]) -> Result<()> {
        if keys.len() != results.len() {
            return Err(KvError::InvalidArgument(format!(
                "exist batch of {} keys does not match result buffer of {}",
                keys.len(),
                results.len()
            )));
        }
        let outcome = self.submit_sync(
            container,
            Command::Exist {
                keys: keys.iter().map(|key| key.to_vec()).collect(),
            },
        )?;
        outcome.result?;
        match outcome.exist {
            Some(bits) if bits.len() == results.len() => {
                results.copy_from_slice(&bits);
                Ok(())
            }
            _ => {
                tracing::warn!("Exist completion carried a malformed result batch");
                Err(KvError::DeviceError(-1))
            }
        }
    }

    /// Submit one command and spin on the completion queues until its
    /// result lands in the single-slot signal.
    ///
    /// A full submission queue is retried here (and only here) after
    /// draining completions; both the retry loop and the wait are bounded
    /// by the configured spin budget. On `Timeout` the operation may still
    /// complete on a later poll; its slot simply goes unobserved.
    pub(crate) fn submit_sync(&self, container: u32, command: Command) -> Result<SyncOutcome> {
        let slot = Arc::new(SyncSlot::default());

        let mut attempts = 0u64;
        loop {
            let cb_slot = Arc::clone(&slot);
            let callback: CompletionCallback = Box::new(move |event: &mut CompletionEvent| {
                cb_slot.set(SyncOutcome {
                    result: std::mem::replace(&mut event.result, Ok(())),
                    value: event.value.take(),
                    exist: event.exist.take(),
                    iter: event.iter.take(),
                    iter_handle: event.iter_handle.take(),
                });
            });

            match self.submit_with_callback(container, command.clone(), 0, 0, callback) {
                Ok(_token) => break,
                Err(KvError::QueueFull) => {
                    attempts += 1;
                    if attempts >= self.config.sync_spin_budget {
                        return Err(KvError::QueueFull);
                    }
                    self.process_completions(0)?;
                    std::thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }

        let mut spins = 0u64;
        loop {
            self.process_completions(0)?;
            if let Some(outcome) = slot.take() {
                return Ok(outcome);
            }
            spins += 1;
            if spins >= self.config.sync_spin_budget {
                return Err(KvError::Timeout);
            }
            std::thread::yield_now();
        }
    }

    // -------------------------------------------------------------------
    // Completion processing
    // -------------------------------------------------------------------

    /// Poll every completion queue for up to `max` completions in total.
    ///
    /// A non-positive `max` drains everything currently available and
    /// returns; it never spins waiting for more. Returns the number of
    /// completions dispatched.
    ///
    /// Callers running one polling thread per completion queue should use
    /// [`Device::process_queue`] instead so each thread drains a disjoint
    /// queue.
    pub fn process_completions(&self, max: i32) -> Result<usize> {
        let queues = self.transport.info().completion_queues;
        let mut processed = 0usize;
        for queue in 0..queues {
            let budget = if max <= 0 {
                0
            } else {
                let remaining = max as usize - processed;
                if remaining == 0 {
                    break;
                }
                remaining
            };
            processed += self.process_queue(queue, budget)?;
        }
        Ok(processed)
    }

    /// Poll one completion queue for up to `max` completions (`0` means
    /// everything currently available).
    ///
    /// This is the only place contexts are retired. Concurrent callers on
    /// distinct queues never retire the same context: removal from the
    /// in-flight table is the single claim point.
    pub fn process_queue(&self, queue: usize, max: usize) -> Result<usize> {
        let completions = self.transport.poll(queue, max)?;
        let count = completions.len();
        for raw in completions {
            self.dispatch(raw);
        }
        Ok(count)
    }

    fn dispatch(&self, raw: RawCompletion) {
        let ctx = self.inflight.lock().remove(&raw.token);
        let Some(mut ctx) = ctx else {
            tracing::warn!("Dropping completion with unknown token {}", raw.token);
            return;
        };

        let status = self.transport.translate(raw.status);
        let result = status.into_result(raw.status);

        if let Some(submitted_at) = ctx.submitted_at {
            self.metrics
                .record_latency(ctx.opcode.as_str(), submitted_at.elapsed());
        }

        let value = match (ctx.value_buffer.take(), raw.value) {
            (Some(mut buffer), Some(bytes)) => {
                buffer.fill(&bytes);
                Some(buffer)
            }
            (Some(buffer), None) => {
                // Retrieve that carried no payload: recycle right away.
                self.pool.release_buffer(buffer);
                None
            }
            (None, _) => None,
        };

        let iter = (ctx.opcode == Opcode::IterNext).then(|| IterBatch {
            keys: raw.iter_keys,
            exhausted: raw.iter_done,
        });

        let mut event = CompletionEvent {
            opcode: ctx.opcode,
            result,
            tag1: ctx.tag1,
            tag2: ctx.tag2,
            value,
            exist: raw.exist,
            iter,
            iter_handle: raw.iter_handle,
        };

        let callback = ctx.callback.take();
        if let Some(callback) = callback {
            // Runs outside every engine lock; resubmission from here is fine.
            callback(&mut event);
        }
        if let Some(buffer) = event.value.take() {
            self.pool.release_buffer(buffer);
        }
        self.pool.release_context(ctx);
        self.metrics.incr_completed();
    }

    // -------------------------------------------------------------------
    // Telemetry and introspection
    // -------------------------------------------------------------------

    /// Static device properties.
    pub fn device_info(&self) -> DeviceInfo {
        self.transport.info()
    }

    /// Total device capacity in bytes.
    pub fn total_capacity(&self) -> Result<u64> {
        Ok(self.transport.info().total_capacity)
    }

    /// Bytes currently stored on the device.
    pub fn used_bytes(&self) -> Result<u64> {
        self.transport.used_bytes()
    }

    /// Fraction of device capacity in use, 0.0 to 1.0.
    pub fn utilization(&self) -> Result<f32> {
        let total = self.transport.info().total_capacity;
        if total == 0 {
            return Ok(0.0);
        }
        Ok(self.transport.used_bytes()? as f32 / total as f32)
    }

    /// Device-reported write-amplification factor.
    pub fn waf(&self) -> Result<f32> {
        self.transport.waf()
    }

    /// Return a loaned value buffer to the session pool.
    pub fn release_value(&self, buffer: ValueBuffer) {
        self.pool.release_buffer(buffer);
    }

    /// Number of operations submitted but not yet completed.
    pub fn outstanding(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Idle contexts currently held by the pool.
    pub fn idle_contexts(&self) -> usize {
        self.pool.idle_contexts()
    }

    /// Idle value buffers currently held by the pool.
    pub fn idle_buffers(&self) -> usize {
        self.pool.idle_buffers()
    }

    /// Session metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Session configuration.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Drain all outstanding completions, then tear the transport down.
    ///
    /// Bounded by the spin budget; surfaces `Timeout` if outstanding
    /// operations never complete, shutting the transport down regardless.
    pub fn close(self) -> Result<()> {
        let mut spins = 0u64;
        while self.outstanding() > 0 {
            self.process_completions(0)?;
            if self.outstanding() == 0 {
                break;
            }
            spins += 1;
            if spins >= self.config.sync_spin_budget {
                tracing::warn!(
                    "Closing with {} operations still outstanding",
                    self.outstanding()
                );
                self.transport.shutdown();
                return Err(KvError::Timeout);
            }
            std::thread::yield_now();
        }
        self.transport.shutdown();
        tracing::info!("Device session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn device() -> Device {
        let config = DeviceConfig::new("emu:").with_queue_depth(8);
        Device::open(config).unwrap()
    }

    #[test]
    fn test_sync_store_and_retrieve() {
        let dev = device();
        dev.store_sync(0, b"k", b"v", StoreOption::default()).unwrap();
        let value = dev.retrieve_sync(0, b"k").unwrap();
        assert_eq!(&*value, b"v");
        dev.release_value(value);
    }

    #[test]
    fn test_retrieve_missing_is_key_not_found() {
        let dev = device();
        assert!(matches!(
            dev.retrieve_sync(0, b"missing"),
            Err(KvError::KeyNotFound)
        ));
    }

    #[test]
    fn test_submission_validation_is_immediate() {
        let dev = device();
        let err = dev.store_sync(0, b"", b"v", StoreOption::default());
        assert!(matches!(err, Err(KvError::InvalidArgument(_))));
        // Nothing was queued and no context leaked.
        assert_eq!(dev.outstanding(), 0);
    }

    #[test]
    fn test_async_callback_fires_once_with_tags() {
        let dev = device();
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        dev.store(
            0,
            b"k",
            b"v",
            StoreOption::default(),
            11,
            22,
            Box::new(move |event| {
                assert!(event.result.is_ok());
                assert_eq!(event.tag1, 11);
                assert_eq!(event.tag2, 22);
                observed.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert_eq!(dev.process_completions(0).unwrap(), 1);
        assert_eq!(dev.process_completions(0).unwrap(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_resubmit() {
        let dev = Arc::new(device());
        let dev_inner = Arc::clone(&dev);
        dev.store(
            0,
            b"first",
            b"1",
            StoreOption::default(),
            0,
            0,
            Box::new(move |event| {
                assert!(event.result.is_ok());
                dev_inner
                    .store(0, b"second", b"2", StoreOption::default(), 0, 0, Box::new(|_| {}))
                    .unwrap();
            }),
        )
        .unwrap();

        assert_eq!(dev.process_completions(0).unwrap(), 1);
        assert_eq!(dev.process_completions(0).unwrap(), 1);
        let value = dev.retrieve_sync(0, b"second").unwrap();
        assert_eq!(&*value, b"2");
        dev.release_value(value);
    }

    #[test]
    fn test_exist_sync_batch() {
        let dev = device();
        dev.store_sync(0, b"present", b"v", StoreOption::default())
            .unwrap();
        let keys: Vec<&[u8]> = vec![b"present", b"absent"];
        let mut results = [0u8; 2];
        dev.exist_sync(0, &keys, &mut results).unwrap();
        assert_eq!(results, [1, 0]);
    }

    #[test]
    fn test_exist_batch_size_mismatch() {
        let dev = device();
        let keys: Vec<&[u8]> = vec![b"a", b"b"];
        let mut results = [0u8; 1];
        assert!(matches!(
            dev.exist_sync(0, &keys, &mut results),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_drain_on_empty_queue_returns_zero() {
        let dev = device();
        assert_eq!(dev.process_completions(0).unwrap(), 0);
        assert_eq!(dev.process_completions(-5).unwrap(), 0);
    }
}
