use crate::command::Opcode;
use crate::session::CompletionCallback;
use parking_lot::Mutex;
use std::ops::Deref;
use std::time::Instant;

/// Reusable byte-buffer handle for a key's value payload.
///
/// Buffers are pooled by the session. On the asynchronous path a buffer is
/// recycled as soon as the completion callback returns; on the synchronous
/// retrieve path the buffer is handed to the caller, who returns it with
/// [`crate::Device::release_value`] when done.
#[derive(Debug, Default)]
pub struct ValueBuffer {
    data: Vec<u8>,
}

impl ValueBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Replace the contents, reusing the existing allocation.
    pub(crate) fn fill(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn reset(&mut self) {
        self.data.clear();
    }
}

impl Deref for ValueBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Per-in-flight-operation record.
///
/// Owned exclusively by the engine from submission until its matching
/// completion is observed, then recycled. Callers never touch a context
/// directly.
pub(crate) struct OpContext {
    pub(crate) opcode: Opcode,
    pub(crate) token: u64,
    pub(crate) tag1: u64,
    pub(crate) tag2: u64,
    pub(crate) callback: Option<CompletionCallback>,
    pub(crate) value_buffer: Option<ValueBuffer>,
    pub(crate) submitted_at: Option<Instant>,
}

impl OpContext {
    fn new() -> Self {
        Self {
            opcode: Opcode::Store,
            token: 0,
            tag1: 0,
            tag2: 0,
            callback: None,
            value_buffer: None,
            submitted_at: None,
        }
    }

    /// Clear owner and callback state before the context re-enters the pool.
    /// A stale callback surviving here would fire for the wrong operation.
    fn reset(&mut self) {
        self.opcode = Opcode::Store;
        self.token = 0;
        self.tag1 = 0;
        self.tag2 = 0;
        self.callback = None;
        self.value_buffer = None;
        self.submitted_at = None;
    }
}

struct PoolInner {
    contexts: Vec<Box<OpContext>>,
    buffers: Vec<ValueBuffer>,
}

/// Fixed-cap free-lists of operation contexts and value buffers.
///
/// Both lists share one lock, held only across the push or pop itself,
/// never across a submission or a callback. Acquire falls back to fresh
/// construction when the free-list is empty; release drops entries beyond
/// `max_idle` so the pool never grows past the session's queue depth.
pub(crate) struct ResourcePool {
    inner: Mutex<PoolInner>,
    max_idle: usize,
}

impl ResourcePool {
    pub(crate) fn new(max_idle: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                contexts: Vec::new(),
                buffers: Vec::new(),
            }),
            max_idle,
        }
    }

    pub(crate) fn acquire_context(&self) -> Box<OpContext> {
        let pooled = self.inner.lock().contexts.pop();
        pooled.unwrap_or_else(|| Box::new(OpContext::new()))
    }

    pub(crate) fn release_context(&self, mut ctx: Box<OpContext>) {
        ctx.reset();
        let mut inner = self.inner.lock();
        if inner.contexts.len() < self.max_idle {
            inner.contexts.push(ctx);
        }
    }

    pub(crate) fn acquire_buffer(&self) -> ValueBuffer {
        let pooled = self.inner.lock().buffers.pop();
        pooled.unwrap_or_default()
    }

    pub(crate) fn release_buffer(&self, mut buf: ValueBuffer) {
        buf.reset();
        let mut inner = self.inner.lock();
        if inner.buffers.len() < self.max_idle {
            inner.buffers.push(buf);
        }
    }

    pub(crate) fn idle_contexts(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    pub(crate) fn idle_buffers(&self) -> usize {
        self.inner.lock().buffers.len()
    }
}
