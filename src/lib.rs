//! # qpairkv - Poll-Mode Key-Value Device Driver
//!
//! qpairkv is a user-space driver engine for queue-pair-based key-value
//! storage devices, implemented in Rust. Commands are placed on a bounded
//! submission queue and their results collected from completion queues by
//! cooperative polling; the engine owns no threads of its own.
//!
//! ## Architecture
//!
//! - **Resource Pools**: per-operation contexts and value buffers are
//!   recycled through fixed-cap free-lists instead of allocated per call
//! - **Command Submission**: store/retrieve/delete/exist and iterator
//!   commands are validated, bound to a pooled context, and queued;
//!   callers choose callback-driven or synchronous delivery
//! - **Completion Processing**: polling drains raw completions, translates
//!   device status codes through a per-backend table, fires each
//!   operation's callback exactly once, and retires its context
//! - **Iterators**: device-side cursors walk a container's keys under a
//!   four-byte prefix filter, one bounded batch per next call
//! - **Transport**: backends implement a small capability trait; an
//!   in-memory emulated device ships in-tree
//!
//! ## Example Usage
//!
//! ```no_run
//! use qpairkv::{Device, DeviceConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Open the emulated device
//!     let config = DeviceConfig::new("emu:/dev/kvemul");
//!     let device = Device::open(config)?;
//!
//!     // Store and retrieve synchronously
//!     device.store_sync(0, b"key1", b"value1", Default::default())?;
//!     let value = device.retrieve_sync(0, b"key1")?;
//!     assert_eq!(&*value, b"value1");
//!     device.release_value(value);
//!
//!     // Fire-and-forget with a completion callback
//!     device.store(0, b"key2", b"value2", Default::default(), 0, 0,
//!         Box::new(|event| {
//!             assert!(event.result.is_ok());
//!         }))?;
//!     device.process_completions(0)?;
//!
//!     // Iterate keys by prefix
//!     let iter = device.open_iterator(0, 0xFF00_0000, u32::from_be_bytes(*b"k\0\0\0"))?;
//!     let mut buffer = qpairkv::IterBuffer::with_capacity(4096);
//!     while {
//!         device.iterator_next(iter, &mut buffer)?;
//!         !buffer.exhausted
//!     } {}
//!     device.close_iterator(iter)?;
//!
//!     device.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`session`]: device session facade, submission, completion processing
//! - [`pool`]: pooled operation contexts and value buffers
//! - [`command`]: opcodes, options, and descriptor validation
//! - [`iter`]: iterator handles and the cursor batch protocol
//! - [`transport`]: backend capability trait and the emulated device
//! - [`metrics`]: latency histograms and traffic counters
//! - [`config`]: session configuration
//! - [`error`]: error types and result aliases

/// Session configuration and validation
pub mod config;

/// Opcodes, command options, and descriptor validation
pub mod command;

/// Pooled operation contexts and value buffers
pub mod pool;

/// Device session facade: submission, sync path, completion processing
pub mod session;

/// Iterator handles and the cursor batch protocol
pub mod iter;

/// Transport capability trait and backends
pub mod transport;

/// Latency histograms and traffic counters
pub mod metrics;

/// Error types and result aliases
pub mod error;

// Re-export commonly used types
pub use command::{Opcode, StoreOption};
pub use config::DeviceConfig;
pub use error::{KvError, Result};
pub use iter::{IterBatch, IterBuffer, IteratorHandle};
pub use pool::ValueBuffer;
pub use session::{CompletionCallback, CompletionEvent, Device};
pub use transport::{CompletionStatus, DeviceInfo, RawCompletion, Transport};
