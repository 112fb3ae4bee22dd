use crate::error::{KvError, Result};
use crate::transport::DeviceInfo;

/// Operation code carried by every command and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Store,
    Retrieve,
    Delete,
    Exist,
    IterOpen,
    IterNext,
    IterClose,
}

impl Opcode {
    /// Stable label used for metrics and logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Store => "store",
            Opcode::Retrieve => "retrieve",
            Opcode::Delete => "delete",
            Opcode::Exist => "exist",
            Opcode::IterOpen => "iter_open",
            Opcode::IterNext => "iter_next",
            Opcode::IterClose => "iter_close",
        }
    }
}

/// Write-behavior flag for store commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOption {
    /// Overwrite an existing value (device default).
    #[default]
    Overwrite,
    /// Fail with `KeyExists` when the key is already present.
    NoOverwrite,
    /// Append the payload to the existing value, creating the key if absent.
    Append,
}

/// One key-value command, minus its correlation token and container.
///
/// Built by the session facade, validated against device-reported bounds,
/// then wrapped into a [`CommandDescriptor`] for the transport.
#[derive(Debug, Clone)]
pub enum Command {
    Store {
        key: Vec<u8>,
        value: Vec<u8>,
        option: StoreOption,
    },
    Retrieve {
        key: Vec<u8>,
        /// Capacity of the value buffer the caller can receive into.
        buffer_capacity: usize,
    },
    Delete {
        key: Vec<u8>,
    },
    Exist {
        keys: Vec<Vec<u8>>,
    },
    IterOpen {
        bitmask: u32,
        pattern: u32,
    },
    IterNext {
        handle: u16,
        /// Byte capacity of the caller-presized key batch buffer.
        buffer_capacity: usize,
    },
    IterClose {
        handle: u16,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Store { .. } => Opcode::Store,
            Command::Retrieve { .. } => Opcode::Retrieve,
            Command::Delete { .. } => Opcode::Delete,
            Command::Exist { .. } => Opcode::Exist,
            Command::IterOpen { .. } => Opcode::IterOpen,
            Command::IterNext { .. } => Opcode::IterNext,
            Command::IterClose { .. } => Opcode::IterClose,
        }
    }

    /// Validates the command against device-reported bounds.
    ///
    /// Rejections here are immediate submission failures; they never reach
    /// the completion processor.
    pub fn validate(&self, info: &DeviceInfo) -> Result<()> {
        match self {
            Command::Store { key, value, .. } => {
                check_key(key, info)?;
                if value.len() > info.max_value_size {
                    return Err(KvError::InvalidArgument(format!(
                        "value length {} exceeds device maximum {}",
                        value.len(),
                        info.max_value_size
                    )));
                }
                Ok(())
            }
            Command::Retrieve {
                key,
                buffer_capacity,
            } => {
                check_key(key, info)?;
                if *buffer_capacity == 0 {
                    return Err(KvError::InvalidArgument(
                        "retrieve buffer capacity must be non-zero".to_string(),
                    ));
                }
                Ok(())
            }
            Command::Delete { key } => check_key(key, info),
            Command::Exist { keys } => {
                if keys.is_empty() {
                    return Err(KvError::InvalidArgument(
                        "exist batch must contain at least one key".to_string(),
                    ));
                }
                for key in keys {
                    check_key(key, info)?;
                }
                Ok(())
            }
            Command::IterOpen { .. } | Command::IterClose { .. } => Ok(()),
            Command::IterNext {
                buffer_capacity, ..
            } => {
                // A batch buffer that cannot hold one maximum-size key would
                // force silent truncation; reject it up front instead.
                if *buffer_capacity < info.max_key_size {
                    return Err(KvError::InvalidArgument(format!(
                        "iterator buffer capacity {} cannot hold a full key (need {})",
                        buffer_capacity, info.max_key_size
                    )));
                }
                Ok(())
            }
        }
    }
}

fn check_key(key: &[u8], info: &DeviceInfo) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidArgument("key cannot be empty".to_string()));
    }
    if key.len() > info.max_key_size {
        return Err(KvError::InvalidArgument(format!(
            "key length {} exceeds device maximum {}",
            key.len(),
            info.max_key_size
        )));
    }
    Ok(())
}

/// Opaque command record handed to the transport queue.
///
/// The token is the completion correlation key; the transport echoes it
/// back verbatim in the matching raw completion.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub container: u32,
    pub token: u64,
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            max_key_size: 255,
            max_value_size: 2 * 1024 * 1024,
            total_capacity: 1024 * 1024,
            iterator_slots: 16,
            completion_queues: 1,
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        let cmd = Command::Delete { key: Vec::new() };
        assert!(matches!(
            cmd.validate(&info()),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let cmd = Command::Delete {
            key: vec![0u8; 256],
        };
        assert!(cmd.validate(&info()).is_err());
    }

    #[test]
    fn test_oversized_value_rejected() {
        let cmd = Command::Store {
            key: b"k".to_vec(),
            value: vec![0u8; 2 * 1024 * 1024 + 1],
            option: StoreOption::default(),
        };
        assert!(cmd.validate(&info()).is_err());
    }

    #[test]
    fn test_store_within_bounds_accepted() {
        let cmd = Command::Store {
            key: b"key".to_vec(),
            value: b"value".to_vec(),
            option: StoreOption::default(),
        };
        assert!(cmd.validate(&info()).is_ok());
    }

    #[test]
    fn test_empty_exist_batch_rejected() {
        let cmd = Command::Exist { keys: Vec::new() };
        assert!(cmd.validate(&info()).is_err());
    }

    #[test]
    fn test_iter_next_buffer_below_one_key_rejected() {
        let cmd = Command::IterNext {
            handle: 1,
            buffer_capacity: 64,
        };
        assert!(matches!(
            cmd.validate(&info()),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_opcode_labels() {
        assert_eq!(Opcode::Store.as_str(), "store");
        assert_eq!(Opcode::IterNext.as_str(), "iter_next");
    }
}
