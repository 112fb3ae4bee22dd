use crate::error::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a device session.
///
/// This structure contains all configurable parameters for qpairkv.
/// Queue depth and core affinity are fixed at session creation and never
/// change while operations are outstanding.
///
/// # Example
///
/// ```
/// use qpairkv::DeviceConfig;
///
/// let config = DeviceConfig::new("emu:/dev/kvemul")
///     .with_queue_depth(128)
///     .with_completion_queues(2);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device path handed to the transport backend.
    ///
    /// The scheme prefix selects the backend: `emu:` opens the in-memory
    /// emulated device, with the remainder used as its snapshot path when
    /// persistence is enabled.
    pub device_path: String,

    /// Open the device in synchronous mode (default: false).
    ///
    /// Passed through to the transport at init time. The engine itself
    /// offers both paths regardless of this flag.
    pub sync_mode: bool,

    /// Submission queue depth (default: 256).
    ///
    /// Number of commands the transport accepts before `submit` reports
    /// the queue full. Valid range: 1 - 4096.
    pub queue_depth: u32,

    /// CPU core mask for submission-side work (default: 0x1).
    pub submission_core_mask: u64,

    /// CPU core mask for completion polling threads (default: 0x2).
    pub completion_core_mask: u64,

    /// Number of completion queues, one per caller polling thread
    /// (default: 1).
    ///
    /// Each polling thread should drain its own queue. Valid range: 1 - 64.
    pub completion_queues: u32,

    /// Device-reserved memory in MB (default: 1024).
    ///
    /// The emulated backend uses this as its total capacity.
    pub reserved_mem_mb: u32,

    /// Persist emulated-device contents across sessions (default: false).
    pub persistent: bool,

    /// Spin budget for the synchronous completion wait (default: 1,000,000).
    ///
    /// Each spin is one drain of the completion queues followed by a yield.
    /// Exhausting the budget surfaces `Timeout`. Valid range: >= 1.
    pub sync_spin_budget: u64,
}

impl DeviceConfig {
    /// Creates a new configuration with the given device path and default
    /// values.
    ///
    /// # Default Values
    ///
    /// - Queue depth: 256
    /// - Completion queues: 1
    /// - Submission core mask: 0x1, completion core mask: 0x2
    /// - Reserved memory: 1024 MB
    /// - Persistence: disabled
    /// - Sync spin budget: 1,000,000
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            sync_mode: false,
            queue_depth: 256,
            submission_core_mask: 0x1,
            completion_core_mask: 0x2,
            completion_queues: 1,
            reserved_mem_mb: 1024,
            persistent: false,
            sync_spin_budget: 1_000_000,
        }
    }

    /// Loads a configuration from a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration parameters.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any parameter is invalid:
    /// - Empty device path
    /// - Queue depth outside 1 - 4096
    /// - Completion queue count outside 1 - 64, or above the queue depth
    /// - Reserved memory of 0 or above 64 GB
    /// - Sync spin budget of 0
    pub fn validate(&self) -> Result<()> {
        if self.device_path.is_empty() {
            return Err(KvError::ConfigError(
                "device_path cannot be empty".to_string(),
            ));
        }

        if self.queue_depth < 1 {
            return Err(KvError::ConfigError(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        if self.queue_depth > 4096 {
            return Err(KvError::ConfigError(
                "queue_depth cannot exceed 4096".to_string(),
            ));
        }

        if self.completion_queues < 1 {
            return Err(KvError::ConfigError(
                "completion_queues must be at least 1".to_string(),
            ));
        }
        if self.completion_queues > 64 {
            return Err(KvError::ConfigError(
                "completion_queues cannot exceed 64".to_string(),
            ));
        }
        if self.completion_queues > self.queue_depth {
            return Err(KvError::ConfigError(
                "completion_queues cannot exceed queue_depth".to_string(),
            ));
        }

        if self.reserved_mem_mb < 1 {
            return Err(KvError::ConfigError(
                "reserved_mem_mb must be at least 1".to_string(),
            ));
        }
        if self.reserved_mem_mb > 64 * 1024 {
            return Err(KvError::ConfigError(
                "reserved_mem_mb cannot exceed 65536".to_string(),
            ));
        }

        if self.sync_spin_budget < 1 {
            return Err(KvError::ConfigError(
                "sync_spin_budget must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Set synchronous device mode
    pub fn with_sync_mode(mut self, sync: bool) -> Self {
        self.sync_mode = sync;
        self
    }

    /// Set submission queue depth
    pub fn with_queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set submission core mask
    pub fn with_submission_core_mask(mut self, mask: u64) -> Self {
        self.submission_core_mask = mask;
        self
    }

    /// Set completion core mask
    pub fn with_completion_core_mask(mut self, mask: u64) -> Self {
        self.completion_core_mask = mask;
        self
    }

    /// Set the number of completion queues
    pub fn with_completion_queues(mut self, queues: u32) -> Self {
        self.completion_queues = queues;
        self
    }

    /// Set device-reserved memory in MB
    pub fn with_reserved_mem_mb(mut self, mb: u32) -> Self {
        self.reserved_mem_mb = mb;
        self
    }

    /// Enable snapshot persistence for the emulated backend
    pub fn with_persistence(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Set the synchronous-path spin budget
    pub fn with_sync_spin_budget(mut self, budget: u64) -> Self {
        self.sync_spin_budget = budget;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new("emu:/dev/kvemul")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = DeviceConfig::new("emu:/dev/kvemul");

        assert_eq!(config.queue_depth, 256);
        assert_eq!(config.completion_queues, 1);
        assert_eq!(config.reserved_mem_mb, 1024);
        assert_eq!(config.sync_mode, false);
        assert_eq!(config.persistent, false);
    }

    #[test]
    fn test_config_validation_success() {
        let config = DeviceConfig::new("emu:/dev/kvemul");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_path() {
        let config = DeviceConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_queue_depth_zero() {
        let config = DeviceConfig::new("emu:/dev/kvemul").with_queue_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_queue_depth_too_large() {
        let config = DeviceConfig::new("emu:/dev/kvemul").with_queue_depth(5000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_completion_queues_zero() {
        let config = DeviceConfig::new("emu:/dev/kvemul").with_completion_queues(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_completion_queues_above_depth() {
        let config = DeviceConfig::new("emu:/dev/kvemul")
            .with_queue_depth(4)
            .with_completion_queues(8);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_spin_budget_zero() {
        let config = DeviceConfig::new("emu:/dev/kvemul").with_sync_spin_budget(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder_pattern() {
        let config = DeviceConfig::new("emu:/tmp/kv.snapshot")
            .with_queue_depth(512)
            .with_completion_queues(4)
            .with_submission_core_mask(0xF)
            .with_completion_core_mask(0xF0)
            .with_reserved_mem_mb(256)
            .with_persistence(true)
            .with_sync_spin_budget(1000);

        assert_eq!(config.queue_depth, 512);
        assert_eq!(config.completion_queues, 4);
        assert_eq!(config.submission_core_mask, 0xF);
        assert_eq!(config.completion_core_mask, 0xF0);
        assert_eq!(config.reserved_mem_mb, 256);
        assert_eq!(config.persistent, true);
        assert_eq!(config.sync_spin_budget, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = DeviceConfig::new("emu:/dev/kvemul").with_queue_depth(64);
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = DeviceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.queue_depth, 64);
        assert_eq!(loaded.device_path, "emu:/dev/kvemul");
    }

    #[test]
    fn test_config_from_file_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = DeviceConfig::new("emu:/dev/kvemul");
        config.queue_depth = 0;
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        assert!(DeviceConfig::from_file(&path).is_err());
    }
}
