use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::device::DeviceCharacteristics;
use super::error::StreamError;

/// Configuration for a stream engine.
///
/// Every field has a default, so a JSON document only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// Characteristics of the device every stream of this engine runs on.
    pub device: DeviceCharacteristics,

    /// Deferred lifecycle operations that may be pending at once (default: 32).
    pub work_queue_capacity: usize,

    /// Slots in each stream's parameter channel (default: 3). Must be ≥ 2;
    /// 3 or more keeps reader and writer two slots apart.
    pub parameter_margin: usize,

    /// Rotating record buffers per stream (default: 3): one being filled,
    /// one being read, one absorbing phase skew between the two.
    pub record_buffers: usize,

    /// Consecutive missed parameter pops before a warning is logged (default: 5).
    pub max_parameter_contentions: u32,

    /// Consecutive failed periods before a stream asks the platform to stop
    /// calling it (default: 3).
    pub max_callback_failures: u32,

    /// `try_lock` spins per parameter send before yielding (default: 5).
    pub send_spin_attempts: u32,

    /// Yield-and-retry rounds per parameter send before a timed wait (default: 5).
    pub send_yield_attempts: u32,

    /// How long `create_stream` waits for platform setup (default: 2000 ms).
    pub create_timeout_ms: u64,

    /// Upper bound for state and parameter block sizes (default: 1 MiB).
    pub max_block_size: usize,
}

impl EngineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        self.device.validate()?;
        if self.work_queue_capacity == 0 {
            return Err("work queue capacity must be positive".into());
        }
        if self.parameter_margin < 2 {
            return Err(format!(
                "parameter margin must be at least 2, got {}",
                self.parameter_margin
            ));
        }
        if self.record_buffers < 2 {
            return Err(format!(
                "at least 2 record buffers are required, got {}",
                self.record_buffers
            ));
        }
        if self.max_callback_failures == 0 {
            return Err("max callback failures must be positive".into());
        }
        if self.create_timeout_ms == 0 {
            return Err("create timeout must be positive".into());
        }
        Ok(())
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.create_timeout_ms)
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, StreamError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StreamError::InvalidParameter(format!("failed to parse configuration: {}", e)))?;
        config.validate().map_err(StreamError::InvalidParameter)?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, StreamError> {
        let json = fs::read_to_string(path).map_err(|e| {
            StreamError::Io(format!("failed to read configuration {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            device: DeviceCharacteristics::default(),
            work_queue_capacity: 32,
            parameter_margin: 3,
            record_buffers: 3,
            max_parameter_contentions: 5,
            max_callback_failures: 3,
            send_spin_attempts: 5,
            send_yield_attempts: 5,
            create_timeout_ms: 2000,
            max_block_size: 1 << 20,
        }
    }
}
