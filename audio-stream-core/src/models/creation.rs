use std::fmt;

use super::config::EngineConfiguration;
use super::device::DeviceCharacteristics;
use super::error::{Result, StreamError};
use super::handle::StreamHandle;
use super::state::{StreamDirection, StreamState};

/// Buffers handed to the process callback for one period.
///
/// `output` must be fully written by the callback, silence included.
/// `input` is empty for playback-only streams and when no recorded buffer
/// was ready in time.
pub struct ProcessBuffers<'a> {
    pub input: &'a [u8],
    pub output: &'a mut [u8],
    pub state: &'a mut [u8],
    pub params: &'a [u8],
}

/// Called once on the worker thread, before the first period.
pub type DeviceChangedCallback =
    Box<dyn FnMut(&DeviceCharacteristics, &mut [u8], &[u8]) -> Result<()> + Send + 'static>;

/// Called on the audio thread every period.
///
/// Must not allocate, block, or take locks. An error silences this
/// period's output and counts toward the stream's failure limit.
pub type ProcessCallback =
    Box<dyn FnMut(StreamHandle, ProcessBuffers<'_>) -> Result<()> + Send + 'static>;

/// Called once on the worker thread at teardown, after the endpoints are
/// paused, with the final state block.
pub type CleanupCallback = Box<dyn FnOnce(StreamHandle, &mut [u8]) -> Result<()> + Send + 'static>;

/// Everything needed to create a stream.
///
/// ```ignore
/// let params = StreamCreationParams::new(StreamDirection::Both)
///     .with_state_block_size(64)
///     .with_parameter_block_size(8)
///     .with_process(|_, buffers| {
///         buffers.output.fill(0);
///         Ok(())
///     })
///     .with_initial_state(StreamState::Playing);
/// ```
pub struct StreamCreationParams {
    pub direction: StreamDirection,
    pub device_changed: Option<DeviceChangedCallback>,
    pub process: Option<ProcessCallback>,
    pub cleanup: Option<CleanupCallback>,
    pub state_block_size: usize,
    pub parameter_block_size: usize,
    pub initial_state: StreamState,
}

impl StreamCreationParams {
    pub fn new(direction: StreamDirection) -> Self {
        Self {
            direction,
            device_changed: None,
            process: None,
            cleanup: None,
            state_block_size: 0,
            parameter_block_size: 0,
            initial_state: StreamState::Stopped,
        }
    }

    pub fn with_device_changed<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&DeviceCharacteristics, &mut [u8], &[u8]) -> Result<()> + Send + 'static,
    {
        self.device_changed = Some(Box::new(callback));
        self
    }

    pub fn with_process<F>(mut self, callback: F) -> Self
    where
        F: FnMut(StreamHandle, ProcessBuffers<'_>) -> Result<()> + Send + 'static,
    {
        self.process = Some(Box::new(callback));
        self
    }

    pub fn with_cleanup<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(StreamHandle, &mut [u8]) -> Result<()> + Send + 'static,
    {
        self.cleanup = Some(Box::new(callback));
        self
    }

    pub fn with_state_block_size(mut self, size: usize) -> Self {
        self.state_block_size = size;
        self
    }

    pub fn with_parameter_block_size(mut self, size: usize) -> Self {
        self.parameter_block_size = size;
        self
    }

    pub fn with_initial_state(mut self, state: StreamState) -> Self {
        self.initial_state = state;
        self
    }

    /// Boundary checks run before anything touches the platform.
    pub fn validate(&self, config: &EngineConfiguration) -> Result<()> {
        if self.process.is_none() {
            return Err(StreamError::Null("process callback"));
        }
        if self.state_block_size > config.max_block_size {
            return Err(StreamError::InvalidParameter(format!(
                "state block of {} bytes exceeds the {} byte limit",
                self.state_block_size, config.max_block_size
            )));
        }
        if self.parameter_block_size > config.max_block_size {
            return Err(StreamError::InvalidParameter(format!(
                "parameter block of {} bytes exceeds the {} byte limit",
                self.parameter_block_size, config.max_block_size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for StreamCreationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCreationParams")
            .field("direction", &self.direction)
            .field("device_changed", &self.device_changed.is_some())
            .field("process", &self.process.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("state_block_size", &self.state_block_size)
            .field("parameter_block_size", &self.parameter_block_size)
            .field("initial_state", &self.initial_state)
            .finish()
    }
}
