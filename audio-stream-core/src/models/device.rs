use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Read-only snapshot of the device a stream runs on.
///
/// Handed to the device-changed callback before the first period. It does
/// not change over a stream's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCharacteristics {
    /// Sample rate of each stream, in Hz.
    pub sample_rate: u32,

    /// Significant bits per sample, excluding padding.
    pub bits_per_sample: u16,

    /// Total bytes per sample, including padding.
    pub bytes_per_sample: u16,

    /// Significant bits in a sample. 24-bit audio left-justified in
    /// 32-bit containers would be `0x00ff_ffff`.
    pub sample_mask: u32,

    /// IEEE float samples when true, two's-complement integers otherwise.
    pub floating_point: bool,

    pub channel_count: u16,

    /// Samples in one frame. Equals `channel_count` for interleaved audio.
    pub samples_per_frame: u16,

    /// Expected frames per process call. Not a guarantee; timing jitter can
    /// present more or fewer frames in a given period.
    pub frames_per_period: u32,
}

impl DeviceCharacteristics {
    /// Bytes in one frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample as usize * self.samples_per_frame as usize
    }

    /// The smallest buffer size in bytes; every stream buffer is a whole
    /// multiple of it.
    pub fn buffer_quantum(&self) -> usize {
        self.frames_per_period as usize * self.bytes_per_frame()
    }

    /// Nominal time between two process calls.
    pub fn period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames_per_period as f64 / self.sample_rate as f64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.bytes_per_sample == 0 {
            return Err("bytes per sample must be positive".into());
        }
        if self.bits_per_sample == 0 || self.bits_per_sample > self.bytes_per_sample * 8 {
            return Err(format!(
                "{} significant bits do not fit in {} bytes per sample",
                self.bits_per_sample, self.bytes_per_sample
            ));
        }
        if self.channel_count == 0 {
            return Err("channel count must be positive".into());
        }
        if self.samples_per_frame == 0 {
            return Err("samples per frame must be positive".into());
        }
        if self.frames_per_period == 0 {
            return Err("frames per period must be positive".into());
        }
        if self.floating_point && ![4, 8].contains(&self.bytes_per_sample) {
            return Err(format!(
                "floating point samples must be 4 or 8 bytes, got {}",
                self.bytes_per_sample
            ));
        }
        Ok(())
    }
}

impl Default for DeviceCharacteristics {
    /// 48 kHz stereo 16-bit, 240 frames (5 ms) per period.
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            bits_per_sample: 16,
            bytes_per_sample: 2,
            sample_mask: 0xffff,
            floating_point: false,
            channel_count: 2,
            samples_per_frame: 2,
            frames_per_period: 240,
        }
    }
}
