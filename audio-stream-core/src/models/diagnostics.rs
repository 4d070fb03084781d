use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{ErrorKind, StreamError};
use super::state::{StreamDirection, StreamState};

/// Diagnostics snapshot for one stream.
///
/// Counters are read with relaxed loads from the live stream, so a snapshot
/// taken while playing may be a period behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamDiagnostics {
    pub direction: StreamDirection,
    pub state: StreamState,
    pub created_at: DateTime<Utc>,
    pub periods_processed: u64,
    /// Consecutive parameter pops that lost a race with a writer.
    pub missed_parameter_updates: u32,
    pub total_missed_parameter_updates: u32,
    /// Periods where no recorded buffer was ready.
    pub record_glitches: u64,
    /// Periods dropped because the processor was held by a lifecycle operation.
    pub skipped_periods: u64,
    pub callback_failures: u64,
    pub consecutive_callback_failures: u32,
    pub last_playback_error: Option<ErrorKind>,
    pub last_record_error: Option<ErrorKind>,
    /// The stream gave up and asked the platform to stop calling it.
    pub halted: bool,
}

impl StreamDiagnostics {
    pub fn to_json(&self) -> Result<String, StreamError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StreamError::Unknown(format!("failed to serialize diagnostics: {}", e)))
    }
}
