use std::fmt;

use serde::{Deserialize, Serialize};

/// Stream state machine.
///
/// State transitions:
/// ```text
/// stopped ──run()──▶ playing
///    ▲                  │
///    └──────stop()──────┘
/// ```
/// Both transitions are idempotent. `destroy()` is legal from either state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum StreamState {
    #[default]
    Stopped = 0,
    Playing = 1,
}

impl StreamState {
    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        if value == Self::Playing as u8 {
            Self::Playing
        } else {
            Self::Stopped
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Playing => f.write_str("playing"),
        }
    }
}

/// Which buffers a stream presents for processing.
///
/// `Record` makes the input view valid, `Playback` the output view,
/// `Both` both of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamDirection {
    Record,
    Playback,
    Both,
}

impl StreamDirection {
    pub fn has_record(&self) -> bool {
        matches!(self, Self::Record | Self::Both)
    }

    pub fn has_playback(&self) -> bool {
        matches!(self, Self::Playback | Self::Both)
    }
}

/// What the platform should do after a period callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// The stream has given up; stop invoking it.
    Stop,
}
