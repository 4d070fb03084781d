use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during stream and engine operations.
///
/// Validation errors (`InvalidParameter`, `Null`, `InvalidObject`) are
/// raised at the API boundary and never reach the audio thread.
/// `WouldBlock` is always recoverable by retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("missing required value: {0}")]
    Null(&'static str),

    #[error("invalid or stale object handle")]
    InvalidObject,

    #[error("engine not initialized")]
    EngineNotInitialized,

    #[error("platform i/o error: {0}")]
    Io(String),

    #[error("operation would block, try again")]
    WouldBlock,

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl StreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Null(_) => ErrorKind::Null,
            Self::InvalidObject => ErrorKind::InvalidObject,
            Self::EngineNotInitialized => ErrorKind::EngineNotInitialized,
            Self::Io(_) => ErrorKind::Io,
            Self::WouldBlock => ErrorKind::WouldBlock,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the caller may simply try the same operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

/// Payload-free mirror of [`StreamError`].
///
/// Small enough to live in an atomic, which is how the audio thread
/// publishes its last error without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorKind {
    InvalidParameter = 1,
    Null = 2,
    InvalidObject = 3,
    EngineNotInitialized = 4,
    Io = 5,
    WouldBlock = 6,
    Unknown = 7,
}

impl ErrorKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a value produced by [`ErrorKind::as_u8`]; `0` means "no error".
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::InvalidParameter),
            2 => Some(Self::Null),
            3 => Some(Self::InvalidObject),
            4 => Some(Self::EngineNotInitialized),
            5 => Some(Self::Io),
            6 => Some(Self::WouldBlock),
            7 => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidParameter => "invalid parameter",
            Self::Null => "null",
            Self::InvalidObject => "invalid object",
            Self::EngineNotInitialized => "engine not initialized",
            Self::Io => "i/o",
            Self::WouldBlock => "would block",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
