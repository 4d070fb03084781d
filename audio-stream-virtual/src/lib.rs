//! # audio-stream-virtual
//!
//! Software backend for audio-stream-core.
//!
//! Provides:
//! - `VirtualBackend`: in-memory recorders and players, driven manually
//!   (`run_periods`) or by per-endpoint clock threads
//! - `CaptureSource`: synthesized recorder input
//! - Failure injection (`fail_next_open`, `fail_enqueue_after`) and
//!   inspection (`played`, `live_endpoints`, `stop_requests`, ...)
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_stream_core::{EngineConfiguration, StreamEngine};
//! use audio_stream_virtual::{DriveMode, VirtualBackend};
//!
//! let backend = VirtualBackend::new(DriveMode::Manual);
//! let engine = StreamEngine::new(EngineConfiguration::default(), Arc::new(backend.clone()))?;
//! // create streams, then:
//! backend.run_periods(100);
//! ```

pub mod capture_source;
pub mod virtual_backend;
pub mod virtual_endpoint;

pub use capture_source::CaptureSource;
pub use virtual_backend::{DriveMode, VirtualBackend};
pub use virtual_endpoint::VirtualEndpoint;
