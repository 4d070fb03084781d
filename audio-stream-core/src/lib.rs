//! # audio-stream-core
//!
//! Platform-agnostic core for low-latency audio streams.
//!
//! A [`StreamEngine`] owns a worker thread that serializes every stream
//! lifecycle operation and an [`AudioBackend`] that opens the platform's
//! recorders and players. Each stream runs a user process callback once
//! per audio period on the platform's audio thread; control threads feed
//! it fixed-size parameter blocks through a lock-free-for-the-reader
//! [`ParameterChannel`].
//!
//! ## Architecture
//!
//! ```text
//! audio-stream-core (this crate)
//! ├── traits/    ← AudioBackend, Endpoint, PlaybackQueue
//! ├── models/    ← StreamError, StreamState, DeviceCharacteristics, EngineConfiguration, etc.
//! ├── buffer/    ← FixedBuffer, RecordRing
//! ├── sync/      ← ParameterChannel, Semaphore, WorkQueue
//! └── session/   ← StreamEngine, streams and their handle registry
//! ```

pub mod buffer;
pub mod models;
pub mod session;
pub mod sync;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use buffer::fixed_buffer::FixedBuffer;
pub use buffer::record_ring::{record_ring, RecordReader, RecordSink};
pub use models::config::EngineConfiguration;
pub use models::creation::{
    CleanupCallback, DeviceChangedCallback, ProcessBuffers, ProcessCallback, StreamCreationParams,
};
pub use models::device::DeviceCharacteristics;
pub use models::diagnostics::StreamDiagnostics;
pub use models::error::{ErrorKind, Result, StreamError};
pub use models::handle::StreamHandle;
pub use models::state::{CallbackAction, StreamDirection, StreamState};
pub use session::engine::StreamEngine;
pub use sync::parameter_channel::{ParameterChannel, ParameterWriter};
pub use sync::work_queue::{FlushTicket, WorkQueue};
pub use traits::audio_backend::{
    AudioBackend, DiscardQueue, Endpoint, EndpointFormat, PeriodCallback, PlaybackQueue,
};
