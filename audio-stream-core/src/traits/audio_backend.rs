use crate::buffer::record_ring::RecordSink;
use crate::models::device::DeviceCharacteristics;
use crate::models::error::Result;
use crate::models::state::{CallbackAction, StreamDirection};

/// Format of one platform endpoint, derived from the engine's device.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointFormat {
    /// `Record` or `Playback`; never `Both`.
    pub direction: StreamDirection,
    pub device: DeviceCharacteristics,
    /// Bytes exchanged with the platform per period.
    pub buffer_quantum: usize,
    /// Rotating record buffers; meaningless for players.
    pub record_buffers: usize,
}

impl EndpointFormat {
    pub fn new(direction: StreamDirection, device: &DeviceCharacteristics, record_buffers: usize) -> Self {
        Self {
            direction,
            device: *device,
            buffer_quantum: device.buffer_quantum(),
            record_buffers,
        }
    }
}

/// Where a period callback hands its rendered output.
pub trait PlaybackQueue {
    fn enqueue(&mut self, frames: &[u8]) -> Result<()>;
}

/// A queue that accepts and drops everything; handed to period callbacks
/// that are driven by a recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardQueue;

impl PlaybackQueue for DiscardQueue {
    fn enqueue(&mut self, _frames: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Invoked by the platform on its audio thread once per period.
pub type PeriodCallback = Box<dyn FnMut(&mut dyn PlaybackQueue) -> CallbackAction + Send + 'static>;

/// An opened platform recorder or player.
///
/// Endpoints are created paused. Dropping one releases the platform object.
pub trait Endpoint: Send {
    /// Start (or keep) invoking the endpoint's callback. Idempotent.
    fn resume(&mut self) -> Result<()>;

    /// Stop invoking the callback. Idempotent.
    ///
    /// Must quiesce: once this returns, the platform is not inside, and will
    /// not enter, the period callback until the next `resume`.
    fn pause(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// Interface for platform audio backends.
///
/// The engine calls every method from its worker thread except
/// `initialize`/`shutdown`, which run on the thread creating or shutting
/// down the engine. Failures are reported as [`StreamError::Io`].
///
/// [`StreamError::Io`]: crate::models::error::StreamError::Io
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    fn initialize(&self) -> Result<()>;

    fn shutdown(&self);

    /// Open a recorder that fills `sink` every period.
    ///
    /// `period` is `Some` when the recorder is the stream's clock: it must
    /// be invoked after each buffer is finished.
    fn open_recorder(
        &self,
        format: &EndpointFormat,
        sink: RecordSink,
        period: Option<PeriodCallback>,
    ) -> Result<Box<dyn Endpoint>>;

    /// Open a player whose period callback renders into its queue.
    fn open_player(&self, format: &EndpointFormat, period: PeriodCallback) -> Result<Box<dyn Endpoint>>;
}
