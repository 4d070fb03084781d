//! Software audio backend.
//!
//! Opens recorders and players that exist only in memory. Periods are
//! either driven explicitly with [`VirtualBackend::run_periods`] or by one
//! clock thread per endpoint ticking at the device's period.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use audio_stream_core::buffer::record_ring::RecordSink;
use audio_stream_core::models::error::{Result, StreamError};
use audio_stream_core::traits::audio_backend::{AudioBackend, Endpoint, EndpointFormat, PeriodCallback};

use crate::capture_source::CaptureSource;
use crate::virtual_endpoint::{Port, PortKind, VirtualEndpoint};

/// Enqueue budget meaning "never fail".
const UNLIMITED: usize = usize::MAX;

/// How periods are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Only [`VirtualBackend::run_periods`] produces periods.
    Manual,
    /// Each endpoint ticks on its own thread every device period.
    Clocked,
}

/// State shared by the backend handle and every endpoint it opened.
pub(crate) struct BackendState {
    mode: DriveMode,
    initialized: AtomicBool,
    capture: Mutex<CaptureSource>,
    ports: Mutex<Vec<Arc<Port>>>,
    opened: AtomicUsize,
    played: Mutex<Vec<Vec<u8>>>,
    fail_next_open: AtomicBool,
    enqueue_budget: AtomicUsize,
    overruns: AtomicU64,
    stop_requests: AtomicUsize,
}

impl BackendState {
    pub(crate) fn capture_source(&self) -> CaptureSource {
        *self.capture.lock()
    }

    pub(crate) fn enqueue(&self, frames: &[u8]) -> Result<()> {
        let taken = self
            .enqueue_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |budget| match budget {
                0 => None,
                UNLIMITED => Some(UNLIMITED),
                n => Some(n - 1),
            });
        if taken.is_err() {
            return Err(StreamError::Io("virtual playback queue rejected the buffer".into()));
        }
        self.played.lock().push(frames.to_vec());
        Ok(())
    }

    pub(crate) fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stop_request(&self) {
        self.stop_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release(&self, port: &Arc<Port>) {
        self.ports.lock().retain(|p| !Arc::ptr_eq(p, port));
    }

    fn ports_of(&self, kind: PortKind) -> Vec<Arc<Port>> {
        self.ports
            .lock()
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect()
    }
}

/// In-memory [`AudioBackend`]. Cloning yields another handle to the same
/// backend, so a test can keep one while the engine owns the other.
#[derive(Clone)]
pub struct VirtualBackend {
    state: Arc<BackendState>,
}

impl VirtualBackend {
    pub fn new(mode: DriveMode) -> Self {
        Self {
            state: Arc::new(BackendState {
                mode,
                initialized: AtomicBool::new(false),
                capture: Mutex::new(CaptureSource::default()),
                ports: Mutex::new(Vec::new()),
                opened: AtomicUsize::new(0),
                played: Mutex::new(Vec::new()),
                fail_next_open: AtomicBool::new(false),
                enqueue_budget: AtomicUsize::new(UNLIMITED),
                overruns: AtomicU64::new(0),
                stop_requests: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_capture_source(self, source: CaptureSource) -> Self {
        self.set_capture_source(source);
        self
    }

    pub fn mode(&self) -> DriveMode {
        self.state.mode
    }

    pub fn set_capture_source(&self, source: CaptureSource) {
        *self.state.capture.lock() = source;
    }

    /// Run `periods` periods: every running recorder first, then every
    /// running player.
    pub fn run_periods(&self, periods: usize) {
        if self.state.mode == DriveMode::Clocked {
            log::warn!("run_periods on a clocked virtual backend; clock threads keep ticking too");
        }
        for _ in 0..periods {
            for port in self.state.ports_of(PortKind::Recorder) {
                port.tick(&self.state);
            }
            for port in self.state.ports_of(PortKind::Player) {
                port.tick(&self.state);
            }
        }
    }

    /// The next `open_recorder`/`open_player` fails with `Io`.
    pub fn fail_next_open(&self) {
        self.state.fail_next_open.store(true, Ordering::Release);
    }

    /// Accept `n` more enqueues, then reject every one with `Io`.
    pub fn fail_enqueue_after(&self, n: usize) {
        self.state.enqueue_budget.store(n, Ordering::Release);
    }

    pub fn clear_failures(&self) {
        self.state.fail_next_open.store(false, Ordering::Release);
        self.state.enqueue_budget.store(UNLIMITED, Ordering::Release);
    }

    /// Every buffer enqueued by players so far, oldest first.
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.state.played.lock().clone()
    }

    /// Like [`VirtualBackend::played`], but clears the record.
    pub fn take_played(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.state.played.lock())
    }

    /// Endpoints opened since the backend was created.
    pub fn endpoint_count(&self) -> usize {
        self.state.opened.load(Ordering::Relaxed)
    }

    /// Endpoints opened and not yet released.
    pub fn live_endpoints(&self) -> usize {
        self.state.ports.lock().len()
    }

    pub fn running_endpoints(&self) -> usize {
        self.state.ports.lock().iter().filter(|p| p.is_running()).count()
    }

    /// Recorder periods where the stream had no buffer submitted.
    pub fn recorder_overruns(&self) -> u64 {
        self.state.overruns.load(Ordering::Relaxed)
    }

    /// Period callbacks that returned `CallbackAction::Stop`.
    pub fn stop_requests(&self) -> usize {
        self.state.stop_requests.load(Ordering::Relaxed)
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized.load(Ordering::Acquire)
    }

    fn open(
        &self,
        kind: PortKind,
        format: &EndpointFormat,
        sink: Option<RecordSink>,
        callback: Option<PeriodCallback>,
    ) -> Result<Box<dyn Endpoint>> {
        if !self.is_initialized() {
            return Err(StreamError::Io("virtual backend is not initialized".into()));
        }
        if self.state.fail_next_open.swap(false, Ordering::AcqRel) {
            return Err(StreamError::Io(format!("injected failure opening {:?}", kind)));
        }
        if format.buffer_quantum == 0 {
            return Err(StreamError::Io("endpoint format has an empty buffer quantum".into()));
        }
        if let Some(sink) = &sink {
            if sink.quantum() != format.buffer_quantum {
                return Err(StreamError::Io(format!(
                    "record buffers of {} bytes do not match the {} byte quantum",
                    sink.quantum(),
                    format.buffer_quantum
                )));
            }
        }

        let id = self.state.opened.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(Port::new(id, kind, sink, callback));
        self.state.ports.lock().push(Arc::clone(&port));

        let endpoint = match self.state.mode {
            DriveMode::Manual => VirtualEndpoint::manual(port, Arc::clone(&self.state)),
            DriveMode::Clocked => {
                match VirtualEndpoint::clocked(Arc::clone(&port), Arc::clone(&self.state), format.device.period()) {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        self.state.release(&port);
                        return Err(e);
                    }
                }
            }
        };
        log::debug!(
            "virtual {:?} {} opened ({} bytes per period)",
            kind,
            id,
            format.buffer_quantum
        );
        Ok(Box::new(endpoint))
    }
}

impl AudioBackend for VirtualBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    fn initialize(&self) -> Result<()> {
        self.state.initialized.store(true, Ordering::Release);
        log::info!("virtual backend initialized ({:?})", self.state.mode);
        Ok(())
    }

    fn shutdown(&self) {
        self.state.initialized.store(false, Ordering::Release);
        log::info!("virtual backend shut down, {} endpoints still open", self.live_endpoints());
    }

    fn open_recorder(
        &self,
        format: &EndpointFormat,
        sink: RecordSink,
        period: Option<PeriodCallback>,
    ) -> Result<Box<dyn Endpoint>> {
        self.open(PortKind::Recorder, format, Some(sink), period)
    }

    fn open_player(&self, format: &EndpointFormat, period: PeriodCallback) -> Result<Box<dyn Endpoint>> {
        self.open(PortKind::Player, format, None, Some(period))
    }
}
