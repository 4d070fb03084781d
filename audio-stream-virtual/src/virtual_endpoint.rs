//! Virtual recorder and player endpoints.
//!
//! A period is one call to [`Port::tick`]: a recorder fills its sink from
//! the backend's capture source and, if it clocks the stream, runs the
//! period callback; a player runs the period callback with a queue that
//! stores what was enqueued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use audio_stream_core::buffer::record_ring::RecordSink;
use audio_stream_core::models::error::{Result, StreamError};
use audio_stream_core::models::state::CallbackAction;
use audio_stream_core::traits::audio_backend::{DiscardQueue, Endpoint, PeriodCallback, PlaybackQueue};

use crate::virtual_backend::BackendState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PortKind {
    Recorder,
    Player,
}

impl PortKind {
    fn name(self) -> &'static str {
        match self {
            Self::Recorder => "recorder",
            Self::Player => "player",
        }
    }
}

/// State of one endpoint shared with whoever drives its periods.
pub(crate) struct Port {
    pub(crate) id: usize,
    pub(crate) kind: PortKind,
    running: AtomicBool,
    closed: AtomicBool,
    periods: AtomicU64,
    /// Held for the whole period, so taking it waits out a period in flight.
    callback: Mutex<Option<PeriodCallback>>,
    sink: Mutex<Option<RecordSink>>,
}

impl Port {
    pub(crate) fn new(
        id: usize,
        kind: PortKind,
        sink: Option<RecordSink>,
        callback: Option<PeriodCallback>,
    ) -> Self {
        Self {
            id,
            kind,
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            periods: AtomicU64::new(0),
            callback: Mutex::new(callback),
            sink: Mutex::new(sink),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one period if the endpoint is running.
    pub(crate) fn tick(&self, backend: &BackendState) {
        if !self.is_running() {
            return;
        }
        let mut callback = self.callback.lock();
        // Paused while we waited for the lock.
        if !self.is_running() {
            return;
        }

        if let Some(sink) = self.sink.lock().as_mut() {
            let period = self.periods.fetch_add(1, Ordering::Relaxed);
            let source = backend.capture_source();
            if !sink.fill_next(|buffer| source.fill(period, buffer)) {
                backend.record_overrun();
                log::trace!("virtual recorder {}: overrun in period {}", self.id, period);
            }
        }

        let Some(callback) = callback.as_mut() else {
            return;
        };
        let action = match self.kind {
            PortKind::Player => {
                let mut queue = VirtualQueue { backend };
                callback(&mut queue as &mut dyn PlaybackQueue)
            }
            PortKind::Recorder => callback(&mut DiscardQueue as &mut dyn PlaybackQueue),
        };
        if action == CallbackAction::Stop {
            self.running.store(false, Ordering::Release);
            backend.record_stop_request();
            log::warn!("virtual {} {}: stream asked to stop", self.kind.name(), self.id);
        }
    }
}

/// Playback queue that appends to the backend's record of played periods.
struct VirtualQueue<'a> {
    backend: &'a BackendState,
}

impl PlaybackQueue for VirtualQueue<'_> {
    fn enqueue(&mut self, frames: &[u8]) -> Result<()> {
        self.backend.enqueue(frames)
    }
}

/// An endpoint handed out by the virtual backend.
///
/// In clocked mode it owns a thread that ticks its port every period.
pub struct VirtualEndpoint {
    port: Arc<Port>,
    backend: Arc<BackendState>,
    clock: Option<thread::JoinHandle<()>>,
}

impl VirtualEndpoint {
    pub(crate) fn manual(port: Arc<Port>, backend: Arc<BackendState>) -> Self {
        Self {
            port,
            backend,
            clock: None,
        }
    }

    /// Start a thread that ticks `port` every `period` until the endpoint
    /// is dropped.
    pub(crate) fn clocked(port: Arc<Port>, backend: Arc<BackendState>, period: Duration) -> Result<Self> {
        let clock_port = Arc::clone(&port);
        let clock_backend = Arc::clone(&backend);
        let name = format!("virtual-{}-{}", port.kind.name(), port.id);
        let clock = thread::Builder::new()
            .name(name)
            .spawn(move || clock_loop(&clock_port, &clock_backend, period))
            .map_err(|e| StreamError::Io(format!("failed to spawn clock thread: {}", e)))?;
        Ok(Self {
            port,
            backend,
            clock: Some(clock),
        })
    }
}

impl Endpoint for VirtualEndpoint {
    fn resume(&mut self) -> Result<()> {
        self.port.running.store(true, Ordering::Release);
        log::debug!("virtual {} {} resumed", self.port.kind.name(), self.port.id);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.port.running.store(false, Ordering::Release);
        drop(self.port.callback.lock());
        log::debug!("virtual {} {} paused", self.port.kind.name(), self.port.id);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.port.is_running()
    }
}

impl Drop for VirtualEndpoint {
    fn drop(&mut self) {
        self.port.running.store(false, Ordering::Release);
        self.port.closed.store(true, Ordering::Release);
        if let Some(clock) = self.clock.take() {
            if clock.join().is_err() {
                log::error!("virtual {} {}: clock thread panicked", self.port.kind.name(), self.port.id);
            }
        }
        self.port.callback.lock().take();
        self.port.sink.lock().take();
        self.backend.release(&self.port);
        log::debug!("virtual {} {} released", self.port.kind.name(), self.port.id);
    }
}

fn clock_loop(port: &Port, backend: &BackendState, period: Duration) {
    let mut next = Instant::now() + period;
    while !port.closed.load(Ordering::Acquire) {
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        }
        next += period;
        port.tick(backend);
    }
}
