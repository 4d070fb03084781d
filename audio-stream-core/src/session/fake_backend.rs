//! In-process backend double for the session tests.
//!
//! Periods only happen when a test calls [`FakeBackend::tick`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::buffer::record_ring::RecordSink;
use crate::models::error::{Result, StreamError};
use crate::models::state::CallbackAction;
use crate::traits::audio_backend::{
    AudioBackend, DiscardQueue, Endpoint, EndpointFormat, PeriodCallback, PlaybackQueue,
};

pub(crate) type Events = Arc<Mutex<Vec<String>>>;

struct Port {
    kind: &'static str,
    running: AtomicBool,
    callback: Mutex<Option<PeriodCallback>>,
    sink: Mutex<Option<RecordSink>>,
}

struct VecQueue<'a> {
    played: &'a Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl PlaybackQueue for VecQueue<'_> {
    fn enqueue(&mut self, frames: &[u8]) -> Result<()> {
        if self.fail {
            return Err(StreamError::Io("enqueue rejected".into()));
        }
        self.played.lock().push(frames.to_vec());
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct FakeBackend {
    ports: Arc<Mutex<Vec<Arc<Port>>>>,
    events: Events,
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    capture_byte: u8,
    fail_enqueue: bool,
    fail_open: Arc<AtomicBool>,
    fail_player_resume: Arc<AtomicBool>,
    player_open_delay: Duration,
    stop_requests: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            ports: Arc::default(),
            events: Arc::default(),
            played: Arc::default(),
            capture_byte: 0,
            fail_enqueue: false,
            fail_open: Arc::default(),
            fail_player_resume: Arc::default(),
            player_open_delay: Duration::ZERO,
            stop_requests: Arc::default(),
        }
    }

    /// `open_player` sleeps for `delay` before opening.
    pub fn with_player_open_delay(mut self, delay: Duration) -> Self {
        self.player_open_delay = delay;
        self
    }

    pub fn with_capture_byte(mut self, value: u8) -> Self {
        self.capture_byte = value;
        self
    }

    pub fn failing_enqueue(mut self) -> Self {
        self.fail_enqueue = true;
        self
    }

    pub fn fail_next_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// The next player `resume` fails with `Io`.
    pub fn fail_next_player_resume(&self) {
        self.fail_player_resume.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Events {
        Arc::clone(&self.events)
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().clone()
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn all_running(&self) -> bool {
        let ports = self.ports.lock();
        !ports.is_empty() && ports.iter().all(|p| p.running.load(Ordering::SeqCst))
    }

    pub fn any_running(&self) -> bool {
        self.ports.lock().iter().any(|p| p.running.load(Ordering::SeqCst))
    }

    /// Recorders fill, then players render, `periods` times.
    pub fn tick(&self, periods: usize) {
        for _ in 0..periods {
            self.tick_kind("recorder");
            self.tick_kind("player");
        }
    }

    pub fn tick_players(&self, periods: usize) {
        for _ in 0..periods {
            self.tick_kind("player");
        }
    }

    fn tick_kind(&self, kind: &str) {
        let ports: Vec<_> = self.ports.lock().iter().filter(|p| p.kind == kind).cloned().collect();
        for port in ports {
            if !port.running.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(sink) = port.sink.lock().as_mut() {
                let value = self.capture_byte;
                sink.fill_next(|buf| buf.fill(value));
            }
            let mut callback = port.callback.lock();
            let Some(callback) = callback.as_mut() else {
                continue;
            };
            let action = if port.kind == "player" {
                let mut queue = VecQueue {
                    played: &self.played,
                    fail: self.fail_enqueue,
                };
                callback(&mut queue as &mut dyn PlaybackQueue)
            } else {
                callback(&mut DiscardQueue as &mut dyn PlaybackQueue)
            };
            if action == CallbackAction::Stop {
                self.stop_requests.fetch_add(1, Ordering::SeqCst);
                port.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn open(&self, kind: &'static str, sink: Option<RecordSink>, period: Option<PeriodCallback>) -> Result<Box<dyn Endpoint>> {
        if self.fail_open.swap(false, Ordering::SeqCst) {
            return Err(StreamError::Io(format!("failed to open {}", kind)));
        }
        let port = Arc::new(Port {
            kind,
            running: AtomicBool::new(false),
            callback: Mutex::new(period),
            sink: Mutex::new(sink),
        });
        self.ports.lock().push(Arc::clone(&port));
        Ok(Box::new(FakeEndpoint {
            port,
            events: self.events(),
            ports: Arc::clone(&self.ports),
            fail_resume: (kind == "player").then(|| Arc::clone(&self.fail_player_resume)),
        }))
    }
}

impl AudioBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) {}

    fn open_recorder(
        &self,
        _format: &EndpointFormat,
        sink: RecordSink,
        period: Option<PeriodCallback>,
    ) -> Result<Box<dyn Endpoint>> {
        self.open("recorder", Some(sink), period)
    }

    fn open_player(&self, _format: &EndpointFormat, period: PeriodCallback) -> Result<Box<dyn Endpoint>> {
        if !self.player_open_delay.is_zero() {
            thread::sleep(self.player_open_delay);
        }
        self.open("player", None, Some(period))
    }
}

struct FakeEndpoint {
    port: Arc<Port>,
    events: Events,
    ports: Arc<Mutex<Vec<Arc<Port>>>>,
    fail_resume: Option<Arc<AtomicBool>>,
}

impl Endpoint for FakeEndpoint {
    fn resume(&mut self) -> Result<()> {
        if self.fail_resume.as_ref().is_some_and(|fail| fail.swap(false, Ordering::SeqCst)) {
            return Err(StreamError::Io(format!("failed to resume {}", self.port.kind)));
        }
        self.port.running.store(true, Ordering::SeqCst);
        self.events.lock().push(format!("resume {}", self.port.kind));
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.port.running.store(false, Ordering::SeqCst);
        // Wait out a period in flight.
        drop(self.port.callback.lock());
        self.events.lock().push(format!("pause {}", self.port.kind));
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.port.running.load(Ordering::SeqCst)
    }
}

impl Drop for FakeEndpoint {
    fn drop(&mut self) {
        self.port.callback.lock().take();
        self.ports.lock().retain(|p| !Arc::ptr_eq(p, &self.port));
        self.events.lock().push(format!("release {}", self.port.kind));
    }
}
