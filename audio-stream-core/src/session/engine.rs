use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::registry::HandleTable;
use super::stream::Stream;
use crate::models::config::EngineConfiguration;
use crate::models::creation::StreamCreationParams;
use crate::models::device::DeviceCharacteristics;
use crate::models::diagnostics::StreamDiagnostics;
use crate::models::error::{Result, StreamError};
use crate::models::handle::StreamHandle;
use crate::models::state::StreamState;
use crate::sync::work_queue::WorkQueue;
use crate::traits::audio_backend::AudioBackend;

const WORKER_THREAD_NAME: &str = "audio-stream-worker";

/// Owns a backend, a worker thread and every stream created through it.
///
/// ```text
/// control threads ──create/destroy/set_state──▶ [WorkQueue] ──▶ worker ──▶ backend
///        │                                                                    │
///        └──send_parameters──▶ [ParameterChannel] ──pop──▶ audio thread ◀─────┘
/// ```
/// Lifecycle operations run one at a time on the worker. Parameter sends
/// go straight to the stream's channel. There is no process-wide engine;
/// several may coexist, and handles from one are rejected by the others.
pub struct StreamEngine {
    id: Uuid,
    config: EngineConfiguration,
    backend: Arc<dyn AudioBackend>,
    streams: Mutex<HandleTable<Arc<Stream>>>,
    /// `None` once the engine has shut down.
    worker: RwLock<Option<WorkQueue>>,
}

impl StreamEngine {
    /// Validate `config`, initialize `backend` and start the worker thread.
    pub fn new(config: EngineConfiguration, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        config.validate().map_err(StreamError::InvalidParameter)?;
        backend.initialize()?;

        let worker = match WorkQueue::new(WORKER_THREAD_NAME, config.work_queue_capacity) {
            Ok(worker) => worker,
            Err(e) => {
                backend.shutdown();
                return Err(e);
            }
        };

        let id = Uuid::new_v4();
        log::info!(
            "stream engine {} started on backend '{}' ({} Hz, {} frames per period)",
            id,
            backend.name(),
            config.device.sample_rate,
            config.device.frames_per_period
        );
        Ok(Self {
            id,
            streams: Mutex::new(HandleTable::new(id)),
            worker: RwLock::new(Some(worker)),
            config,
            backend,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfiguration {
        &self.config
    }

    pub fn device_characteristics(&self) -> &DeviceCharacteristics {
        &self.config.device
    }

    pub fn is_initialized(&self) -> bool {
        self.worker.read().is_some()
    }

    /// Streams currently registered.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    /// Create a stream and wait for its platform setup.
    ///
    /// A handle is returned only once the endpoints are open and the
    /// device-changed callback has run. A setup failure is returned as is
    /// (usually [`StreamError::Io`]) and leaves no stream behind. If setup
    /// outlasts `create_timeout_ms`, `WouldBlock` is returned and the
    /// worker tears the stream down as soon as its setup completes.
    pub fn create_stream(&self, params: StreamCreationParams) -> Result<StreamHandle> {
        self.ensure_initialized()?;
        params.validate(&self.config)?;
        if self.on_worker_thread() {
            return Err(StreamError::Unknown(
                "create_stream cannot wait for its own worker thread".into(),
            ));
        }

        let initial_state = params.initial_state;
        let stream = {
            let mut streams = self.streams.lock();
            let handle =
                streams.try_insert_with(|handle| Stream::new(handle, params, &self.config).map(Arc::new))?;
            Arc::clone(streams.get(handle)?)
        };
        let handle = stream.handle();

        // Whoever flips this first decides the stream's fate: the worker
        // after setup, or this thread when it stops waiting.
        let settled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel(1);
        let setup = {
            let backend = Arc::clone(&self.backend);
            let device = self.config.device;
            let settled = Arc::clone(&settled);
            move || {
                let result = stream.init(&*backend, &device).and_then(|()| {
                    if initial_state.is_playing() {
                        stream.run()
                    } else {
                        Ok(())
                    }
                });
                if let Err(e) = &result {
                    log::error!("{}: setup failed: {}", stream.handle(), e);
                }
                let abandoned = settled.swap(true, Ordering::AcqRel);
                if abandoned {
                    log::warn!("{}: creator stopped waiting, tearing down", stream.handle());
                }
                if result.is_err() || abandoned {
                    if let Err(e) = stream.destroy() {
                        log::error!("{}: teardown after setup failed: {}", stream.handle(), e);
                    }
                }
                let _ = tx.send(result);
            }
        };

        if let Err(e) = self.submit(setup) {
            let _ = self.streams.lock().remove(handle);
            return Err(e);
        }

        let timeout = self.config.create_timeout();
        let outcome = match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if settled.swap(true, Ordering::AcqRel) {
                    // Setup finished while the wait was timing out.
                    rx.recv()
                        .unwrap_or_else(|_| Err(StreamError::Unknown("setup result lost".into())))
                } else {
                    log::warn!("{}: setup exceeded {:?}", handle, timeout);
                    let _ = self.streams.lock().remove(handle);
                    return Err(StreamError::WouldBlock);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The setup job died mid-way; make sure nothing stays open.
                let removed = self.streams.lock().remove(handle);
                if let Ok(stream) = removed {
                    let _ = self.submit(move || {
                        let _ = stream.destroy();
                    });
                }
                return Err(StreamError::Unknown("setup job ended without a result".into()));
            }
        };

        match outcome {
            Ok(()) => {
                log::debug!("{} created ({:?})", handle, initial_state);
                Ok(handle)
            }
            Err(e) => {
                // Already torn down by the setup job.
                let _ = self.streams.lock().remove(handle);
                Err(e)
            }
        }
    }

    /// Unregister the stream now and tear it down on the worker.
    ///
    /// Teardown order is stop, cleanup callback, release endpoints.
    pub fn destroy_stream(&self, handle: StreamHandle) -> Result<()> {
        self.ensure_initialized()?;
        let mut streams = self.streams.lock();
        let stream = Arc::clone(streams.get(handle)?);
        self.submit(move || {
            if let Err(e) = stream.destroy() {
                log::error!("{}: destroy failed: {}", stream.handle(), e);
            }
        })?;
        streams.remove(handle)?;
        log::debug!("{} scheduled for destruction", handle);
        Ok(())
    }

    /// Queue a transition to `state`. Returns before it takes effect.
    pub fn set_stream_state(&self, handle: StreamHandle, state: StreamState) -> Result<()> {
        let stream = self.stream(handle)?;
        self.submit(move || {
            let result = match state {
                StreamState::Playing => stream.run(),
                StreamState::Stopped => stream.stop(),
            };
            if let Err(e) = result {
                log::error!("{}: failed to switch to {}: {}", stream.handle(), state, e);
            }
        })
    }

    pub fn stream_state(&self, handle: StreamHandle) -> Result<StreamState> {
        Ok(self.stream(handle)?.state())
    }

    /// Hand a parameter block to the stream's audio thread.
    ///
    /// `bytes` may be shorter than the stream's parameter block size (the
    /// rest reads as zeros) but not longer. Returns `WouldBlock` if the
    /// audio thread kept the slot busy for all of `timeout`.
    pub fn send_parameters(&self, handle: StreamHandle, bytes: &[u8], timeout: Duration) -> Result<()> {
        self.stream(handle)?.send_parameters(bytes, timeout)
    }

    pub fn diagnostics(&self, handle: StreamHandle) -> Result<StreamDiagnostics> {
        Ok(self.stream(handle)?.diagnostics())
    }

    /// Wait until every lifecycle operation queued so far has run.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        // The guard is released before waiting so a pending shutdown does
        // not stall readers behind it.
        let ticket = {
            let worker = self.worker.read();
            worker
                .as_ref()
                .ok_or(StreamError::EngineNotInitialized)?
                .flush_ticket()?
        };
        ticket.wait(timeout)
    }

    /// Run every queued operation, destroy the remaining streams and shut
    /// the backend down. Every later call fails with `EngineNotInitialized`.
    pub fn shutdown(&self) -> Result<()> {
        let Some(worker) = self.worker.write().take() else {
            return Err(StreamError::EngineNotInitialized);
        };
        // Dropping the queue runs what is pending and joins the worker.
        drop(worker);

        let streams = self.streams.lock().drain();
        for (handle, stream) in streams {
            if let Err(e) = stream.destroy() {
                log::error!("{}: destroy during shutdown failed: {}", handle, e);
            }
        }
        self.backend.shutdown();
        log::info!("stream engine {} shut down", self.id);
        Ok(())
    }

    fn stream(&self, handle: StreamHandle) -> Result<Arc<Stream>> {
        self.ensure_initialized()?;
        self.streams.lock().get(handle).map(Arc::clone)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(StreamError::EngineNotInitialized)
        }
    }

    fn on_worker_thread(&self) -> bool {
        self.worker
            .read()
            .as_ref()
            .is_some_and(|worker| worker.is_worker_thread())
    }

    fn submit<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = self.worker.read();
        let worker = worker.as_ref().ok_or(StreamError::EngineNotInitialized)?;
        if worker.push_work(work) {
            Ok(())
        } else {
            log::warn!("work queue full ({} pending)", worker.capacity());
            Err(StreamError::WouldBlock)
        }
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(e) = self.shutdown() {
                log::error!("stream engine {} failed to shut down: {}", self.id, e);
            }
        }
    }
}
