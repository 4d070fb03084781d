use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::buffer::fixed_buffer::FixedBuffer;
use crate::buffer::record_ring::{record_ring, RecordReader, RecordSink};
use crate::models::config::EngineConfiguration;
use crate::models::creation::{
    CleanupCallback, DeviceChangedCallback, ProcessBuffers, ProcessCallback, StreamCreationParams,
};
use crate::models::device::DeviceCharacteristics;
use crate::models::diagnostics::StreamDiagnostics;
use crate::models::error::{ErrorKind, Result, StreamError};
use crate::models::handle::StreamHandle;
use crate::models::state::{CallbackAction, StreamDirection, StreamState};
use crate::sync::parameter_channel::{ParameterChannel, ParameterWriter};
use crate::traits::audio_backend::{AudioBackend, Endpoint, EndpointFormat, PeriodCallback, PlaybackQueue};

/// State and counters shared between the audio thread and everyone else.
#[derive(Default)]
struct StreamShared {
    state: AtomicU8,
    periods_processed: AtomicU64,
    missed_parameter_updates: AtomicU32,
    total_missed_parameter_updates: AtomicU32,
    record_glitches: AtomicU64,
    skipped_periods: AtomicU64,
    callback_failures: AtomicU64,
    consecutive_callback_failures: AtomicU32,
    last_playback_error: AtomicU8,
    last_record_error: AtomicU8,
    halted: AtomicBool,
}

/// Everything the audio thread touches while processing a period.
///
/// Lives behind a mutex the audio thread only `try_lock`s. The worker
/// locks it for the device-changed and cleanup calls, which happen while
/// the endpoints are paused.
struct Processor {
    handle: StreamHandle,
    direction: StreamDirection,
    record: Option<RecordReader>,
    output: FixedBuffer,
    state: FixedBuffer,
    params: ParameterChannel,
    process: ProcessCallback,
    device_changed: Option<DeviceChangedCallback>,
    cleanup: Option<CleanupCallback>,
    max_contentions: u32,
    max_failures: u32,
    shared: Arc<StreamShared>,
}

impl Processor {
    /// Hand every free record buffer to the platform.
    fn prime(&mut self) {
        if let Some(reader) = self.record.as_mut() {
            reader.submit_free();
        }
    }

    fn notify_device_changed(&mut self, device: &DeviceCharacteristics) -> Result<()> {
        let Some(callback) = self.device_changed.as_mut() else {
            return Ok(());
        };
        callback(device, self.state.as_mut_slice(), self.params.top())
    }

    fn cleanup(&mut self) -> Result<()> {
        match self.cleanup.take() {
            Some(callback) => callback(self.handle, self.state.as_mut_slice()),
            None => Ok(()),
        }
    }

    /// One audio period. Never blocks and never allocates.
    fn period(&mut self, queue: &mut dyn PlaybackQueue) -> CallbackAction {
        let shared = &*self.shared;

        let input: &[u8] = match self.record.as_mut() {
            Some(reader) => match reader.acquire() {
                Some(buffer) => buffer,
                None => {
                    let glitches = shared.record_glitches.fetch_add(1, Ordering::Relaxed) + 1;
                    if glitches.is_power_of_two() {
                        log::warn!("{}: glitch, missed a record buffer ({} so far)", self.handle, glitches);
                    }
                    &[]
                }
            },
            None => &[],
        };

        if self.params.pop() {
            shared.missed_parameter_updates.store(0, Ordering::Relaxed);
        } else {
            let missed = shared
                .missed_parameter_updates
                .load(Ordering::Relaxed)
                .saturating_add(1);
            shared.missed_parameter_updates.store(missed, Ordering::Relaxed);
            let total = shared
                .total_missed_parameter_updates
                .load(Ordering::Relaxed)
                .saturating_add(1);
            shared.total_missed_parameter_updates.store(total, Ordering::Relaxed);
            if missed == self.max_contentions.saturating_add(1) {
                log::warn!(
                    "{}: missed {} parameter updates in a row; parameters are being sent too often",
                    self.handle,
                    missed
                );
            }
        }

        let processed = (self.process)(
            self.handle,
            ProcessBuffers {
                input,
                output: self.output.as_mut_slice(),
                state: self.state.as_mut_slice(),
                params: self.params.top(),
            },
        );

        let mut failure = None;
        if let Err(e) = processed {
            self.output.clear(0);
            failure = Some(e.kind());
        }

        if let Some(reader) = self.record.as_mut() {
            reader.release();
        }

        let clock_error = if self.direction.has_playback() {
            &shared.last_playback_error
        } else {
            &shared.last_record_error
        };
        if let Some(kind) = failure {
            clock_error.store(kind.as_u8(), Ordering::Relaxed);
        }
        if self.direction.has_playback() {
            if let Err(e) = queue.enqueue(self.output.as_slice()) {
                shared.last_playback_error.store(e.kind().as_u8(), Ordering::Relaxed);
                failure = Some(e.kind());
            }
        }

        shared.periods_processed.fetch_add(1, Ordering::Relaxed);
        if failure.is_none() {
            shared.consecutive_callback_failures.store(0, Ordering::Relaxed);
            return CallbackAction::Continue;
        }

        shared.callback_failures.fetch_add(1, Ordering::Relaxed);
        let consecutive = shared
            .consecutive_callback_failures
            .load(Ordering::Relaxed)
            .saturating_add(1);
        shared
            .consecutive_callback_failures
            .store(consecutive, Ordering::Relaxed);
        if consecutive < self.max_failures {
            return CallbackAction::Continue;
        }

        if !shared.halted.swap(true, Ordering::Relaxed) {
            log::error!(
                "{}: {} consecutive failed periods, asking the platform to stop",
                self.handle,
                consecutive
            );
        }
        CallbackAction::Stop
    }
}

#[derive(Default)]
struct Endpoints {
    recorder: Option<Box<dyn Endpoint>>,
    player: Option<Box<dyn Endpoint>>,
}

fn resume(endpoint: &mut Option<Box<dyn Endpoint>>) -> Result<()> {
    endpoint.as_mut().map_or(Ok(()), |endpoint| endpoint.resume())
}

/// A stream: the audio-thread processor plus its platform endpoints.
///
/// `init`, `run`, `stop` and `destroy` are only called from the engine's
/// worker thread. `send_parameters`, `state` and `diagnostics` may be
/// called from any thread.
pub(crate) struct Stream {
    handle: StreamHandle,
    direction: StreamDirection,
    created_at: DateTime<Utc>,
    record_buffers: usize,
    writer: ParameterWriter,
    shared: Arc<StreamShared>,
    processor: Arc<Mutex<Processor>>,
    sink: Mutex<Option<RecordSink>>,
    endpoints: Mutex<Endpoints>,
}

impl Stream {
    pub fn new(
        handle: StreamHandle,
        params: StreamCreationParams,
        config: &EngineConfiguration,
    ) -> Result<Self> {
        let process = params.process.ok_or(StreamError::Null("process callback"))?;
        let direction = params.direction;
        let quantum = config.device.buffer_quantum();

        let (sink, record) = if direction.has_record() {
            let (sink, reader) = record_ring(config.record_buffers, quantum);
            (Some(sink), Some(reader))
        } else {
            (None, None)
        };
        let output = if direction.has_playback() {
            FixedBuffer::new(quantum)
        } else {
            FixedBuffer::default()
        };

        let params_channel = ParameterChannel::new(params.parameter_block_size, config.parameter_margin);
        let writer = params_channel
            .writer()
            .with_retry_budget(config.send_spin_attempts, config.send_yield_attempts);

        let shared = Arc::new(StreamShared::default());
        let processor = Processor {
            handle,
            direction,
            record,
            output,
            state: FixedBuffer::new(params.state_block_size),
            params: params_channel,
            process,
            device_changed: params.device_changed,
            cleanup: params.cleanup,
            max_contentions: config.max_parameter_contentions,
            max_failures: config.max_callback_failures,
            shared: Arc::clone(&shared),
        };

        Ok(Self {
            handle,
            direction,
            created_at: Utc::now(),
            record_buffers: config.record_buffers,
            writer,
            shared,
            processor: Arc::new(Mutex::new(processor)),
            sink: Mutex::new(sink),
            endpoints: Mutex::new(Endpoints::default()),
        })
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    /// The callback the clocking endpoint invokes each period.
    fn period_callback(&self) -> PeriodCallback {
        let processor = Arc::clone(&self.processor);
        let shared = Arc::clone(&self.shared);
        Box::new(move |queue: &mut dyn PlaybackQueue| match processor.try_lock() {
            Some(mut processor) => processor.period(queue),
            None => {
                shared.skipped_periods.fetch_add(1, Ordering::Relaxed);
                CallbackAction::Continue
            }
        })
    }

    /// Open the platform endpoints (paused) and deliver the device
    /// characteristics. Streams with a playback direction are clocked by
    /// the player, record-only streams by the recorder.
    pub fn init(&self, backend: &dyn AudioBackend, device: &DeviceCharacteristics) -> Result<()> {
        if self.direction.has_record() {
            let sink = self
                .sink
                .lock()
                .take()
                .ok_or_else(|| StreamError::Unknown(format!("{} already initialized", self.handle)))?;
            let clock = if self.direction.has_playback() {
                None
            } else {
                Some(self.period_callback())
            };
            let format = EndpointFormat::new(StreamDirection::Record, device, self.record_buffers);
            let recorder = backend.open_recorder(&format, sink, clock)?;
            self.endpoints.lock().recorder = Some(recorder);
        }

        if self.direction.has_playback() {
            let format = EndpointFormat::new(StreamDirection::Playback, device, self.record_buffers);
            let player = backend.open_player(&format, self.period_callback())?;
            self.endpoints.lock().player = Some(player);
        }

        let mut processor = self.processor.lock();
        processor.prime();
        processor.notify_device_changed(device)?;
        log::debug!("{} initialized on backend '{}'", self.handle, backend.name());
        Ok(())
    }

    /// Stopped → playing. Reapplies the resume if already playing.
    ///
    /// If either endpoint fails to resume, both are paused again and the
    /// stream is left stopped.
    pub fn run(&self) -> Result<()> {
        let mut guard = self.endpoints.lock();
        let endpoints = &mut *guard;
        self.shared.halted.store(false, Ordering::Relaxed);
        self.shared
            .consecutive_callback_failures
            .store(0, Ordering::Relaxed);

        let resumed = resume(&mut endpoints.recorder).and_then(|()| resume(&mut endpoints.player));
        if let Err(e) = resumed {
            for endpoint in [&mut endpoints.player, &mut endpoints.recorder]
                .into_iter()
                .flatten()
            {
                if let Err(pause_err) = endpoint.pause() {
                    log::error!("{}: failed to pause after a failed resume: {}", self.handle, pause_err);
                }
            }
            self.shared
                .state
                .store(StreamState::Stopped.as_u8(), Ordering::Release);
            log::error!("{}: failed to start: {}", self.handle, e);
            return Err(e);
        }

        self.shared
            .state
            .store(StreamState::Playing.as_u8(), Ordering::Release);
        log::debug!("{} playing", self.handle);
        Ok(())
    }

    /// Pause both endpoints. Idempotent.
    pub fn stop(&self) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        let player = endpoints
            .player
            .as_mut()
            .map_or(Ok(()), |player| player.pause());
        let recorder = endpoints
            .recorder
            .as_mut()
            .map_or(Ok(()), |recorder| recorder.pause());
        self.shared
            .state
            .store(StreamState::Stopped.as_u8(), Ordering::Release);
        log::debug!("{} stopped", self.handle);
        player.and(recorder)
    }

    /// Stop, run the cleanup callback, then release the endpoints.
    pub fn destroy(&self) -> Result<()> {
        let stopped = self.stop();
        if let Err(e) = &stopped {
            log::error!("{}: failed to stop before destroy: {}", self.handle, e);
        }

        let cleaned = self.processor.lock().cleanup();
        if let Err(e) = &cleaned {
            log::error!("{}: cleanup callback failed: {}", self.handle, e);
        }

        let endpoints = std::mem::take(&mut *self.endpoints.lock());
        drop(endpoints);
        self.sink.lock().take();
        log::debug!("{} destroyed", self.handle);
        stopped.and(cleaned)
    }

    pub fn send_parameters(&self, bytes: &[u8], timeout: Duration) -> Result<()> {
        let element_size = self.writer.element_size();
        if bytes.len() > element_size {
            return Err(StreamError::InvalidParameter(format!(
                "parameter block of {} bytes is larger than the stream's {} bytes",
                bytes.len(),
                element_size
            )));
        }
        self.writer
            .push_timeout(bytes, timeout)
            .map(|_| ())
            .ok_or(StreamError::WouldBlock)
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        let shared = &*self.shared;
        StreamDiagnostics {
            direction: self.direction,
            state: self.state(),
            created_at: self.created_at,
            periods_processed: shared.periods_processed.load(Ordering::Relaxed),
            missed_parameter_updates: shared.missed_parameter_updates.load(Ordering::Relaxed),
            total_missed_parameter_updates: shared
                .total_missed_parameter_updates
                .load(Ordering::Relaxed),
            record_glitches: shared.record_glitches.load(Ordering::Relaxed),
            skipped_periods: shared.skipped_periods.load(Ordering::Relaxed),
            callback_failures: shared.callback_failures.load(Ordering::Relaxed),
            consecutive_callback_failures: shared
                .consecutive_callback_failures
                .load(Ordering::Relaxed),
            last_playback_error: ErrorKind::from_u8(shared.last_playback_error.load(Ordering::Relaxed)),
            last_record_error: ErrorKind::from_u8(shared.last_record_error.load(Ordering::Relaxed)),
            halted: shared.halted.load(Ordering::Relaxed),
        }
    }
}
