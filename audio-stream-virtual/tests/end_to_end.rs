use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use audio_stream_core::{
    EngineConfiguration, ErrorKind, StreamCreationParams, StreamDirection, StreamEngine, StreamError,
    StreamHandle, StreamState,
};
use audio_stream_virtual::{CaptureSource, DriveMode, VirtualBackend};

const FLUSH: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 16 frames of 16-bit stereo: 64-byte periods.
fn config() -> EngineConfiguration {
    let mut config = EngineConfiguration::default();
    config.device.frames_per_period = 16;
    config
}

fn engine(backend: &VirtualBackend) -> StreamEngine {
    StreamEngine::new(config(), Arc::new(backend.clone())).unwrap()
}

fn copy_through(direction: StreamDirection) -> StreamCreationParams {
    StreamCreationParams::new(direction).with_process(|_, buffers| {
        let n = buffers.input.len().min(buffers.output.len());
        buffers.output[..n].copy_from_slice(&buffers.input[..n]);
        buffers.output[n..].fill(0);
        Ok(())
    })
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn hundred_periods_copy_input_to_output() {
    init_logging();
    let backend = VirtualBackend::new(DriveMode::Manual).with_capture_source(CaptureSource::Counter);
    let engine = engine(&backend);
    let handle = engine
        .create_stream(copy_through(StreamDirection::Both).with_initial_state(StreamState::Playing))
        .unwrap();

    backend.run_periods(100);

    let played = backend.played();
    assert_eq!(played.len(), 100);
    let quantum = engine.device_characteristics().buffer_quantum();
    for (period, buffer) in played.iter().enumerate() {
        let mut expected = vec![0u8; quantum];
        CaptureSource::Counter.fill(period as u64, &mut expected);
        assert_eq!(buffer, &expected, "period {}", period);
    }

    let diag = engine.diagnostics(handle).unwrap();
    assert_eq!(diag.periods_processed, 100);
    assert_eq!(diag.missed_parameter_updates, 0);
    assert_eq!(diag.total_missed_parameter_updates, 0);
    assert_eq!(diag.record_glitches, 0);
    assert_eq!(diag.callback_failures, 0);
    assert_eq!(backend.recorder_overruns(), 0);
}

#[test]
fn run_and_stop_twice_match_once() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    let handle = engine.create_stream(copy_through(StreamDirection::Both)).unwrap();
    assert_eq!(backend.running_endpoints(), 0);

    engine.set_stream_state(handle, StreamState::Playing).unwrap();
    engine.set_stream_state(handle, StreamState::Playing).unwrap();
    engine.flush(FLUSH).unwrap();
    assert_eq!(engine.stream_state(handle), Ok(StreamState::Playing));
    assert_eq!(backend.running_endpoints(), 2);

    engine.set_stream_state(handle, StreamState::Stopped).unwrap();
    engine.set_stream_state(handle, StreamState::Stopped).unwrap();
    engine.flush(FLUSH).unwrap();
    assert_eq!(engine.stream_state(handle), Ok(StreamState::Stopped));
    assert_eq!(backend.running_endpoints(), 0);

    backend.run_periods(5);
    assert!(backend.played().is_empty());
}

#[test]
fn failed_setup_returns_io_and_leaves_nothing_open() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    backend.fail_next_open();

    let result = engine.create_stream(copy_through(StreamDirection::Both));
    assert!(matches!(result, Err(StreamError::Io(_))));
    assert_eq!(engine.stream_count(), 0);
    assert_eq!(backend.live_endpoints(), 0);

    // The next attempt is unaffected.
    assert!(engine.create_stream(copy_through(StreamDirection::Both)).is_ok());
    assert_eq!(backend.live_endpoints(), 2);
}

#[test]
fn destroy_runs_cleanup_between_stop_and_release() {
    init_logging();
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    let observed = Arc::new(Mutex::new(None));

    let observer = backend.clone();
    let sink = Arc::clone(&observed);
    let params = copy_through(StreamDirection::Both)
        .with_state_block_size(8)
        .with_device_changed(|_, state, _| {
            state.copy_from_slice(b"prepared");
            Ok(())
        })
        .with_cleanup(move |_, state| {
            *sink.lock() = Some((state.to_vec(), observer.running_endpoints(), observer.live_endpoints()));
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();
    backend.run_periods(3);

    engine.destroy_stream(handle).unwrap();
    assert_eq!(engine.stream_state(handle), Err(StreamError::InvalidObject));
    engine.flush(FLUSH).unwrap();

    // Paused but not yet released when cleanup ran.
    assert_eq!(*observed.lock(), Some((b"prepared".to_vec(), 0, 2)));
    assert_eq!(backend.live_endpoints(), 0);
}

#[test]
fn enqueue_failures_stop_the_stream() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    let params = StreamCreationParams::new(StreamDirection::Playback)
        .with_process(|_, buffers| {
            buffers.output.fill(0x7f);
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();

    backend.fail_enqueue_after(2);
    backend.run_periods(10);

    assert_eq!(backend.played().len(), 2);
    assert_eq!(backend.stop_requests(), 1);
    let diag = engine.diagnostics(handle).unwrap();
    assert!(diag.halted);
    assert_eq!(diag.periods_processed, 5);
    assert_eq!(diag.callback_failures, 3);
    assert_eq!(diag.last_playback_error, Some(ErrorKind::Io));

    // Running again after the fault clears resumes playback.
    backend.clear_failures();
    engine.set_stream_state(handle, StreamState::Playing).unwrap();
    engine.flush(FLUSH).unwrap();
    backend.run_periods(1);
    assert_eq!(backend.played().len(), 3);
    assert!(!engine.diagnostics(handle).unwrap().halted);
}

#[test]
fn failing_process_callback_degrades_to_silence() {
    let backend = VirtualBackend::new(DriveMode::Manual).with_capture_source(CaptureSource::Constant(0x55));
    let engine = engine(&backend);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let params = StreamCreationParams::new(StreamDirection::Both)
        .with_process(move |_, buffers| {
            buffers.output.copy_from_slice(buffers.input);
            if counter.fetch_add(1, Ordering::SeqCst) >= 1 {
                return Err(StreamError::Unknown("filter diverged".into()));
            }
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();

    backend.run_periods(6);

    let played = backend.played();
    assert_eq!(played.len(), 4);
    assert!(played[0].iter().all(|&b| b == 0x55));
    assert!(played[1..].iter().all(|period| period.iter().all(|&b| b == 0)));
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let diag = engine.diagnostics(handle).unwrap();
    assert!(diag.halted);
    assert_eq!(diag.last_playback_error, Some(ErrorKind::Unknown));
}

#[test]
fn parameters_reach_the_audio_thread() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let params = StreamCreationParams::new(StreamDirection::Playback)
        .with_parameter_block_size(4)
        .with_process(move |_, buffers| {
            sink.lock().push(u32::from_le_bytes([
                buffers.params[0],
                buffers.params[1],
                buffers.params[2],
                buffers.params[3],
            ]));
            buffers.output.fill(0);
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();

    backend.run_periods(1);
    for gain in [10u32, 20, 30] {
        engine
            .send_parameters(handle, &gain.to_le_bytes(), Duration::from_millis(100))
            .unwrap();
        backend.run_periods(1);
    }
    // Two sends between periods coalesce to the later one.
    engine.send_parameters(handle, &40u32.to_le_bytes(), Duration::from_millis(100)).unwrap();
    engine.send_parameters(handle, &50u32.to_le_bytes(), Duration::from_millis(100)).unwrap();
    backend.run_periods(2);

    assert_eq!(*seen.lock(), vec![0, 10, 20, 30, 50, 50]);
    assert_eq!(
        engine.send_parameters(handle, &[0; 5], Duration::from_millis(10)),
        Err(StreamError::InvalidParameter(
            "parameter block of 5 bytes is larger than the stream's 4 bytes".into()
        ))
    );
}

#[test]
fn stale_and_foreign_handles_are_rejected() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let first = engine(&backend);
    let second = engine(&backend);

    let stale = first.create_stream(copy_through(StreamDirection::Playback)).unwrap();
    first.destroy_stream(stale).unwrap();
    let fresh = first.create_stream(copy_through(StreamDirection::Playback)).unwrap();
    assert_eq!(stale.index(), fresh.index());

    for (engine, handle) in [(&first, stale), (&second, fresh)] {
        assert_eq!(engine.stream_state(handle), Err(StreamError::InvalidObject));
        assert_eq!(
            engine.set_stream_state(handle, StreamState::Playing),
            Err(StreamError::InvalidObject)
        );
        assert_eq!(
            engine.send_parameters(handle, &[], Duration::from_millis(1)),
            Err(StreamError::InvalidObject)
        );
        assert_eq!(engine.destroy_stream(handle), Err(StreamError::InvalidObject));
        assert!(engine.diagnostics(handle).is_err());
    }
    assert_eq!(first.stream_state(fresh), Ok(StreamState::Stopped));
}

#[test]
fn record_only_stream_runs_on_the_recorder_clock() {
    let backend = VirtualBackend::new(DriveMode::Manual).with_capture_source(CaptureSource::Constant(9));
    let engine = engine(&backend);
    let captured = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&captured);
    let params = StreamCreationParams::new(StreamDirection::Record)
        .with_process(move |_, buffers| {
            assert!(buffers.output.is_empty());
            if buffers.input.iter().all(|&b| b == 9) && !buffers.input.is_empty() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();
    assert_eq!(backend.live_endpoints(), 1);

    backend.run_periods(25);

    assert_eq!(captured.load(Ordering::SeqCst), 25);
    assert!(backend.played().is_empty());
    let diag = engine.diagnostics(handle).unwrap();
    assert_eq!(diag.record_glitches, 0);
    assert_eq!(backend.recorder_overruns(), 0);
}

#[test]
fn shutdown_tears_down_every_stream() {
    let backend = VirtualBackend::new(DriveMode::Manual);
    let engine = engine(&backend);
    let cleanups = Arc::new(AtomicUsize::new(0));
    let mut handles: Vec<StreamHandle> = Vec::new();
    for direction in [StreamDirection::Record, StreamDirection::Playback, StreamDirection::Both] {
        let counter = Arc::clone(&cleanups);
        let params = copy_through(direction).with_cleanup(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        handles.push(engine.create_stream(params).unwrap());
    }
    assert_eq!(backend.live_endpoints(), 4);

    engine.shutdown().unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 3);
    assert_eq!(backend.live_endpoints(), 0);
    assert!(!backend.is_initialized());
    for handle in handles {
        assert_eq!(engine.stream_state(handle), Err(StreamError::EngineNotInitialized));
    }
}

#[test]
fn configuration_from_json_drives_the_engine() {
    let config = EngineConfiguration::from_json_str(
        r#"{ "device": { "sample_rate": 44100, "bits_per_sample": 16, "bytes_per_sample": 2,
                         "sample_mask": 65535, "floating_point": false, "channel_count": 1,
                         "samples_per_frame": 1, "frames_per_period": 32 },
             "record_buffers": 4 }"#,
    )
    .unwrap();
    let backend = VirtualBackend::new(DriveMode::Manual).with_capture_source(CaptureSource::Constant(1));
    let engine = StreamEngine::new(config, Arc::new(backend.clone())).unwrap();
    engine
        .create_stream(copy_through(StreamDirection::Both).with_initial_state(StreamState::Playing))
        .unwrap();

    backend.run_periods(2);
    assert_eq!(backend.played(), vec![vec![1u8; 64]; 2]);
}

#[test]
fn clocked_stream_plays_on_its_own() {
    init_logging();
    let backend = VirtualBackend::new(DriveMode::Clocked).with_capture_source(CaptureSource::Constant(0x10));
    let engine = engine(&backend);
    let handle = engine
        .create_stream(copy_through(StreamDirection::Both).with_initial_state(StreamState::Playing))
        .unwrap();

    assert!(wait_for(|| engine.diagnostics(handle).map(|d| d.periods_processed >= 20).unwrap_or(false)));
    assert!(backend.played().iter().any(|period| period.iter().all(|&b| b == 0x10)));

    engine.destroy_stream(handle).unwrap();
    engine.flush(FLUSH).unwrap();
    assert_eq!(backend.live_endpoints(), 0);
}

#[test]
fn clocked_parameter_blocks_are_never_torn() {
    init_logging();
    const BLOCK: usize = 32;
    let backend = VirtualBackend::new(DriveMode::Clocked);
    let engine = Arc::new(engine(&backend));
    let torn = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&torn);
    let params = StreamCreationParams::new(StreamDirection::Playback)
        .with_parameter_block_size(BLOCK)
        .with_process(move |_, buffers| {
            let first = buffers.params[0];
            if !buffers.params.iter().all(|&b| b == first) || ![0x00, 0xaa, 0xbb].contains(&first) {
                flag.store(true, Ordering::SeqCst);
            }
            buffers.output.fill(0);
            Ok(())
        })
        .with_initial_state(StreamState::Playing);
    let handle = engine.create_stream(params).unwrap();

    let writers: Vec<_> = [0xaau8, 0xbb]
        .into_iter()
        .map(|pattern| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let block = [pattern; BLOCK];
                let mut sent = 0;
                while sent < 1000 {
                    match engine.send_parameters(handle, &block, Duration::from_millis(50)) {
                        Ok(()) => sent += 1,
                        Err(StreamError::WouldBlock) => thread::yield_now(),
                        Err(e) => panic!("unexpected send error: {}", e),
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert!(wait_for(|| engine.diagnostics(handle).map(|d| d.periods_processed > 0).unwrap_or(false)));
    assert!(!torn.load(Ordering::SeqCst), "process callback saw a torn parameter block");
    engine.destroy_stream(handle).unwrap();
    engine.flush(FLUSH).unwrap();
}
