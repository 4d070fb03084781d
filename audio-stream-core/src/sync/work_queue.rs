use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use super::semaphore::Semaphore;
use crate::models::error::StreamError;

/// A deferred unit of work.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Bounded FIFO of closures executed one at a time on a dedicated thread.
///
/// Stream lifecycle operations call into platform APIs that are slow and
/// must not race the audio callback's own setup and teardown, so they are
/// all funneled through here. Submitting never blocks: a full queue is
/// reported to the caller.
pub struct WorkQueue {
    producer: Mutex<Producer<WorkItem>>,
    shared: Arc<WorkerShared>,
    handle: Option<thread::JoinHandle<()>>,
    capacity: usize,
}

struct WorkerShared {
    semaphore: Semaphore,
    cancelled: AtomicBool,
}

impl WorkQueue {
    /// Spawn the worker thread `name` with room for `capacity` pending items.
    pub fn new(name: &str, capacity: usize) -> Result<Self, StreamError> {
        let capacity = capacity.max(1);
        let (producer, consumer) = RingBuffer::<WorkItem>::new(capacity);
        let shared = Arc::new(WorkerShared {
            semaphore: Semaphore::new(0),
            cancelled: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || run_worker(&worker_shared, consumer))
            .map_err(|e| StreamError::Unknown(format!("failed to spawn worker thread: {}", e)))?;

        log::debug!("work queue '{}' started with capacity {}", name, capacity);
        Ok(Self {
            producer: Mutex::new(producer),
            shared,
            handle: Some(handle),
            capacity,
        })
    }

    /// Enqueue `work`. Returns `false` without blocking if the queue is full.
    pub fn push_work<F>(&self, work: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let pushed = self.producer.lock().push(Box::new(work)).is_ok();
        if pushed {
            self.shared.semaphore.signal();
        }
        pushed
    }

    /// Wait until everything submitted before this call has run.
    pub fn flush(&self, timeout: Duration) -> Result<(), StreamError> {
        self.flush_ticket()?.wait(timeout)
    }

    /// Queue a marker behind everything submitted so far.
    ///
    /// The returned ticket does not borrow the queue, so a caller can let
    /// go of whatever guards the queue before waiting on it.
    pub fn flush_ticket(&self) -> Result<FlushTicket, StreamError> {
        if self.is_worker_thread() {
            return Err(StreamError::WouldBlock);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        if !self.push_work(move || {
            let _ = tx.send(());
        }) {
            return Err(StreamError::WouldBlock);
        }
        Ok(FlushTicket { done: rx })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items submitted but not yet started.
    pub fn pending(&self) -> usize {
        self.capacity - self.producer.lock().slots()
    }

    pub fn is_worker_thread(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| h.thread().id() == thread::current().id())
            .unwrap_or(false)
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut cancel: WorkItem = Box::new(move || shared.cancelled.store(true, Ordering::Release));

        // Queue behind whatever is pending so it all still runs in order.
        loop {
            match self.producer.lock().push(cancel) {
                Ok(()) => break,
                Err(PushError::Full(back)) => {
                    cancel = back;
                    thread::yield_now();
                }
            }
        }
        self.shared.semaphore.signal();

        if self.is_worker_thread() {
            log::warn!("work queue dropped from its own worker; not joining");
            return;
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("work queue worker thread panicked");
            }
        }
    }
}

/// Completion marker returned by [`WorkQueue::flush_ticket`].
pub struct FlushTicket {
    done: mpsc::Receiver<()>,
}

impl FlushTicket {
    /// Wait for the marker to run. `WouldBlock` on timeout.
    pub fn wait(self, timeout: Duration) -> Result<(), StreamError> {
        self.done.recv_timeout(timeout).map_err(|_| StreamError::WouldBlock)
    }
}

fn run_worker(shared: &WorkerShared, mut consumer: Consumer<WorkItem>) {
    while !shared.cancelled.load(Ordering::Acquire) {
        shared.semaphore.wait();
        let Ok(work) = consumer.pop() else {
            continue;
        };
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(work)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            log::error!("work item panicked: {}", message);
        }
    }
    log::debug!("work queue worker exiting");
}
