use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::fixed_buffer::FixedBuffer;

/// Rotating record buffers shared by the platform's record callback and
/// the audio thread.
///
/// Three counters partition the slots:
/// ```text
/// consumed ≤ finished ≤ submitted ≤ consumed + buffers
///
///  [consumed, finished)   recorded, waiting for (or held by) the reader
///  [finished, submitted)  handed to the platform to fill
/// ```
/// `submitted` is stored only by the reader, `finished` only by the
/// platform, and `consumed` never leaves the reader. Differences use
/// wrapping arithmetic.
struct RecordRing {
    slots: Box<[UnsafeCell<FixedBuffer>]>,
    quantum: usize,
    submitted: AtomicU64,
    finished: AtomicU64,
}

// SAFETY: the platform only writes the slot at `finished`, which is below
// `submitted`; the reader only reads the slot at `consumed`, which is below
// `finished`. `submitted - consumed <= buffers`, so the two indices never
// map to the same slot while both are in use. Counter stores are release,
// loads on the other side are acquire.
unsafe impl Sync for RecordRing {}
unsafe impl Send for RecordRing {}

impl RecordRing {
    fn buffers(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, counter: u64) -> &UnsafeCell<FixedBuffer> {
        &self.slots[(counter % self.buffers()) as usize]
    }
}

/// Split a ring of `buffers` slots of `quantum` bytes into its platform and
/// audio-thread halves.
pub fn record_ring(buffers: usize, quantum: usize) -> (RecordSink, RecordReader) {
    let buffers = buffers.max(2);
    let slots = (0..buffers)
        .map(|_| UnsafeCell::new(FixedBuffer::new(quantum)))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(RecordRing {
        slots,
        quantum,
        submitted: AtomicU64::new(0),
        finished: AtomicU64::new(0),
    });
    (
        RecordSink {
            ring: Arc::clone(&ring),
        },
        RecordReader {
            ring,
            consumed: 0,
            holding: false,
        },
    )
}

/// Platform half: fills submitted buffers and marks them finished.
pub struct RecordSink {
    ring: Arc<RecordRing>,
}

impl RecordSink {
    /// Size of one record buffer in bytes.
    pub fn quantum(&self) -> usize {
        self.ring.quantum
    }

    /// Buffers submitted by the stream and not yet filled.
    pub fn pending(&self) -> u64 {
        let submitted = self.ring.submitted.load(Ordering::Acquire);
        let finished = self.ring.finished.load(Ordering::Relaxed);
        submitted.wrapping_sub(finished)
    }

    /// Fill the next submitted buffer and publish it to the reader.
    ///
    /// Returns `false` when the stream has no buffer submitted, which is
    /// an overrun: the captured audio has nowhere to go.
    pub fn fill_next<F>(&mut self, fill: F) -> bool
    where
        F: FnOnce(&mut [u8]),
    {
        let ring = &*self.ring;
        let finished = ring.finished.load(Ordering::Relaxed);
        let submitted = ring.submitted.load(Ordering::Acquire);
        if submitted.wrapping_sub(finished) == 0 {
            return false;
        }

        // SAFETY: `finished < submitted`, so this slot belongs to the platform.
        let slot = unsafe { &mut *ring.slot(finished).get() };
        fill(slot.as_mut_slice());
        ring.finished
            .store(finished.wrapping_add(1), Ordering::Release);
        true
    }
}

/// Audio-thread half: reads the oldest recorded buffer and keeps the
/// platform supplied with empty ones.
pub struct RecordReader {
    ring: Arc<RecordRing>,
    consumed: u64,
    holding: bool,
}

impl RecordReader {
    pub fn quantum(&self) -> usize {
        self.ring.quantum
    }

    pub fn buffers(&self) -> usize {
        self.ring.slots.len()
    }

    /// Recorded buffers not yet consumed.
    pub fn available(&self) -> u64 {
        self.ring
            .finished
            .load(Ordering::Acquire)
            .wrapping_sub(self.consumed)
    }

    /// Buffers the platform currently owns.
    pub fn in_flight(&self) -> u64 {
        let submitted = self.ring.submitted.load(Ordering::Relaxed);
        let finished = self.ring.finished.load(Ordering::Acquire);
        submitted.wrapping_sub(finished)
    }

    /// The oldest recorded, unconsumed buffer, if any.
    ///
    /// The buffer stays held until [`RecordReader::release`].
    pub fn acquire(&mut self) -> Option<&[u8]> {
        if self.holding {
            // SAFETY: still holding the slot at `consumed`.
            return Some(unsafe { (*self.ring.slot(self.consumed).get()).as_slice() });
        }
        if self.available() == 0 {
            return None;
        }
        self.holding = true;
        // SAFETY: `consumed < finished`, so the platform is done with this slot
        // and cannot get it back before `release` resubmits it.
        Some(unsafe { (*self.ring.slot(self.consumed).get()).as_slice() })
    }

    /// Give back the held buffer, if any, and submit every free buffer to
    /// the platform. Returns how many buffers were submitted.
    pub fn release(&mut self) -> u64 {
        if self.holding {
            self.consumed = self.consumed.wrapping_add(1);
            self.holding = false;
        }
        self.submit_free()
    }

    /// Submit free buffers until the platform holds all of them.
    pub fn submit_free(&mut self) -> u64 {
        let ring = &*self.ring;
        let buffers = ring.buffers();
        let mut submitted = ring.submitted.load(Ordering::Relaxed);
        let mut count = 0;
        while submitted.wrapping_sub(self.consumed) < buffers {
            submitted = submitted.wrapping_add(1);
            count += 1;
        }
        if count > 0 {
            ring.submitted.store(submitted, Ordering::Release);
        }
        count
    }
}
