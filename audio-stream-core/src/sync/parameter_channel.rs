use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::CacheAligned;
use crate::buffer::fixed_buffer::FixedBuffer;

/// Fixed-size parameter exchange between control threads and the audio thread.
///
/// Writers copy a block into slot `write_position % margin` while holding
/// that slot's lock, then advance `write_position`. The reader only ever
/// `try_lock`s the most recently completed slot, so it never waits on a
/// writer: on contention `pop` fails and the previous block stays in the
/// cache. Writers on slot `k + 1` never wait on a reader still copying out
/// of slot `k`.
///
/// The reader is not guaranteed to see every block. Blocks pushed between
/// two pops coalesce to the newest one.
///
/// ```text
/// writers ──push──▶ [slot 0][slot 1][slot 2] ──try_lock──▶ cache ──top()──▶ audio thread
///                        ▲ write_position % margin
/// ```
pub struct ParameterChannel {
    slots: Arc<SlotArray>,
    // Last block successfully read. Zeroed until the first pop that finds data.
    cache: FixedBuffer,
    scratch: FixedBuffer,
}

/// Cloneable write half of a [`ParameterChannel`].
#[derive(Clone)]
pub struct ParameterWriter {
    slots: Arc<SlotArray>,
    spin_attempts: u32,
    yield_attempts: u32,
}

struct SlotArray {
    element_size: usize,
    // Only increases; wraps by unsigned overflow.
    write_position: CacheAligned<AtomicUsize>,
    published: AtomicBool,
    slots: Box<[Mutex<FixedBuffer>]>,
}

const DEFAULT_SPIN_ATTEMPTS: u32 = 5;
const DEFAULT_YIELD_ATTEMPTS: u32 = 5;

impl SlotArray {
    fn new(element_size: usize, margin: usize) -> Self {
        let slots = (0..margin)
            .map(|_| Mutex::new(FixedBuffer::new(element_size)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            element_size,
            write_position: CacheAligned(AtomicUsize::new(0)),
            published: AtomicBool::new(false),
            slots,
        }
    }

    fn margin(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, position: usize) -> &Mutex<FixedBuffer> {
        &self.slots[position % self.slots.len()]
    }

    /// Copy `src` into the slot at the current write position.
    ///
    /// `acquire` decides how hard to try for the slot lock; `None` from it
    /// aborts the write without touching the channel.
    fn write<'a, F>(&'a self, src: &[u8], mut acquire: F) -> Option<usize>
    where
        F: FnMut(&'a Mutex<FixedBuffer>) -> Option<MutexGuard<'a, FixedBuffer>>,
    {
        if self.element_size == 0 {
            return Some(0);
        }
        loop {
            let position = self.write_position.load(Ordering::Relaxed);
            let mut slot = acquire(self.slot(position))?;

            // Another writer took this position while we waited for the lock.
            if self.write_position.load(Ordering::Relaxed) != position {
                continue;
            }

            let written = slot.copy_from(src);
            slot.as_mut_slice()[written..].fill(0);
            self.write_position
                .store(position.wrapping_add(1), Ordering::Release);
            self.published.store(true, Ordering::Release);
            return Some(written);
        }
    }
}

impl ParameterChannel {
    /// Create a channel of `margin` slots, each `element_size` bytes.
    ///
    /// A margin below 2 would put reader and writer on the same slot on
    /// every write, so it is raised to 2.
    pub fn new(element_size: usize, margin: usize) -> Self {
        let margin = margin.max(2);
        Self {
            slots: Arc::new(SlotArray::new(element_size, margin)),
            cache: FixedBuffer::new(element_size),
            scratch: FixedBuffer::new(element_size),
        }
    }

    pub fn element_size(&self) -> usize {
        self.slots.element_size
    }

    pub fn margin(&self) -> usize {
        self.slots.margin()
    }

    /// A write handle for control threads.
    pub fn writer(&self) -> ParameterWriter {
        ParameterWriter {
            slots: Arc::clone(&self.slots),
            spin_attempts: DEFAULT_SPIN_ATTEMPTS,
            yield_attempts: DEFAULT_YIELD_ATTEMPTS,
        }
    }

    /// Same as [`ParameterWriter::push`].
    pub fn push(&self, src: &[u8]) -> usize {
        self.writer().push(src)
    }

    /// Try to read the most recently completed block into the cache.
    ///
    /// Never blocks. Returns `false` if a writer holds the slot; the cache
    /// then keeps its previous contents and is still safe to use. Returns
    /// `true` without reading when nothing was ever pushed or the element
    /// size is zero.
    pub fn pop(&mut self) -> bool {
        if self.slots.element_size == 0 || !self.slots.published.load(Ordering::Acquire) {
            return true;
        }

        let position = self.slots.write_position.load(Ordering::Acquire);
        let newest = position.wrapping_sub(1);
        match self.slots.slot(newest).try_lock() {
            Some(slot) => {
                self.scratch.copy_from_buffer(&slot);
                drop(slot);
                mem::swap(&mut self.cache, &mut self.scratch);
                true
            }
            None => false,
        }
    }

    /// The last block read by [`ParameterChannel::pop`].
    pub fn top(&self) -> &[u8] {
        self.cache.as_slice()
    }

    /// Number of completed writes, modulo `usize` wraparound.
    pub fn write_position(&self) -> usize {
        self.slots.write_position.load(Ordering::Acquire)
    }
}

impl ParameterWriter {
    /// Override the retry budget used by [`ParameterWriter::push_timeout`].
    pub fn with_retry_budget(mut self, spin_attempts: u32, yield_attempts: u32) -> Self {
        self.spin_attempts = spin_attempts;
        self.yield_attempts = yield_attempts;
        self
    }

    pub fn element_size(&self) -> usize {
        self.slots.element_size
    }

    /// Copy up to `element_size` bytes of `src` into the channel.
    ///
    /// Blocks only while the reader is copying out of the same slot, which
    /// needs a lapped reader. Shorter blocks are zero-padded. Returns the
    /// number of bytes taken from `src`.
    pub fn push(&self, src: &[u8]) -> usize {
        self.slots.write(src, |slot| Some(slot.lock())).unwrap_or(0)
    }

    /// Like [`ParameterWriter::push`], but gives up after `timeout`.
    ///
    /// The slot lock is tried with a few spins, then with yields between
    /// attempts, then with a timed wait for whatever is left of `timeout`.
    /// `None` means the block was not handed off.
    pub fn push_timeout(&self, src: &[u8], timeout: Duration) -> Option<usize> {
        let deadline = Instant::now() + timeout;
        let spins = self.spin_attempts;
        let yields = self.yield_attempts;

        self.slots.write(src, |slot| {
            for _ in 0..spins {
                if let Some(guard) = slot.try_lock() {
                    return Some(guard);
                }
                std::hint::spin_loop();
            }
            for _ in 0..yields {
                thread::yield_now();
                if let Some(guard) = slot.try_lock() {
                    return Some(guard);
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            slot.try_lock_for(remaining)
        })
    }
}
