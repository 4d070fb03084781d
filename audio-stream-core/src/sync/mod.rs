//! Thread-handoff primitives.
//!
//! Two queues live here: [`ParameterChannel`] never
//! blocks its reader and coalesces writes, while the `rtrb`-backed
//! [`WorkQueue`] keeps every item and lets its consumer sleep on a
//! [`Semaphore`].
//!
//! [`ParameterChannel`]: parameter_channel::ParameterChannel
//! [`WorkQueue`]: work_queue::WorkQueue
//! [`Semaphore`]: semaphore::Semaphore

use std::ops::{Deref, DerefMut};

pub mod parameter_channel;
pub mod semaphore;
pub mod work_queue;

/// Keeps a frequently written value on its own cache line.
#[repr(align(64))]
#[derive(Debug, Default)]
pub(crate) struct CacheAligned<T>(pub T);

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
