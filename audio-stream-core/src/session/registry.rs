use uuid::Uuid;

use crate::models::error::{Result, StreamError};
use crate::models::handle::StreamHandle;

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot table mapping [`StreamHandle`]s to values.
///
/// Removing a value bumps its slot's generation, so handles to it stop
/// resolving even after the slot is reused.
pub(crate) struct HandleTable<T> {
    engine: Uuid,
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    pub fn new(engine: Uuid) -> Self {
        Self {
            engine,
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store the value built by `make`, which receives the value's handle.
    /// If `make` fails nothing is stored.
    pub fn try_insert_with<F>(&mut self, make: F) -> Result<StreamHandle>
    where
        F: FnOnce(StreamHandle) -> Result<T>,
    {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                (self.entries.len() - 1) as u32
            }
        };
        let handle = StreamHandle::new(self.engine, index, self.entries[index as usize].generation);
        match make(handle) {
            Ok(value) => {
                self.entries[index as usize].value = Some(value);
                self.len += 1;
                Ok(handle)
            }
            Err(e) => {
                self.free.push(index);
                Err(e)
            }
        }
    }

    pub fn get(&self, handle: StreamHandle) -> Result<&T> {
        self.entry(handle)
            .and_then(|entry| entry.value.as_ref())
            .ok_or(StreamError::InvalidObject)
    }

    pub fn remove(&mut self, handle: StreamHandle) -> Result<T> {
        if handle.engine() != self.engine {
            return Err(StreamError::InvalidObject);
        }
        let entry = self
            .entries
            .get_mut(handle.index() as usize)
            .filter(|entry| entry.generation == handle.generation())
            .ok_or(StreamError::InvalidObject)?;
        let value = entry.value.take().ok_or(StreamError::InvalidObject)?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Ok(value)
    }

    /// Remove every value, invalidating all outstanding handles.
    pub fn drain(&mut self) -> Vec<(StreamHandle, T)> {
        let mut drained = Vec::with_capacity(self.len);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Some(value) = entry.value.take() {
                drained.push((StreamHandle::new(self.engine, index as u32, entry.generation), value));
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.len = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn entry(&self, handle: StreamHandle) -> Option<&Entry<T>> {
        if handle.engine() != self.engine {
            return None;
        }
        self.entries
            .get(handle.index() as usize)
            .filter(|entry| entry.generation == handle.generation())
    }
}
