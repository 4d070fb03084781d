use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Opaque reference to a stream owned by a [`StreamEngine`].
///
/// Carries the id of the engine that minted it and the generation of its
/// registry slot, so a handle from another engine or to a destroyed
/// stream is rejected instead of aliasing a newer one.
///
/// [`StreamEngine`]: crate::session::engine::StreamEngine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StreamHandle {
    engine: Uuid,
    index: u32,
    generation: u32,
}

impl StreamHandle {
    pub(crate) fn new(engine: Uuid, index: u32, generation: u32) -> Self {
        Self {
            engine,
            index,
            generation,
        }
    }

    /// Id of the engine that created this handle.
    pub fn engine(&self) -> Uuid {
        self.engine
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let engine = self.engine.simple().to_string();
        write!(f, "stream {}.{}@{}", self.index, self.generation, &engine[..8])
    }
}
