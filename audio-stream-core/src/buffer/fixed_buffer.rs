/// Owned, fixed-size byte buffer.
///
/// The size is set at construction and never changes. Copies move
/// `min(source, self)` bytes and report how many they moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedBuffer {
    data: Box<[u8]>,
}

impl FixedBuffer {
    /// Allocate a zero-filled buffer of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Set every byte to `value`.
    pub fn clear(&mut self, value: u8) {
        self.data.fill(value);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copy from `src` into the front of the buffer.
    pub fn copy_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len());
        self.data[..n].copy_from_slice(&src[..n]);
        n
    }

    pub fn copy_from_buffer(&mut self, other: &FixedBuffer) -> usize {
        self.copy_from(other.as_slice())
    }
}

impl AsRef<[u8]> for FixedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsMut<[u8]> for FixedBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
}
