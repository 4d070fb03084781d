//! Synthesized capture input for virtual recorders.

/// What a virtual recorder "hears".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureSource {
    /// Zero bytes.
    #[default]
    Silence,
    /// Every byte set to the given value.
    Constant(u8),
    /// A running byte counter across periods: byte `i` of period `p` is
    /// `(p * quantum + i) mod 256`.
    Counter,
}

impl CaptureSource {
    /// Fill `buffer` with the capture for recorder period `period`.
    pub fn fill(&self, period: u64, buffer: &mut [u8]) {
        match *self {
            Self::Silence => buffer.fill(0),
            Self::Constant(value) => buffer.fill(value),
            Self::Counter => {
                let start = period.wrapping_mul(buffer.len() as u64);
                for (i, byte) in buffer.iter_mut().enumerate() {
                    *byte = start.wrapping_add(i as u64) as u8;
                }
            }
        }
    }
}
