//! Ring buffer for captured samples and window normalization.
//!
//! The ring buffer holds the most recent `capacity` i16 samples written
//! by the capture path; the classification loop reads a full window from
//! it each tick. The buffer is single-writer/single-reader per session
//! and does not allocate on the write path after construction.

/// Fixed-capacity circular store of the most recent samples.
pub struct RingSampleBuffer {
    samples: Vec<i16>,
    cursor: usize,
}

impl RingSampleBuffer {
    /// Create a buffer holding `capacity` samples, initially silence.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            samples: vec![0; capacity],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Current write position; `read_window(cursor())` yields the last
    /// `capacity` samples in chronological order.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Copy `samples` in at the cursor, wrapping modulo the capacity.
    ///
    /// When more samples arrive than the buffer holds, only the most
    /// recent `capacity` of them survive, which is the same outcome as
    /// writing them all in order.
    pub fn write(&mut self, samples: &[i16]) {
        let capacity = self.samples.len();
        // Only the tail can still be visible after wrapping.
        let src = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let first = (capacity - self.cursor).min(src.len());
        self.samples[self.cursor..self.cursor + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        if rest > 0 {
            self.samples[..rest].copy_from_slice(&src[first..]);
        }
        self.cursor = (self.cursor + src.len()) % capacity;
    }

    /// Read `capacity` samples starting at an arbitrary offset, wrapping.
    pub fn read_window(&self, start: usize) -> Vec<i16> {
        let capacity = self.samples.len();
        let start = start % capacity;
        let mut window = Vec::with_capacity(capacity);
        window.extend_from_slice(&self.samples[start..]);
        window.extend_from_slice(&self.samples[..start]);
        window
    }

    /// The most recent `capacity` samples in chronological order.
    pub fn window(&self) -> Vec<i16> {
        self.read_window(self.cursor)
    }
}

/// Peak-normalize a window of i16 samples to f32 amplitude in [-1, 1].
///
/// `max_abs` is clamped to at least 1.0, so an all-zero window maps to
/// an all-zero output instead of dividing by zero.
pub fn peak_normalize(samples: &[i16]) -> Vec<f32> {
    let max_abs = samples
        .iter()
        .fold(1.0f32, |acc, &s| acc.max((s as f32).abs()));
    samples.iter().map(|&s| s as f32 / max_abs).collect()
}
