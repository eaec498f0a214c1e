//! Reactive buffer sizing

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::{BufferDecision, BufferSource, BufferStrategy};

/// Trailing window length.
pub const HISTORY_WINDOW: usize = 5;
pub const DEFAULT_INITIAL_SIZE: usize = 8 * 1024;
pub const DEFAULT_MIN_SIZE: usize = 1024;
pub const DEFAULT_MAX_SIZE: usize = 128 * 1024;
pub const ADJUSTMENT_FACTOR: f64 = 1.5;

const GROW_THRESHOLD: f64 = 0.8;
const SHRINK_THRESHOLD: f64 = 0.3;

/// Grows or shrinks the recommended size from the mean of recent chunk sizes.
///
/// After each observation the mean of the last [`HISTORY_WINDOW`] values is
/// compared with the current size: above 80% grows by ×1.5, below 30% shrinks
/// by ÷1.5. The result is always clamped to `[min_size, max_size]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicBuffer {
    current_size: usize,
    min_size: usize,
    max_size: usize,
    history: VecDeque<usize>,
}

impl Default for DynamicBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_SIZE, DEFAULT_MIN_SIZE, DEFAULT_MAX_SIZE)
    }
}

impl DynamicBuffer {
    /// Bounds are reordered if given backwards; the initial size is clamped.
    pub fn new(initial_size: usize, min_size: usize, max_size: usize) -> Self {
        let (min_size, max_size) = if min_size <= max_size {
            (min_size, max_size)
        } else {
            (max_size, min_size)
        };
        Self {
            current_size: initial_size.clamp(min_size, max_size),
            min_size,
            max_size,
            history: VecDeque::with_capacity(HISTORY_WINDOW),
        }
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min_size, self.max_size)
    }

    /// Record a chunk size and return the new recommendation.
    pub fn adjust(&mut self, chunk_size: usize) -> usize {
        if self.history.len() == HISTORY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(chunk_size);

        let mean = self.history.iter().map(|&s| s as f64).sum::<f64>() / self.history.len() as f64;
        let current = self.current_size as f64;

        let next = if mean > current * GROW_THRESHOLD {
            (current * ADJUSTMENT_FACTOR) as usize
        } else if mean < current * SHRINK_THRESHOLD {
            (current / ADJUSTMENT_FACTOR) as usize
        } else {
            self.current_size
        };
        self.current_size = next.clamp(self.min_size, self.max_size);
        self.current_size
    }
}

impl BufferStrategy for DynamicBuffer {
    fn decision(&self) -> BufferDecision {
        BufferDecision::new(self.current_size, BufferSource::Reactive)
    }

    fn observe(&mut self, chunk_size: usize, _failed: bool) -> BufferDecision {
        self.adjust(chunk_size);
        self.decision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_when_chunks_fill_the_buffer() {
        let mut buffer = DynamicBuffer::default();
        assert_eq!(buffer.adjust(8000), 12288);
    }

    #[test]
    fn shrinks_when_chunks_are_small() {
        let mut buffer = DynamicBuffer::default();
        assert_eq!(buffer.adjust(100), 5461);
    }

    #[test]
    fn steady_inside_the_band() {
        let mut buffer = DynamicBuffer::default();
        assert_eq!(buffer.adjust(4096), 8192);
    }

    #[test]
    fn mean_uses_only_the_last_five() {
        let mut buffer = DynamicBuffer::new(10_000, 1024, 1_000_000);
        for _ in 0..5 {
            buffer.adjust(5000);
        }
        assert_eq!(buffer.size(), 10_000);
        buffer.adjust(1_000_000);
        assert_eq!(buffer.size(), 15_000);
        for _ in 0..4 {
            buffer.adjust(7_000);
        }
        assert_eq!(buffer.size(), 75_937);
        // the outlier leaves the window here
        assert_eq!(buffer.adjust(7_000), 50_624);
    }

    #[test]
    fn clamps_at_both_bounds() {
        let mut buffer = DynamicBuffer::default();
        for _ in 0..20 {
            buffer.adjust(usize::MAX / 8);
        }
        assert_eq!(buffer.size(), DEFAULT_MAX_SIZE);
        let mut buffer = DynamicBuffer::default();
        for _ in 0..20 {
            buffer.adjust(0);
        }
        assert_eq!(buffer.size(), DEFAULT_MIN_SIZE);
    }

    #[test]
    fn decision_reports_reactive_source() {
        let buffer = DynamicBuffer::default();
        assert_eq!(
            buffer.decision(),
            BufferDecision::new(DEFAULT_INITIAL_SIZE, BufferSource::Reactive)
        );
    }
}
