//! Sample-clocked ring window.
//!
//! The detector bank and symbol state machines never see the raw input
//! stream directly. Instead they read through a [`RingWindow`]: a fixed
//! power-of-two capacity buffer addressed by a monotonically increasing
//! sample counter, so "5 samples ago" and "120 samples ago" are cheap
//! lookups regardless of how many [`crate::types::SampleBlock`]s have been
//! pushed through it.

use num_complex::Complex32;

/// A power-of-two sized circular buffer of I/Q samples, addressed by
/// absolute sample index rather than buffer offset.
pub struct RingWindow {
    buffer: Vec<Complex32>,
    mask: usize,
    /// Absolute index of the next sample to be written.
    write_index: u64,
}

impl RingWindow {
    /// `capacity_pow2` is rounded up to the next power of two if it isn't
    /// one already, matching the addressing trick used throughout the
    /// detector bank (`index & mask` instead of `index % capacity`).
    pub fn new(capacity_pow2: usize) -> Self {
        let capacity = capacity_pow2.next_power_of_two().max(2);
        Self {
            buffer: vec![Complex32::new(0.0, 0.0); capacity],
            mask: capacity - 1,
            write_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Absolute index of the next sample that will be written.
    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Push one sample, advancing the write cursor.
    pub fn push(&mut self, sample: Complex32) {
        let slot = (self.write_index as usize) & self.mask;
        self.buffer[slot] = sample;
        self.write_index += 1;
    }

    /// Push a whole block of samples.
    pub fn push_slice(&mut self, samples: &[Complex32]) {
        for &s in samples {
            self.push(s);
        }
    }

    /// Read the sample at absolute index `index`. Returns `None` if the
    /// index has already been overwritten or hasn't been written yet.
    pub fn get(&self, index: u64) -> Option<Complex32> {
        if index >= self.write_index {
            return None;
        }
        if self.write_index - index > self.buffer.len() as u64 {
            return None;
        }
        Some(self.buffer[(index as usize) & self.mask])
    }

    /// Read the sample `delay` positions behind the write cursor (`delay =
    /// 0` is the most recently pushed sample).
    pub fn delayed(&self, delay: u64) -> Option<Complex32> {
        if delay >= self.write_index {
            return None;
        }
        self.get(self.write_index - 1 - delay)
    }

    /// Whether the window has accumulated at least `samples` total pushes.
    pub fn has_history(&self, samples: u64) -> bool {
        self.write_index >= samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_capacity_to_power_of_two() {
        let ring = RingWindow::new(100);
        assert_eq!(ring.capacity(), 128);
    }

    #[test]
    fn delayed_reads_recent_history() {
        let mut ring = RingWindow::new(8);
        for i in 0..5 {
            ring.push(Complex32::new(i as f32, 0.0));
        }
        assert_eq!(ring.delayed(0), Some(Complex32::new(4.0, 0.0)));
        assert_eq!(ring.delayed(4), Some(Complex32::new(0.0, 0.0)));
        assert_eq!(ring.delayed(5), None);
    }

    #[test]
    fn overwritten_indices_return_none() {
        let mut ring = RingWindow::new(4);
        for i in 0..10 {
            ring.push(Complex32::new(i as f32, 0.0));
        }
        assert_eq!(ring.get(0), None);
        assert_eq!(ring.get(9), Some(Complex32::new(9.0, 0.0)));
    }

    #[test]
    fn has_history_tracks_total_pushes() {
        let mut ring = RingWindow::new(4);
        assert!(!ring.has_history(1));
        ring.push(Complex32::new(0.0, 0.0));
        assert!(ring.has_history(1));
        assert!(!ring.has_history(2));
    }
}
