//! Bounded FIFO of silent frames.
//!
//! Used twice per session: as the preroll buffer (silence before the first
//! speech frame) and as the trailing-silence buffer (silence after speech,
//! waiting to see whether the speaker resumes). Pushing onto a full buffer
//! evicts the oldest frame.

use std::collections::VecDeque;

use super::frame::AudioFrame;

/// Frames reserved up front; larger buffers grow as silence arrives.
const PREALLOCATED_FRAMES: usize = 64;

#[derive(Debug, Clone)]
pub struct SilenceBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl SilenceBuffer {
    /// # Panics
    /// Panics if `capacity` is zero; capacities come from
    /// [`frames_for`](crate::config::frames_for), which never returns zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "silence buffer capacity must be non-zero");
        Self {
            frames: VecDeque::with_capacity(capacity.min(PREALLOCATED_FRAMES)),
            capacity,
        }
    }

    /// Append a frame. Returns the evicted frame when the buffer was already full.
    pub fn push(&mut self, frame: AudioFrame) -> Option<AudioFrame> {
        let evicted = if self.frames.len() == self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Remove every frame, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = AudioFrame> + '_ {
        self.frames.drain(..)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioFrame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64) -> AudioFrame {
        AudioFrame::new(vec![0.0; 4], 16_000, index, index as f64 * 0.5)
    }

    #[test]
    fn fills_to_capacity_then_evicts_oldest() {
        let mut buf = SilenceBuffer::new(3);
        assert!(buf.push(frame(0)).is_none());
        assert!(buf.push(frame(1)).is_none());
        assert!(!buf.is_full());
        assert!(buf.push(frame(2)).is_none());
        assert!(buf.is_full());

        let evicted = buf.push(frame(3)).expect("oldest frame evicted");
        assert_eq!(evicted.index, 0);
        assert_eq!(buf.len(), 3);

        let order: Vec<u64> = buf.iter().map(|f| f.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn drain_yields_original_order_and_empties() {
        let mut buf = SilenceBuffer::new(4);
        for i in 0..3 {
            buf.push(frame(i));
        }
        let drained: Vec<u64> = buf.drain().map(|f| f.index).collect();
        assert_eq!(drained, vec![0, 1, 2]);
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 4);
    }

    #[test]
    fn huge_capacity_is_not_reserved_up_front() {
        let mut buf = SilenceBuffer::new(usize::MAX / 2);
        for i in 0..3 {
            assert!(buf.push(frame(i)).is_none());
        }
        assert_eq!(buf.len(), 3);
        assert!(!buf.is_full());
        assert_eq!(buf.capacity(), usize::MAX / 2);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn zero_capacity_is_rejected() {
        let _ = SilenceBuffer::new(0);
    }
}
