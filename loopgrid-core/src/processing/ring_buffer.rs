use std::time::Duration;

use crate::models::error::LooperError;
use crate::models::frame::{Frame, FrameFormat};

/// Fixed-capacity circular store of frame handles.
///
/// Wrap in `parking_lot::Mutex` for cross-thread access; the capture hook
/// writes from the streaming thread while the control thread reads.
///
/// Overflow behavior: drops the oldest frame. There is no backpressure.
/// Logical index 0 is always the oldest resident frame.
#[derive(Debug)]
pub struct FrameRingBuffer {
    slots: Vec<Option<Frame>>,
    write_cursor: usize,
    frame_count: usize,
    capacity: usize,
    format: Option<FrameFormat>,
    overflow_count: u64,
    total_written: u64,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Result<Self, LooperError> {
        if capacity == 0 {
            log::error!("Cannot create ring buffer with zero capacity");
            return Err(LooperError::Allocation(
                "ring buffer capacity must be at least 1".into(),
            ));
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        log::debug!("Ring buffer created: capacity={} frames", capacity);
        Ok(Self {
            slots,
            write_cursor: 0,
            frame_count: 0,
            capacity,
            format: None,
            overflow_count: 0,
            total_written: 0,
        })
    }

    /// Store a frame at the write cursor.
    ///
    /// The first frame written binds the buffer's format descriptor. Once the
    /// buffer is full, the oldest frame is released and overwritten.
    pub fn write(&mut self, frame: Frame) {
        if self.format.is_none() {
            self.format = Some(frame.format().as_ref().clone());
        }

        self.total_written += 1;
        if self.frame_count == self.capacity {
            self.overflow_count += 1;
            log::trace!(
                "Ring buffer overflow: replacing frame at slot {} (overflows={})",
                self.write_cursor,
                self.overflow_count
            );
        }

        // Replacing the slot drops the previous handle.
        self.slots[self.write_cursor] = Some(frame);
        self.frame_count = (self.frame_count + 1).min(self.capacity);
        self.write_cursor = (self.write_cursor + 1) % self.capacity;
    }

    /// Read the frame at `logical_index`, where 0 is the oldest resident frame.
    pub fn read(&self, logical_index: usize) -> Result<&Frame, LooperError> {
        if logical_index >= self.frame_count {
            return Err(LooperError::OutOfRange {
                index: logical_index,
                len: self.frame_count,
            });
        }

        let physical =
            (self.write_cursor + self.capacity - self.frame_count + logical_index) % self.capacity;
        self.slots[physical].as_ref().ok_or(LooperError::OutOfRange {
            index: logical_index,
            len: self.frame_count,
        })
    }

    /// Clone every resident frame handle in logical order (oldest first).
    pub fn snapshot(&self) -> Vec<Frame> {
        (0..self.frame_count)
            .filter_map(|i| self.read(i).ok().cloned())
            .collect()
    }

    /// Release all frames. Capacity and format descriptor persist.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.write_cursor = 0;
        self.frame_count = 0;
    }

    /// Number of frames currently resident.
    pub fn len(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.frame_count == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Format of the first frame ever written, if any.
    pub fn format(&self) -> Option<&FrameFormat> {
        self.format.as_ref()
    }

    /// Capture-time span from the oldest to the newest resident frame.
    ///
    /// Zero with fewer than two frames.
    pub fn duration(&self) -> Duration {
        if self.frame_count < 2 {
            return Duration::ZERO;
        }
        match (self.read(0), self.read(self.frame_count - 1)) {
            (Ok(oldest), Ok(newest)) => newest
                .captured_at()
                .saturating_duration_since(oldest.captured_at()),
            _ => Duration::ZERO,
        }
    }

    /// Frames dropped by overwrite since creation.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// All writes since creation, including frames later overwritten.
    pub fn total_written(&self) -> u64 {
        self.total_written
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    fn frame(sequence: u64) -> Frame {
        let format = Arc::new(FrameFormat::new(320, 180, "I420"));
        Frame::new(vec![sequence as u8], sequence, format)
    }

    fn sequences(buf: &FrameRingBuffer) -> Vec<u64> {
        buf.snapshot().iter().map(Frame::sequence).collect()
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(matches!(
            FrameRingBuffer::new(0),
            Err(LooperError::Allocation(_))
        ));
    }

    #[test]
    fn basic_write_read() {
        let mut buf = FrameRingBuffer::new(10).unwrap();
        buf.write(frame(0));
        buf.write(frame(1));
        buf.write(frame(2));

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.read(0).unwrap().sequence(), 0);
        assert_eq!(buf.read(2).unwrap().sequence(), 2);
        assert_eq!(
            buf.read(3).unwrap_err(),
            LooperError::OutOfRange { index: 3, len: 3 }
        );
    }

    #[test]
    fn count_and_oldest_for_any_write_count() {
        for capacity in 1..=6usize {
            for writes in 0..=15u64 {
                let mut buf = FrameRingBuffer::new(capacity).unwrap();
                for seq in 0..writes {
                    buf.write(frame(seq));
                }

                assert_eq!(buf.len(), (writes as usize).min(capacity));
                if writes > 0 {
                    let oldest = writes.saturating_sub(capacity as u64);
                    assert_eq!(buf.read(0).unwrap().sequence(), oldest);
                }
            }
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut buf = FrameRingBuffer::new(4).unwrap();
        for seq in 0..6 {
            buf.write(frame(seq));
        }

        assert!(buf.is_full());
        assert_eq!(sequences(&buf), vec![2, 3, 4, 5]);
        assert_eq!(buf.overflow_count(), 2);
        assert_eq!(buf.total_written(), 6);
    }

    #[test]
    fn overwrite_releases_old_payload() {
        let mut buf = FrameRingBuffer::new(1).unwrap();
        let first = frame(0);
        let held = first.clone();
        buf.write(first);
        assert!(buf.read(0).unwrap().same_payload(&held));

        buf.write(frame(1));
        assert_eq!(buf.read(0).unwrap().sequence(), 1);
        assert!(!buf.read(0).unwrap().same_payload(&held));
    }

    #[test]
    fn format_bound_on_first_write() {
        let mut buf = FrameRingBuffer::new(2).unwrap();
        assert!(buf.format().is_none());

        buf.write(frame(0));
        let other = Arc::new(FrameFormat::new(1920, 1080, "NV12"));
        buf.write(Frame::new(vec![0u8], 1, other));

        assert_eq!(buf.format().unwrap().width, 320);
    }

    #[test]
    fn clear_then_write() {
        let mut buf = FrameRingBuffer::new(3).unwrap();
        for seq in 0..5 {
            buf.write(frame(seq));
        }
        buf.clear();

        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 3);
        assert!(buf.format().is_some());

        buf.write(frame(42));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.read(0).unwrap().sequence(), 42);
    }

    #[test]
    fn duration_tracks_resident_frames() {
        let t0 = Instant::now();
        let timed = |seq: u64| frame(seq).with_capture_time(t0 + Duration::from_millis(40 * seq));

        let mut buf = FrameRingBuffer::new(3).unwrap();
        assert_eq!(buf.duration(), Duration::ZERO);
        buf.write(timed(0));
        assert_eq!(buf.duration(), Duration::ZERO);

        buf.write(timed(1));
        buf.write(timed(2));
        assert_eq!(buf.duration(), Duration::from_millis(80));

        // oldest frame dropped, span slides forward
        buf.write(timed(3));
        buf.write(timed(4));
        assert_eq!(sequences(&buf), vec![2, 3, 4]);
        assert_eq!(buf.duration(), Duration::from_millis(80));

        buf.clear();
        assert_eq!(buf.duration(), Duration::ZERO);
    }

    #[test]
    fn empty_operations() {
        let buf = FrameRingBuffer::new(10).unwrap();
        assert!(buf.is_empty());
        assert!(buf.snapshot().is_empty());
        assert!(buf.read(0).is_err());
    }
}
