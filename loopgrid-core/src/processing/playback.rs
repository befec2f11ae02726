use crate::models::error::LooperError;
use crate::models::frame::{Frame, FrameFormat};
use crate::processing::palindrome::{Direction, PalindromeSequencer};
use crate::processing::ring_buffer::FrameRingBuffer;
use crate::traits::frame_source::FrameSource;

/// Playback cursor over a frozen recording.
///
/// Owns cloned frame handles, so later writes or clears on the source buffer
/// do not change what this cursor plays.
#[derive(Debug, Clone)]
pub struct LoopPlayback {
    frames: Vec<Frame>,
    sequencer: PalindromeSequencer,
}

impl LoopPlayback {
    pub fn new(frames: Vec<Frame>) -> Result<Self, LooperError> {
        let sequencer = PalindromeSequencer::new(frames.len())?;
        Ok(Self { frames, sequencer })
    }

    pub fn from_buffer(buffer: &FrameRingBuffer) -> Result<Self, LooperError> {
        Self::new(buffer.snapshot())
    }

    pub fn format(&self) -> Option<&FrameFormat> {
        self.frames.first().map(|f| f.format().as_ref())
    }

    pub fn direction(&self) -> Direction {
        self.sequencer.direction()
    }

    pub fn rewind(&mut self) {
        self.sequencer.reset();
    }
}

impl FrameSource for LoopPlayback {
    fn next_frame(&mut self) -> Option<Frame> {
        let index = self.sequencer.advance();
        self.frames.get(index).cloned()
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn buffer_with(count: u64) -> FrameRingBuffer {
        let format = Arc::new(FrameFormat::new(320, 180, "I420"));
        let mut buf = FrameRingBuffer::new(8).unwrap();
        for seq in 0..count {
            buf.write(Frame::new(vec![seq as u8], seq, Arc::clone(&format)));
        }
        buf
    }

    #[test]
    fn plays_palindrome_over_snapshot() {
        let buf = buffer_with(3);
        let mut playback = LoopPlayback::from_buffer(&buf).unwrap();
        let got: Vec<u64> = (0..6)
            .map(|_| playback.next_frame().unwrap().sequence())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 1, 0, 1]);
    }

    #[test]
    fn unaffected_by_buffer_reuse() {
        let mut buf = buffer_with(2);
        let mut playback = LoopPlayback::from_buffer(&buf).unwrap();
        buf.clear();
        buf.write(Frame::new(
            vec![9u8],
            99,
            Arc::new(FrameFormat::new(320, 180, "I420")),
        ));

        assert_eq!(playback.frame_count(), 2);
        assert_eq!(playback.next_frame().unwrap().sequence(), 0);
        assert_eq!(playback.next_frame().unwrap().sequence(), 1);
    }

    #[test]
    fn empty_recording_rejected() {
        let buf = buffer_with(0);
        assert!(LoopPlayback::from_buffer(&buf).is_err());
    }
}
