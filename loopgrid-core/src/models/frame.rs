use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::error::LooperError;

/// Number of recording keys (keys 1–9).
pub const KEY_COUNT: usize = 9;

/// A recording key, always in `1..=KEY_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeyNumber(u8);

impl KeyNumber {
    pub fn new(key: u8) -> Result<Self, LooperError> {
        if key == 0 || key as usize > KEY_COUNT {
            return Err(LooperError::InvalidKey(key));
        }
        Ok(Self(key))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based position in per-key tables.
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    pub fn all() -> impl Iterator<Item = KeyNumber> {
        (1..=KEY_COUNT as u8).map(KeyNumber)
    }
}

impl TryFrom<u8> for KeyNumber {
    type Error = LooperError;

    fn try_from(key: u8) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<KeyNumber> for u8 {
    fn from(key: KeyNumber) -> Self {
        key.0
    }
}

impl fmt::Display for KeyNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {}", self.0)
    }
}

/// Format descriptor negotiated by the capture source. Only recorded, never negotiated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, pixel_format: impl Into<String>) -> Self {
        Self {
            width,
            height,
            pixel_format: pixel_format.into(),
        }
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)
    }
}

/// One captured image. The payload is opaque and shared; cloning a frame clones the handle.
#[derive(Debug, Clone)]
pub struct Frame {
    payload: Arc<[u8]>,
    sequence: u64,
    captured_at: Instant,
    format: Arc<FrameFormat>,
}

impl Frame {
    pub fn new(payload: impl Into<Arc<[u8]>>, sequence: u64, format: Arc<FrameFormat>) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            captured_at: Instant::now(),
            format,
        }
    }

    pub fn with_capture_time(mut self, captured_at: Instant) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn format(&self) -> &Arc<FrameFormat> {
        &self.format
    }

    /// Whether two frames share the same payload allocation.
    pub fn same_payload(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.payload, &other.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_range() {
        assert!(KeyNumber::new(0).is_err());
        assert_eq!(KeyNumber::new(1).unwrap().index(), 0);
        assert_eq!(KeyNumber::new(9).unwrap().index(), 8);
        assert_eq!(KeyNumber::new(10), Err(LooperError::InvalidKey(10)));
        assert_eq!(KeyNumber::all().count(), KEY_COUNT);
    }

    #[test]
    fn cloned_frame_shares_payload() {
        let format = Arc::new(FrameFormat::new(640, 480, "I420"));
        let frame = Frame::new(vec![1u8, 2, 3], 7, format);
        let copy = frame.clone();
        assert!(frame.same_payload(&copy));
        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.format().to_string(), "640x480 I420");
    }
}
