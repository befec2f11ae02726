use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::error::LooperError;
use crate::models::frame::{Frame, FrameFormat, KeyNumber, KEY_COUNT};
use crate::processing::ring_buffer::FrameRingBuffer;

/// Capture session bound to one recording key.
///
/// `is_recording` is the cutover point between the control thread and the
/// streaming context: frames are stored only while it is set. A frame that
/// races with `stop()` may still land; nothing after that does.
#[derive(Debug)]
pub struct RecordingSession {
    id: Uuid,
    key: KeyNumber,
    buffer: Mutex<FrameRingBuffer>,
    is_recording: AtomicBool,
}

impl RecordingSession {
    pub fn new(key: KeyNumber, capacity: usize) -> Result<Self, LooperError> {
        Ok(Self {
            id: Uuid::new_v4(),
            key,
            buffer: Mutex::new(FrameRingBuffer::new(capacity)?),
            is_recording: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> KeyNumber {
        self.key
    }

    pub fn start(&self) {
        if !self.is_recording.swap(true, Ordering::AcqRel) {
            log::debug!("Recording started for {}", self.key);
        }
    }

    pub fn stop(&self) {
        if self.is_recording.swap(false, Ordering::AcqRel) {
            log::debug!("Recording stopped for {}", self.key);
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::Acquire)
    }

    /// Clear buffered frames. Recording state is left alone.
    pub fn reset(&self) {
        self.buffer.lock().clear();
    }

    /// Store a delivered frame if the session is recording.
    ///
    /// Returns whether the frame was kept.
    pub fn ingest(&self, frame: &Frame) -> bool {
        if !self.is_recording() {
            return false;
        }

        let mut buffer = self.buffer.lock();
        if buffer.format().is_none() {
            log::info!("{} captured first frame: {}", self.key, frame.format());
        }
        buffer.write(frame.clone());
        true
    }

    pub fn frame_count(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn format(&self) -> Option<FrameFormat> {
        self.buffer.lock().format().cloned()
    }

    pub fn snapshot(&self) -> Vec<Frame> {
        self.buffer.lock().snapshot()
    }

    /// Capture-time span of the buffered frames.
    pub fn duration(&self) -> Duration {
        self.buffer.lock().duration()
    }

    pub fn overflow_count(&self) -> u64 {
        self.buffer.lock().overflow_count()
    }
}

/// Fixed table of recording sessions, one slot per key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: [Option<Arc<RecordingSession>>; KEY_COUNT],
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        key: KeyNumber,
        capacity: usize,
    ) -> Result<Arc<RecordingSession>, LooperError> {
        let slot = &mut self.sessions[key.index()];
        if slot.is_some() {
            return Err(LooperError::DuplicateSession(key.get()));
        }

        let session = Arc::new(RecordingSession::new(key, capacity)?);
        log::debug!(
            "Session {} created for {} (capacity={})",
            session.id(),
            key,
            capacity
        );
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn get(&self, key: KeyNumber) -> Option<&Arc<RecordingSession>> {
        self.sessions[key.index()].as_ref()
    }

    /// Stop and drop the session for `key`. Absent keys are a no-op.
    ///
    /// The buffer is released once the last handle (including any hook's
    /// upgraded reference) goes away.
    pub fn destroy(&mut self, key: KeyNumber) {
        if let Some(session) = self.sessions[key.index()].take() {
            session.stop();
            log::debug!("Session {} destroyed for {}", session.id(), key);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<KeyNumber> {
        KeyNumber::all()
            .filter(|key| self.sessions[key.index()].is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> KeyNumber {
        KeyNumber::new(n).unwrap()
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            vec![0u8; 4],
            sequence,
            Arc::new(FrameFormat::new(640, 360, "RGBA")),
        )
    }

    #[test]
    fn ingest_only_while_recording() {
        let session = RecordingSession::new(key(1), 10).unwrap();
        assert!(!session.ingest(&frame(0)));

        session.start();
        assert!(session.ingest(&frame(1)));
        session.stop();
        assert!(!session.ingest(&frame(2)));

        assert_eq!(session.frame_count(), 1);
        assert_eq!(session.snapshot()[0].sequence(), 1);
        assert_eq!(session.format().unwrap().width, 640);
    }

    #[test]
    fn start_stop_idempotent() {
        let session = RecordingSession::new(key(2), 4).unwrap();
        session.start();
        session.start();
        assert!(session.is_recording());
        session.stop();
        session.stop();
        assert!(!session.is_recording());
    }

    #[test]
    fn reset_keeps_recording_flag() {
        let session = RecordingSession::new(key(3), 4).unwrap();
        session.start();
        session.ingest(&frame(0));
        session.reset();
        assert!(session.is_recording());
        assert_eq!(session.frame_count(), 0);
    }

    #[test]
    fn duplicate_create_rejected() {
        let mut registry = SessionRegistry::new();
        registry.create(key(4), 8).unwrap();
        assert_eq!(
            registry.create(key(4), 8).unwrap_err(),
            LooperError::DuplicateSession(4)
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn zero_capacity_leaves_slot_free() {
        let mut registry = SessionRegistry::new();
        assert!(matches!(
            registry.create(key(5), 0),
            Err(LooperError::Allocation(_))
        ));
        assert!(registry.get(key(5)).is_none());
    }

    #[test]
    fn destroy_stops_and_frees() {
        let mut registry = SessionRegistry::new();
        let session = registry.create(key(6), 8).unwrap();
        session.start();

        registry.destroy(key(6));
        assert!(!session.is_recording());
        assert!(registry.get(key(6)).is_none());

        // absent key
        registry.destroy(key(6));
        assert!(registry.is_empty());
    }

    #[test]
    fn recreated_session_starts_empty() {
        let mut registry = SessionRegistry::new();
        let first = registry.create(key(7), 8).unwrap();
        first.start();
        first.ingest(&frame(0));
        registry.destroy(key(7));

        let second = registry.create(key(7), 8).unwrap();
        assert_eq!(second.frame_count(), 0);
        assert_ne!(first.id(), second.id());
        assert_eq!(registry.keys(), vec![key(7)]);
    }
}
