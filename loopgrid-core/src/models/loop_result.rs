use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::{FrameFormat, KeyNumber};
use super::grid::SlotIndex;

/// Result returned when a key release hands a recording to playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopResult {
    pub id: String,
    pub key: KeyNumber,
    pub slot: SlotIndex,
    pub frame_count: usize,
    pub duration_secs: f64,
    /// Span between the first and last retained frame's capture time.
    #[serde(default)]
    pub captured_secs: f64,
    /// Whether the slot held an older loop that was replaced.
    pub evicted: bool,
    pub format: Option<FrameFormat>,
    pub created_at: String,
}

impl LoopResult {
    pub fn new(
        key: KeyNumber,
        slot: SlotIndex,
        frame_count: usize,
        duration: Duration,
        evicted: bool,
        format: Option<FrameFormat>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            slot,
            frame_count,
            duration_secs: duration.as_secs_f64(),
            captured_secs: 0.0,
            evicted,
            format,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_captured_span(mut self, span: Duration) -> Self {
        self.captured_secs = span.as_secs_f64();
        self
    }
}

/// Lifecycle counters for debugging a looper instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooperDiagnostics {
    pub capture_attaches: u64,
    pub capture_detaches: u64,
    pub attach_rollbacks: u64,
    pub playback_attaches: u64,
    pub playback_detaches: u64,
    pub slots_evicted: u64,
    pub fallback_releases: u64,
    pub loops_completed: u64,
    pub empty_recordings: u64,
    pub recovery_attempts: u64,
}
