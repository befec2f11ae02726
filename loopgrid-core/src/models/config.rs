use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::LooperError;
use super::grid::GridLayout;

/// What happens to a key's capture branch once its loop has been handed to playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureLifecycle {
    /// Keep the branch wired and clear its buffer for the next press.
    ResetAndReuse,
    /// Detach the branch; the next press attaches a fresh one.
    DetachAndRecreate,
}

/// Configuration for a looper instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Frames held per recording (default: 60, about two seconds at 30 fps).
    pub buffer_capacity: usize,

    /// Number of playback slots in the grid (default: 9).
    pub playback_slots: usize,

    /// Playback cells per grid row; column 0 of each row is the live column (default: 9).
    pub playback_columns: usize,

    /// Cell width in pixels (default: 320).
    pub cell_width_px: u32,

    /// Cell height in pixels (default: 180).
    pub cell_height_px: u32,

    /// Watch requested stage transitions for deadlocks (default: true).
    pub deadlock_detection: bool,

    /// Time a transition may stay pending before it counts as a deadlock (default: 10000).
    pub transition_timeout_ms: u64,

    /// How often the deadlock timer is checked (default: 100).
    pub poll_interval_ms: u64,

    /// Shortest duration reported for a recording (default: 33333, one frame at 30 fps).
    pub min_recording_us: u64,

    /// Capture branch handling after key release (default: reset and reuse).
    pub capture_lifecycle: CaptureLifecycle,

    /// Show the live feed in the key's own cell while it records (default: true).
    pub preview_while_recording: bool,
}

impl LooperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.buffer_capacity == 0 {
            return Err("buffer capacity must be positive".into());
        }
        if self.playback_slots == 0 {
            return Err("at least one playback slot is required".into());
        }
        if self.playback_columns == 0 {
            return Err("playback columns must be positive".into());
        }
        if self.cell_width_px == 0 || self.cell_height_px == 0 {
            return Err(format!(
                "unsupported cell size: {}x{}",
                self.cell_width_px, self.cell_height_px
            ));
        }
        if self.transition_timeout_ms == 0 || self.poll_interval_ms == 0 {
            return Err("transition timeout and poll interval must be positive".into());
        }
        if self.poll_interval_ms > self.transition_timeout_ms {
            return Err(format!(
                "poll interval {} ms exceeds transition timeout {} ms",
                self.poll_interval_ms, self.transition_timeout_ms
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, LooperError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| LooperError::Configuration(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(LooperError::Configuration)?;
        Ok(config)
    }

    pub fn layout(&self) -> GridLayout {
        GridLayout::new(
            self.playback_slots,
            self.playback_columns,
            self.cell_width_px,
            self.cell_height_px,
        )
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_recording(&self) -> Duration {
        Duration::from_micros(self.min_recording_us)
    }
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 60,
            playback_slots: 9,
            playback_columns: 9,
            cell_width_px: 320,
            cell_height_px: 180,
            deadlock_detection: true,
            transition_timeout_ms: 10_000,
            poll_interval_ms: 100,
            min_recording_us: 33_333,
            capture_lifecycle: CaptureLifecycle::ResetAndReuse,
            preview_while_recording: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LooperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transition_timeout(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = LooperConfig {
            buffer_capacity: 0,
            ..LooperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_interval_longer_than_timeout() {
        let config = LooperConfig {
            transition_timeout_ms: 50,
            poll_interval_ms: 100,
            ..LooperConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_fills_missing_fields() {
        let config =
            LooperConfig::from_json(r#"{"playback_slots": 20, "playback_columns": 10}"#).unwrap();
        assert_eq!(config.playback_slots, 20);
        assert_eq!(config.buffer_capacity, 60);
        assert_eq!(config.capture_lifecycle, CaptureLifecycle::ResetAndReuse);
        assert_eq!(config.layout().rows(), 2);
        assert!(config.preview_while_recording);
    }

    #[test]
    fn json_lifecycle_is_snake_case() {
        let config =
            LooperConfig::from_json(r#"{"capture_lifecycle": "detach_and_recreate"}"#).unwrap();
        assert_eq!(config.capture_lifecycle, CaptureLifecycle::DetachAndRecreate);
    }

    #[test]
    fn json_rejects_invalid_values() {
        let err = LooperConfig::from_json(r#"{"playback_slots": 0}"#).unwrap_err();
        assert!(matches!(err, LooperError::Configuration(_)));
    }
}
