use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use loopgrid_core::{CaptureInput, Frame, FrameFormat};
use serde::{Deserialize, Serialize};

use crate::error::HeadlessError;

/// Synthetic capture source settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame width (default: 640).
    pub width: u32,

    /// Frame height (default: 360).
    pub height: u32,

    /// Pixel format label (default: "I420").
    pub pixel_format: String,

    /// Frames per second (default: 30).
    pub fps: u32,

    /// Run the capture thread; scripts can still `feed` frames when off (default: true).
    pub enabled: bool,
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("unsupported frame size: {}x{}", self.width, self.height));
        }
        if self.fps == 0 || self.fps > 240 {
            return Err(format!("unsupported frame rate: {}", self.fps));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn format(&self) -> Arc<FrameFormat> {
        Arc::new(FrameFormat::new(
            self.width,
            self.height,
            self.pixel_format.clone(),
        ))
    }
}

/// Numbered test-pattern frame.
pub fn synthetic_frame(sequence: u64, format: &Arc<FrameFormat>) -> Frame {
    // Payload only needs to be distinguishable per frame.
    Frame::new(sequence.to_le_bytes().to_vec(), sequence, Arc::clone(format))
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            pixel_format: "I420".into(),
            fps: 30,
            enabled: true,
        }
    }
}

/// Produces numbered frames on its own thread, standing in for a camera
/// feeding the graph's distribution node.
pub struct SyntheticCamera {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<u64>>,
}

impl SyntheticCamera {
    pub fn start(input: CaptureInput, config: &CameraConfig) -> Result<Self, HeadlessError> {
        config.validate().map_err(HeadlessError::Config)?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let format = config.format();
        let interval = config.frame_interval();

        let handle = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let mut sequence = 0u64;
                while thread_running.load(Ordering::SeqCst) {
                    input.deliver(&synthetic_frame(sequence, &format));
                    sequence += 1;
                    thread::sleep(interval);
                }
                sequence
            })
            .map_err(|e| HeadlessError::Camera(e.to_string()))?;

        log::info!(
            "Synthetic camera started: {}x{} {} @ {} fps",
            config.width,
            config.height,
            config.pixel_format,
            config.fps
        );
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the capture thread. Returns the number of frames produced.
    pub fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.join() {
            Ok(frames) => {
                log::info!("Synthetic camera stopped after {} frames", frames);
                frames
            }
            Err(_) => {
                log::error!("Synthetic camera thread panicked");
                0
            }
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use loopgrid_core::{GraphStage, MemoryGraph, ProcessingGraph};

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CameraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_secs_f64(1.0 / 30.0));
    }

    #[test]
    fn rejects_zero_fps() {
        let config = CameraConfig {
            fps: 0,
            ..CameraConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn synthetic_frames_are_distinct() {
        let format = CameraConfig::default().format();
        let a = synthetic_frame(1, &format);
        let b = synthetic_frame(2, &format);
        assert_eq!(a.sequence(), 1);
        assert_eq!(a.format().width, 640);
        assert_ne!(a.payload(), b.payload());
    }

    #[test]
    fn produces_frames_until_stopped() {
        let mut graph = MemoryGraph::new();
        graph.set_stage(GraphStage::Active);
        let input = graph.capture_input();

        let config = CameraConfig {
            fps: 200,
            ..CameraConfig::default()
        };
        let mut camera = SyntheticCamera::start(input.clone(), &config).unwrap();
        thread::sleep(Duration::from_millis(50));
        let produced = camera.stop();

        assert!(produced > 0);
        assert_eq!(input.delivered(), produced);
        assert_eq!(camera.stop(), 0);
    }
}
