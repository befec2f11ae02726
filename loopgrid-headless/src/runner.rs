use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopgrid_core::{
    CaptureInput, FrameFormat, GraphStage, KeyNumber, LoopResult, Looper, LooperConfig, LooperDelegate, LooperDiagnostics,
    LooperError, MemoryGraph, Occupancy, PollOutcome, ProcessingGraph,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::camera::{synthetic_frame, CameraConfig, SyntheticCamera};
use crate::error::HeadlessError;
use crate::script::{KeyScript, ScriptStep};

const FEED_SEQUENCE_BASE: u64 = 1 << 32;

/// Configuration file layout for the headless runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub looper: LooperConfig,
    pub camera: CameraConfig,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.looper.validate()?;
        self.camera.validate()
    }

    pub fn from_json(json: &str) -> Result<Self, HeadlessError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HeadlessError::Config(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(HeadlessError::Config)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, HeadlessError> {
        let json = std::fs::read_to_string(path).map_err(|source| HeadlessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// Looper event as it appears in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RecordingStarted { key: u8 },
    LoopReady { key: u8, slot: usize, frames: usize },
    Error { message: String },
}

/// Delegate that logs looper events and keeps them for the summary.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<RunEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }
}

impl LooperDelegate for EventLog {
    fn on_recording_started(&self, key: KeyNumber) {
        log::debug!("Key {} recording", key.get());
        self.events
            .lock()
            .push(RunEvent::RecordingStarted { key: key.get() });
    }

    fn on_loop_ready(&self, result: &LoopResult) {
        log::info!(
            "Key {} loop ready: {} frames in slot {}",
            result.key.get(),
            result.frame_count,
            result.slot.get()
        );
        self.events.lock().push(RunEvent::LoopReady {
            key: result.key.get(),
            slot: result.slot.get(),
            frames: result.frame_count,
        });
    }

    fn on_error(&self, error: &LooperError) {
        log::warn!("Looper error: {}", error);
        self.events.lock().push(RunEvent::Error {
            message: error.to_string(),
        });
    }
}

/// Outcome of a scripted run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub loops: Vec<LoopResult>,
    pub events: Vec<RunEvent>,
    /// Playback slots holding a loop when the script finished.
    pub occupied_slots: Vec<usize>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Frames from the camera thread plus scripted feeds.
    pub frames_produced: u64,
    pub frames_delivered: u64,
    /// Rendered cells that carried a frame.
    pub cells_rendered: u64,
    pub final_stage: GraphStage,
    pub diagnostics: LooperDiagnostics,
}

/// Drives a `Looper` over the in-process graph from a key script.
pub struct HeadlessRunner {
    looper: Looper<MemoryGraph>,
    camera_config: CameraConfig,
    events: Arc<EventLog>,
    cells_rendered: u64,
    /// Next sequence number for scripted feeds.
    fed: u64,
}

impl HeadlessRunner {
    pub fn new(config: RunnerConfig) -> Result<Self, HeadlessError> {
        config.validate().map_err(HeadlessError::Config)?;

        let mut looper = Looper::new(MemoryGraph::new(), config.looper)?;
        let events = Arc::new(EventLog::default());
        looper.set_delegate(Arc::clone(&events) as Arc<dyn LooperDelegate>);
        looper.register_recovery_callback(Arc::new(|step: &str, ok: bool| {
            log::warn!("Recovery step '{}' {}", step, if ok { "succeeded" } else { "failed" });
        }));

        Ok(Self {
            looper,
            camera_config: config.camera,
            events,
            cells_rendered: 0,
            fed: 0,
        })
    }

    pub fn looper(&self) -> &Looper<MemoryGraph> {
        &self.looper
    }

    /// Play the script start to finish and tear the graph down.
    pub fn run(mut self, script: &KeyScript) -> Result<RunSummary, HeadlessError> {
        self.looper.request_graph_transition(GraphStage::Active)?;
        let input = self.looper.graph().capture_input();
        let mut camera = if self.camera_config.enabled {
            Some(SyntheticCamera::start(input.clone(), &self.camera_config)?)
        } else {
            log::info!("Synthetic camera disabled; frames come from feed steps only");
            None
        };

        let mut loops = Vec::new();
        let played = self.play(script, &input, &mut loops);
        let frames_produced = camera.as_mut().map_or(0, SyntheticCamera::stop) + self.fed;
        played?;

        let layout = *self.looper.layout();
        let occupied_slots = self
            .looper
            .manager()
            .grid()
            .slots()
            .iter()
            .filter(|slot| slot.occupancy() == Occupancy::Playback)
            .map(|slot| slot.index().get())
            .collect();
        let final_stage = self.looper.graph().stage();

        self.looper.shutdown()?;
        let (canvas_width, canvas_height) = layout.canvas_size();

        Ok(RunSummary {
            loops,
            events: self.events.events(),
            occupied_slots,
            canvas_width,
            canvas_height,
            frames_produced,
            frames_delivered: input.delivered(),
            cells_rendered: self.cells_rendered,
            final_stage,
            diagnostics: self.looper.diagnostics(),
        })
    }

    fn play(
        &mut self,
        script: &KeyScript,
        input: &CaptureInput,
        loops: &mut Vec<LoopResult>,
    ) -> Result<(), HeadlessError> {
        let format = self.camera_config.format();
        for step in script.steps() {
            match *step {
                ScriptStep::Down(key) => self.looper.on_key_down(key)?,
                ScriptStep::Up(key) => {
                    if let Some(result) = self.looper.on_key_up(key)? {
                        loops.push(result);
                    }
                }
                ScriptStep::Wait(duration) => self.wait(duration)?,
                ScriptStep::Feed(count) => self.feed(input, &format, count),
                ScriptStep::Render(count) => self.render(count),
                ScriptStep::Stage(stage) => {
                    self.looper.request_graph_transition(stage)?;
                }
            }
        }
        Ok(())
    }

    /// Sleep in poll-sized slices so pending transitions keep being checked.
    fn wait(&mut self, duration: Duration) -> Result<(), HeadlessError> {
        let deadline = Instant::now() + duration;
        let slice = self.looper.config().poll_interval();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            if let PollOutcome::Recovered(step) = self.looper.poll_at(now)? {
                log::warn!("Graph recovered via {}", step);
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    /// Deliver frames on the calling thread, so every one lands before the next step.
    fn feed(&mut self, input: &CaptureInput, format: &Arc<FrameFormat>, count: u32) {
        for _ in 0..count {
            // Offset keeps fed sequences apart from the camera's.
            input.deliver(&synthetic_frame(FEED_SEQUENCE_BASE + self.fed, format));
            self.fed += 1;
        }
    }

    fn render(&mut self, count: u32) {
        for _ in 0..count {
            let cells = self.looper.graph_mut().render_tick();
            self.cells_rendered += cells.iter().filter(|cell| cell.frame.is_some()).count() as u64;
        }
    }
}
