use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::graph::lifecycle::BranchManager;
use crate::models::config::{CaptureLifecycle, LooperConfig};
use crate::models::error::LooperError;
use crate::models::frame::{Frame, FrameFormat, KeyNumber, KEY_COUNT};
use crate::models::grid::{GridLayout, SlotIndex};
use crate::models::loop_result::{LoopResult, LooperDiagnostics};
use crate::models::stage::GraphStage;
use crate::processing::playback::LoopPlayback;
use crate::supervisor::recovery::RecoveryCallback;
use crate::supervisor::transition::{ErrorCallback, PollOutcome, TransitionOutcome};
use crate::traits::looper_delegate::LooperDelegate;
use crate::traits::processing_graph::ProcessingGraph;

/// Key-driven looper.
///
/// Holding a key records into that key's ring buffer; releasing it freezes the
/// recording and plays it as a palindrome loop in the next grid slot.
///
/// ```text
/// key down → [attach or reset capture branch] → start recording → [live preview]
/// key up   → stop → [drop preview] → snapshot → [assign slot] → [evict]
///          → [attach playback] → [reset or detach capture]
/// ```
///
/// All calls come from one control thread. Frames arrive on the graph's
/// streaming context through the capture hooks.
pub struct Looper<G: ProcessingGraph> {
    manager: BranchManager<G>,
    config: LooperConfig,
    /// Press time of every key currently recording.
    pressed: [Option<Instant>; KEY_COUNT],
    /// Cell showing the live feed for each recording key.
    previews: [Option<SlotIndex>; KEY_COUNT],
    delegate: Option<Arc<dyn LooperDelegate>>,
}

impl<G: ProcessingGraph> Looper<G> {
    pub fn new(graph: G, config: LooperConfig) -> Result<Self, LooperError> {
        let manager = BranchManager::new(graph, &config)?;
        log::info!(
            "Looper ready: {} playback slots, {} frames per recording, {:?}",
            config.playback_slots,
            config.buffer_capacity,
            config.capture_lifecycle
        );
        Ok(Self {
            manager,
            config,
            pressed: [None; KEY_COUNT],
            previews: [None; KEY_COUNT],
            delegate: None,
        })
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn LooperDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn on_key_down(&mut self, key: u8) -> Result<(), LooperError> {
        self.on_key_down_at(key, Instant::now())
    }

    /// Start recording on `key`. A repeat press while recording is ignored.
    pub fn on_key_down_at(&mut self, key: u8, now: Instant) -> Result<(), LooperError> {
        let result = self.key_down(key, now);
        self.report(result)
    }

    fn key_down(&mut self, key: u8, now: Instant) -> Result<(), LooperError> {
        let key = KeyNumber::new(key)?;
        if self.pressed[key.index()].is_some() {
            log::debug!("{} already recording", key);
            return Ok(());
        }

        let session = match self.manager.session(key) {
            Some(session) => {
                session.reset();
                Arc::clone(session)
            }
            None => self.manager.attach_capture_branch(key)?,
        };
        session.start();
        self.pressed[key.index()] = Some(now);
        if self.config.preview_while_recording {
            self.show_preview(key);
        }

        log::info!("Recording started on {}", key);
        if let Some(ref delegate) = self.delegate {
            delegate.on_recording_started(key);
        }
        Ok(())
    }

    pub fn on_key_up(&mut self, key: u8) -> Result<Option<LoopResult>, LooperError> {
        self.on_key_up_at(key, Instant::now())
    }

    /// Stop recording on `key` and hand the recording to the next playback slot.
    ///
    /// Returns `None` if the key was not recording or nothing was captured.
    /// The capture branch is reset or detached either way.
    pub fn on_key_up_at(
        &mut self,
        key: u8,
        now: Instant,
    ) -> Result<Option<LoopResult>, LooperError> {
        let result = self.key_up(key, now);
        self.report(result)
    }

    fn key_up(&mut self, key: u8, now: Instant) -> Result<Option<LoopResult>, LooperError> {
        let key = KeyNumber::new(key)?;
        let Some(started) = self.pressed[key.index()].take() else {
            log::debug!("{} released without recording", key);
            return Ok(None);
        };
        let Some(session) = self.manager.session(key).cloned() else {
            log::warn!("{} released but its session is gone", key);
            return Ok(None);
        };

        session.stop();
        self.hide_preview(key);
        let duration = now
            .saturating_duration_since(started)
            .max(self.config.min_recording());
        let frames = session.snapshot();
        let format = session.format();
        let captured = session.duration();
        if session.overflow_count() > 0 {
            log::debug!(
                "{} overflowed {} times; keeping the last {} frames",
                key,
                session.overflow_count(),
                frames.len()
            );
        }

        let handoff = if frames.is_empty() {
            log::warn!("{} released with no frames captured", key);
            self.manager.diagnostics_mut().empty_recordings += 1;
            Ok(None)
        } else {
            self.hand_off(key, frames, duration, format)
                .map(|result| Some(result.with_captured_span(captured)))
        };
        let released = self.release_capture(key);

        let result = handoff?;
        if let Err(e) = released {
            // The loop is already playing; keep it and surface the leak.
            log::warn!("{} capture branch not released cleanly: {}", key, e);
            if let Some(ref delegate) = self.delegate {
                delegate.on_error(&e);
            }
        }

        if let Some(ref loop_result) = result {
            log::info!(
                "Loop from {} playing in {} ({} frames, {:.2}s)",
                key,
                loop_result.slot,
                loop_result.frame_count,
                loop_result.duration_secs
            );
            if let Some(ref delegate) = self.delegate {
                delegate.on_loop_ready(loop_result);
            }
        }
        Ok(result)
    }

    fn hand_off(
        &mut self,
        key: KeyNumber,
        frames: Vec<Frame>,
        duration: Duration,
        format: Option<FrameFormat>,
    ) -> Result<LoopResult, LooperError> {
        let frame_count = frames.len();
        let playback = LoopPlayback::new(frames)?;
        let slot = self.manager.assign_next_slot()?;
        let evicted = self.manager.replace_playback(slot, Box::new(playback))?;
        self.manager.diagnostics_mut().loops_completed += 1;
        Ok(LoopResult::new(
            key,
            slot,
            frame_count,
            duration,
            evicted,
            format,
        ))
    }

    /// Mirror the live feed into the key's own cell while it records.
    ///
    /// Skipped when the cell already holds something. Failure only costs the
    /// preview; recording goes on.
    fn show_preview(&mut self, key: KeyNumber) {
        let Ok(slot) = self.manager.layout().playback_slot(key.index()) else {
            return;
        };
        match self.manager.connect_live_preview(slot) {
            Ok(true) => self.previews[key.index()] = Some(slot),
            Ok(false) => {}
            Err(e) => log::warn!("No live preview for {}: {}", key, e),
        }
    }

    fn hide_preview(&mut self, key: KeyNumber) {
        let Some(slot) = self.previews[key.index()].take() else {
            return;
        };
        if let Err(e) = self.manager.disconnect_live_preview(slot) {
            log::warn!("Live preview in {} not torn down cleanly: {}", slot, e);
        }
    }

    fn release_capture(&mut self, key: KeyNumber) -> Result<(), LooperError> {
        match self.config.capture_lifecycle {
            CaptureLifecycle::ResetAndReuse => {
                self.manager.reset_capture(key);
                Ok(())
            }
            CaptureLifecycle::DetachAndRecreate => self.manager.detach_capture_branch(key),
        }
    }

    pub fn is_recording(&self, key: u8) -> bool {
        KeyNumber::new(key).is_ok_and(|key| self.pressed[key.index()].is_some())
    }

    pub fn request_graph_transition(
        &mut self,
        target: GraphStage,
    ) -> Result<TransitionOutcome, LooperError> {
        let result = self.manager.request_transition(target);
        self.report(result)
    }

    /// Drive the deadlock timer. Call from the control loop's tick.
    pub fn poll(&mut self) -> Result<PollOutcome, LooperError> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Result<PollOutcome, LooperError> {
        let result = self.manager.poll_at(now);
        if let Ok(PollOutcome::Recovered(_)) = result {
            if let (Some(delegate), Some(info)) =
                (&self.delegate, self.manager.supervisor().last_error())
            {
                delegate.on_error(&info.to_error());
            }
        }
        self.report(result)
    }

    /// Register the graph error callback. Replaces any earlier registration.
    pub fn register_error_callback(&mut self, callback: ErrorCallback) {
        self.manager.supervisor_mut().register_error_callback(callback);
    }

    /// Register the recovery callback. Replaces any earlier registration.
    pub fn register_recovery_callback(&mut self, callback: RecoveryCallback) {
        self.manager
            .supervisor_mut()
            .register_recovery_callback(callback);
    }

    pub fn diagnostics(&self) -> LooperDiagnostics {
        self.manager.diagnostics()
    }

    pub fn layout(&self) -> &GridLayout {
        self.manager.layout()
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    pub fn manager(&self) -> &BranchManager<G> {
        &self.manager
    }

    pub fn graph(&self) -> &G {
        self.manager.graph()
    }

    pub fn graph_mut(&mut self) -> &mut G {
        self.manager.graph_mut()
    }

    /// Stop all recordings and tear the graph down.
    pub fn shutdown(&mut self) -> Result<(), LooperError> {
        self.pressed = [None; KEY_COUNT];
        self.previews = [None; KEY_COUNT];
        let result = self.manager.shutdown();
        self.report(result)
    }

    fn report<T>(&self, result: Result<T, LooperError>) -> Result<T, LooperError> {
        if let Err(ref e) = result {
            log::error!("Looper operation failed: {}", e);
            if let Some(ref delegate) = self.delegate {
                delegate.on_error(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::graph::compositor::Occupancy;
    use crate::graph::memory::MemoryGraph;
    use crate::traits::processing_graph::PointKind;

    #[derive(Default)]
    struct RecordingDelegate {
        started: Mutex<Vec<KeyNumber>>,
        ready: Mutex<Vec<LoopResult>>,
        errors: Mutex<Vec<LooperError>>,
    }

    impl LooperDelegate for RecordingDelegate {
        fn on_recording_started(&self, key: KeyNumber) {
            self.started.lock().push(key);
        }

        fn on_loop_ready(&self, result: &LoopResult) {
            self.ready.lock().push(result.clone());
        }

        fn on_error(&self, error: &LooperError) {
            self.errors.lock().push(error.clone());
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            vec![sequence as u8; 4],
            sequence,
            Arc::new(FrameFormat::new(640, 360, "I420")),
        )
    }

    fn running_looper(config: LooperConfig) -> Looper<MemoryGraph> {
        let mut looper = Looper::new(MemoryGraph::new(), config).unwrap();
        looper.request_graph_transition(GraphStage::Active).unwrap();
        looper
    }

    fn record(looper: &mut Looper<MemoryGraph>, key: u8, frames: u64) -> Option<LoopResult> {
        let input = looper.graph().capture_input();
        looper.on_key_down(key).unwrap();
        for seq in 0..frames {
            input.deliver(&frame(seq));
        }
        looper.on_key_up(key).unwrap()
    }

    #[test]
    fn press_and_release_produces_loop() {
        let mut looper = running_looper(LooperConfig::default());
        let result = record(&mut looper, 1, 5).unwrap();

        assert_eq!(result.slot, SlotIndex(1));
        assert_eq!(result.frame_count, 5);
        assert!(!result.evicted);
        assert_eq!(result.format.unwrap().width, 640);
        assert_eq!(
            looper
                .manager()
                .grid()
                .slot(SlotIndex(1))
                .unwrap()
                .occupancy(),
            Occupancy::Playback
        );
        assert_eq!(looper.diagnostics().loops_completed, 1);
    }

    #[test]
    fn duration_clamped_to_minimum() {
        let mut looper = running_looper(LooperConfig::default());
        let input = looper.graph().capture_input();
        let t0 = Instant::now();

        looper.on_key_down_at(2, t0).unwrap();
        input.deliver(&frame(0));
        let short = looper.on_key_up_at(2, t0).unwrap().unwrap();
        approx::assert_relative_eq!(short.duration_secs, 0.033333, epsilon = 1e-9);

        looper.on_key_down_at(2, t0).unwrap();
        input.deliver(&frame(1));
        let long = looper
            .on_key_up_at(2, t0 + Duration::from_millis(1500))
            .unwrap()
            .unwrap();
        approx::assert_relative_eq!(long.duration_secs, 1.5, epsilon = 1e-9);
    }

    #[test]
    fn release_without_frames_returns_none() {
        let mut looper = running_looper(LooperConfig::default());
        assert!(record(&mut looper, 3, 0).is_none());
        assert_eq!(looper.diagnostics().empty_recordings, 1);
        assert!(looper.manager().grid().occupied_playback().is_empty());
    }

    #[test]
    fn release_without_press_returns_none() {
        let mut looper = running_looper(LooperConfig::default());
        assert!(looper.on_key_up(4).unwrap().is_none());
    }

    #[test]
    fn repeat_press_is_ignored() {
        let mut looper = running_looper(LooperConfig::default());
        let delegate = Arc::new(RecordingDelegate::default());
        looper.set_delegate(delegate.clone());
        let input = looper.graph().capture_input();

        looper.on_key_down(5).unwrap();
        input.deliver(&frame(0));
        looper.on_key_down(5).unwrap();
        input.deliver(&frame(1));

        assert!(looper.is_recording(5));
        assert_eq!(delegate.started.lock().len(), 1);
        let result = looper.on_key_up(5).unwrap().unwrap();
        assert_eq!(result.frame_count, 2);
    }

    #[test]
    fn reuse_keeps_branch_and_starts_empty() {
        let mut looper = running_looper(LooperConfig::default());
        record(&mut looper, 6, 4).unwrap();

        let key = KeyNumber::new(6).unwrap();
        assert!(looper.manager().is_capture_attached(key));
        assert_eq!(looper.manager().session(key).unwrap().frame_count(), 0);

        let second = record(&mut looper, 6, 2).unwrap();
        assert_eq!(second.frame_count, 2);
        assert_eq!(second.slot, SlotIndex(2));
        assert_eq!(looper.diagnostics().capture_attaches, 1);
    }

    #[test]
    fn detach_mode_recreates_branch() {
        let config = LooperConfig {
            capture_lifecycle: CaptureLifecycle::DetachAndRecreate,
            ..LooperConfig::default()
        };
        let mut looper = running_looper(config);
        record(&mut looper, 7, 3).unwrap();

        let key = KeyNumber::new(7).unwrap();
        assert!(!looper.manager().is_capture_attached(key));
        record(&mut looper, 7, 1).unwrap();
        let diagnostics = looper.diagnostics();
        assert_eq!(diagnostics.capture_attaches, 2);
        assert_eq!(diagnostics.capture_detaches, 2);
    }

    fn occupancy(looper: &Looper<MemoryGraph>, slot: usize) -> Occupancy {
        looper
            .manager()
            .grid()
            .slot(SlotIndex(slot))
            .map(|entry| entry.occupancy())
            .unwrap_or(Occupancy::Empty)
    }

    #[test]
    fn recording_key_shows_live_preview() {
        let mut looper = running_looper(LooperConfig::default());
        let input = looper.graph().capture_input();

        looper.on_key_down(4).unwrap();
        assert_eq!(occupancy(&looper, 4), Occupancy::LivePreview);
        input.deliver(&frame(0));
        input.deliver(&frame(1));

        let result = looper.on_key_up(4).unwrap().unwrap();
        assert_eq!(result.slot, SlotIndex(1));
        assert_eq!(occupancy(&looper, 4), Occupancy::Empty);
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);
        assert_eq!(looper.graph().allocated_points(PointKind::Distribution), 2);
        assert_eq!(looper.diagnostics().slots_evicted, 0);
    }

    #[test]
    fn preview_skips_occupied_cell() {
        let mut looper = running_looper(LooperConfig::default());
        record(&mut looper, 1, 2).unwrap();

        looper.on_key_down(1).unwrap();
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);
        assert!(looper.on_key_up(1).unwrap().is_none());
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);
    }

    #[test]
    fn loop_lands_on_held_preview() {
        let mut looper = running_looper(LooperConfig::default());
        let input = looper.graph().capture_input();

        // key 1 previews in slot 1, which key 2's loop is about to take
        looper.on_key_down(1).unwrap();
        let second = record(&mut looper, 2, 3).unwrap();
        assert_eq!(second.slot, SlotIndex(1));
        assert!(!second.evicted);
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);

        input.deliver(&frame(9));
        let first = looper.on_key_up(1).unwrap().unwrap();
        assert_eq!(first.slot, SlotIndex(2));
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);
        assert_eq!(looper.diagnostics().slots_evicted, 0);
    }

    #[test]
    fn preview_can_be_disabled() {
        let config = LooperConfig {
            preview_while_recording: false,
            ..LooperConfig::default()
        };
        let mut looper = running_looper(config);
        looper.on_key_down(5).unwrap();
        assert_eq!(occupancy(&looper, 5), Occupancy::Empty);
    }

    #[test]
    fn failed_preview_keeps_recording() {
        let mut looper = running_looper(LooperConfig::default());
        let input = looper.graph().capture_input();
        // capture branch is attached before the preview asks for its point
        looper.on_key_down(6).unwrap();
        looper.on_key_up(6).unwrap();
        looper.graph_mut().fail_distribution_requests();

        looper.on_key_down(6).unwrap();
        assert!(looper.is_recording(6));
        assert_eq!(occupancy(&looper, 6), Occupancy::Empty);
        input.deliver(&frame(0));
        looper.graph_mut().clear_faults();

        let result = looper.on_key_up(6).unwrap().unwrap();
        assert_eq!(result.frame_count, 1);
    }

    #[test]
    fn captured_span_from_frame_times() {
        let mut looper = running_looper(LooperConfig::default());
        let input = looper.graph().capture_input();
        let t0 = Instant::now();

        looper.on_key_down(3).unwrap();
        for seq in 0..3 {
            input.deliver(&frame(seq).with_capture_time(t0 + Duration::from_millis(50 * seq)));
        }
        let result = looper.on_key_up(3).unwrap().unwrap();
        approx::assert_relative_eq!(result.captured_secs, 0.1, epsilon = 1e-9);
    }

    #[test]
    fn failed_capture_release_keeps_loop() {
        let config = LooperConfig {
            capture_lifecycle: CaptureLifecycle::DetachAndRecreate,
            preview_while_recording: false,
            ..LooperConfig::default()
        };
        let mut looper = running_looper(config);
        let delegate = Arc::new(RecordingDelegate::default());
        looper.set_delegate(delegate.clone());
        let input = looper.graph().capture_input();

        looper.on_key_down(2).unwrap();
        input.deliver(&frame(0));
        input.deliver(&frame(1));
        // Idle graph: the playback attach skips node stages, the capture detach does not.
        looper.request_graph_transition(GraphStage::Idle).unwrap();
        looper.graph_mut().fail_node_stages();

        let result = looper.on_key_up(2).unwrap().unwrap();
        assert_eq!(result.frame_count, 2);
        assert_eq!(occupancy(&looper, 1), Occupancy::Playback);
        assert_eq!(delegate.ready.lock().as_slice(), &[result]);
        assert!(!delegate.errors.lock().is_empty());
    }

    #[test]
    fn tenth_loop_reuses_first_slot() {
        let mut looper = running_looper(LooperConfig::default());
        let mut slots = Vec::new();
        for i in 0..10u8 {
            let key = i % 9 + 1;
            let result = record(&mut looper, key, 2).unwrap();
            slots.push((result.slot.get(), result.evicted));
        }

        assert_eq!(slots[0], (1, false));
        assert_eq!(slots[8], (9, false));
        assert_eq!(slots[9], (1, true));
        assert_eq!(looper.diagnostics().slots_evicted, 1);
    }

    #[test]
    fn invalid_key_reports_error() {
        let mut looper = running_looper(LooperConfig::default());
        let delegate = Arc::new(RecordingDelegate::default());
        looper.set_delegate(delegate.clone());

        assert_eq!(
            looper.on_key_down(0).unwrap_err(),
            LooperError::InvalidKey(0)
        );
        assert_eq!(delegate.errors.lock().as_slice(), &[LooperError::InvalidKey(0)]);
    }

    #[test]
    fn delegate_sees_loop_ready() {
        let mut looper = running_looper(LooperConfig::default());
        let delegate = Arc::new(RecordingDelegate::default());
        looper.set_delegate(delegate.clone());

        let result = record(&mut looper, 8, 3).unwrap();
        assert_eq!(delegate.started.lock().as_slice(), &[KeyNumber::new(8).unwrap()]);
        assert_eq!(delegate.ready.lock().as_slice(), &[result]);
    }

    #[test]
    fn deadlock_reported_to_delegate() {
        let mut looper = Looper::new(MemoryGraph::new(), LooperConfig::default()).unwrap();
        let delegate = Arc::new(RecordingDelegate::default());
        looper.set_delegate(delegate.clone());

        looper.graph_mut().defer_stage(GraphStage::Active);
        let outcome = looper.request_graph_transition(GraphStage::Active).unwrap();
        assert_eq!(outcome, TransitionOutcome::Pending);

        let started = looper.manager().supervisor().tracked().unwrap().started_at;
        let outcome = looper
            .poll_at(started + Duration::from_secs(11))
            .unwrap();
        assert!(matches!(outcome, PollOutcome::Recovered(_)));
        assert!(matches!(
            delegate.errors.lock()[0],
            LooperError::DeadlockDetected {
                target: GraphStage::Active,
                ..
            }
        ));
        assert_eq!(looper.diagnostics().recovery_attempts, 1);
    }
}
