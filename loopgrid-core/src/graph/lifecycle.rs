use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::graph::binding::Binding;
use crate::graph::compositor::{CompositorGrid, Occupancy, SlotWiring};
use crate::models::config::LooperConfig;
use crate::models::error::LooperError;
use crate::models::frame::{Frame, KeyNumber, KEY_COUNT};
use crate::models::grid::{GridLayout, SlotIndex};
use crate::models::loop_result::LooperDiagnostics;
use crate::models::stage::GraphStage;
use crate::session::recording::{RecordingSession, SessionRegistry};
use crate::supervisor::transition::{PollOutcome, StateTransitionSupervisor, TransitionOutcome};
use crate::traits::frame_source::FrameSource;
use crate::traits::processing_graph::{
    FrameHook, HookId, NodeId, NodeKind, PointId, PointKind, ProcessingGraph,
};

/// Graph resources held by one branch, in the order they were acquired.
///
/// Used both while a branch is being built (so a failure can unwind exactly
/// what was taken) and for tearing down a committed branch.
#[derive(Debug, Default)]
struct BranchParts {
    nodes: Vec<NodeId>,
    /// Distribution point feeding the first node.
    feed: Binding<PointId, PointId>,
    /// Compositor point fed by the last node. Pre-allocated, so only unlinked.
    output: Option<PointId>,
    hook: Option<(HookId, Arc<AtomicBool>)>,
}

impl BranchParts {
    /// Release everything in teardown order: feed, output, hook, nodes.
    ///
    /// Keeps going past failures and returns the first one.
    fn unwind<G: ProcessingGraph + ?Sized>(self, graph: &mut G) -> Result<(), LooperError> {
        let mut first_error = None;
        let mut note = |result: Result<(), LooperError>| {
            if let Err(e) = result {
                log::warn!("Branch teardown step failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        match self.feed {
            // Unlink before release; a released point must not stay linked.
            Binding::Wired(point) => {
                note(graph.unlink_point(point));
                note(graph.release_point(point));
            }
            Binding::Reserved(point) => note(graph.release_point(point)),
            Binding::Vacant => {}
        }
        if let Some(point) = self.output {
            note(graph.unlink_point(point));
        }
        if let Some((hook, live)) = self.hook {
            live.store(false, Ordering::Release);
            graph.remove_hook(hook);
        }
        for node in self.nodes.into_iter().rev() {
            note(graph.remove_node(node));
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct CaptureBranch {
    session: Arc<RecordingSession>,
    parts: BranchParts,
}

/// Keeps the shared processing graph consistent while capture and playback
/// branches come and go.
///
/// Every attach is all-or-nothing: a failure part way through releases what
/// the call acquired before returning. Every detach stops recording first,
/// idles the branch, then unlinks before releasing.
///
/// ```text
///                    ┌→ [live format] ──────────────→ compositor slot 0
/// capture → [dist] ──┼→ [queue] → [format] → [discard]   (per key, hooked)
///                    └→ ...
/// [loop source] → [format] ───────────────────────→ compositor slot 1..=N
/// ```
pub struct BranchManager<G: ProcessingGraph> {
    graph: G,
    layout: GridLayout,
    buffer_capacity: usize,
    registry: SessionRegistry,
    captures: [Option<CaptureBranch>; KEY_COUNT],
    grid: CompositorGrid,
    next_slot: usize,
    supervisor: StateTransitionSupervisor,
    diagnostics: LooperDiagnostics,
}

impl<G: ProcessingGraph> BranchManager<G> {
    /// Pre-allocate the compositor grid and wire the live preview into slot 0.
    pub fn new(mut graph: G, config: &LooperConfig) -> Result<Self, LooperError> {
        config.validate().map_err(LooperError::Configuration)?;

        let layout = config.layout();
        let grid = CompositorGrid::allocate(&mut graph, layout)?;
        let mut manager = Self {
            graph,
            layout,
            buffer_capacity: config.buffer_capacity,
            registry: SessionRegistry::new(),
            captures: std::array::from_fn(|_| None),
            grid,
            next_slot: 0,
            supervisor: StateTransitionSupervisor::new(config),
            diagnostics: LooperDiagnostics::default(),
        };

        // Drop tears down the grid if this fails.
        manager.wire_live_preview()?;
        Ok(manager)
    }

    fn wire_live_preview(&mut self) -> Result<(), LooperError> {
        let slot = self
            .grid
            .slot_mut(SlotIndex::LIVE_PREVIEW)
            .ok_or(LooperError::InvalidSlot(0))?;
        if !slot.binding.reserve(()) {
            return Err(LooperError::SlotOccupied(0));
        }
        let output = slot.point();

        let mut parts = BranchParts::default();
        match Self::build_live_preview(
            &mut self.graph,
            &mut self.supervisor,
            SlotIndex::LIVE_PREVIEW,
            output,
            &mut parts,
        ) {
            Ok(wiring) => self.commit_slot(SlotIndex::LIVE_PREVIEW, wiring, parts),
            Err(e) => {
                log::error!("Live preview wiring failed: {}", e);
                let _ = parts.unwind(&mut self.graph);
                self.release_slot(SlotIndex::LIVE_PREVIEW);
                Err(LooperError::AttachmentFailure(format!("live preview: {}", e)))
            }
        }
    }

    fn build_live_preview(
        graph: &mut G,
        supervisor: &mut StateTransitionSupervisor,
        slot: SlotIndex,
        output: PointId,
        parts: &mut BranchParts,
    ) -> Result<SlotWiring, LooperError> {
        let name = format!("live-preview-{}-format", slot.get());
        let format = graph.add_node(NodeKind::Format, &name)?;
        parts.nodes.push(format);

        let feed = graph.request_point(PointKind::Distribution)?;
        parts.feed = Binding::Reserved(feed);
        graph.link_point(feed, format)?;
        parts.feed = Binding::Wired(feed);

        graph.link_point(output, format)?;
        parts.output = Some(output);

        let stage = graph.stage();
        if !stage.is_idle() {
            supervisor.set_branch_stage(graph, &parts.nodes, stage)?;
        }

        log::debug!("Live preview wired into {}", slot);
        Ok(SlotWiring::LivePreview { format, feed })
    }

    /// Show the live feed in a playback slot, typically while a key records.
    ///
    /// Returns `false` without touching the graph if the slot is not empty.
    pub fn connect_live_preview(&mut self, slot: SlotIndex) -> Result<bool, LooperError> {
        if !self.layout.is_playback_slot(slot) {
            return Err(LooperError::InvalidSlot(slot.get()));
        }
        let entry = self
            .grid
            .slot_mut(slot)
            .ok_or(LooperError::InvalidSlot(slot.get()))?;
        if !entry.binding.reserve(()) {
            log::debug!("{} is occupied, skipping live preview", slot);
            return Ok(false);
        }
        let output = entry.point();

        let mut parts = BranchParts::default();
        match Self::build_live_preview(
            &mut self.graph,
            &mut self.supervisor,
            slot,
            output,
            &mut parts,
        ) {
            Ok(wiring) => {
                self.commit_slot(slot, wiring, parts)?;
                Ok(true)
            }
            Err(e) => {
                log::warn!("Live preview for {} failed, rolling back: {}", slot, e);
                if let Err(unwind_err) = parts.unwind(&mut self.graph) {
                    log::warn!("Rollback for {} incomplete: {}", slot, unwind_err);
                }
                self.release_slot(slot);
                Err(LooperError::AttachmentFailure(format!(
                    "live preview in {}: {}",
                    slot, e
                )))
            }
        }
    }

    /// Remove the live preview from `slot`. No-op if the slot holds anything else.
    pub fn disconnect_live_preview(&mut self, slot: SlotIndex) -> Result<(), LooperError> {
        if !self.layout.is_playback_slot(slot) {
            return Err(LooperError::InvalidSlot(slot.get()));
        }
        let released = self.grid.slot_mut(slot).and_then(|entry| {
            (entry.occupancy() == Occupancy::LivePreview)
                .then(|| (entry.point(), entry.binding.release()))
        });
        match released {
            Some((output, Binding::Wired(wiring))) => {
                let result = self.teardown_wiring(slot, output, wiring);
                log::debug!("Live preview removed from {}", slot);
                result
            }
            _ => Ok(()),
        }
    }

    /// Idle and unwind the branch that was wired into `slot`.
    ///
    /// The slot binding must already be released.
    fn teardown_wiring(
        &mut self,
        slot: SlotIndex,
        output: PointId,
        wiring: SlotWiring,
    ) -> Result<(), LooperError> {
        let nodes = wiring.nodes();
        let mut first_error = None;
        if let Err(e) = self
            .supervisor
            .set_branch_stage(&mut self.graph, &nodes, GraphStage::Idle)
        {
            log::warn!("Could not idle branch in {}: {}", slot, e);
            first_error = Some(e);
        }

        let feed = match wiring {
            SlotWiring::LivePreview { feed, .. } => Binding::Wired(feed),
            SlotWiring::Playback { .. } => Binding::Vacant,
        };
        let parts = BranchParts {
            nodes,
            feed,
            output: Some(output),
            hook: None,
        };
        if let Err(e) = parts.unwind(&mut self.graph) {
            first_error.get_or_insert(e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --- Capture branches ---

    /// Attach a capture branch for `key` and create its recording session.
    pub fn attach_capture_branch(
        &mut self,
        key: KeyNumber,
    ) -> Result<Arc<RecordingSession>, LooperError> {
        if self.captures[key.index()].is_some() {
            return Err(LooperError::DuplicateBranch(key.get()));
        }
        let session = self.registry.create(key, self.buffer_capacity)?;

        let mut parts = BranchParts::default();
        if let Err(e) =
            Self::build_capture(&mut self.graph, &mut self.supervisor, &session, &mut parts)
        {
            log::error!("Capture branch for {} failed, rolling back: {}", key, e);
            if let Err(unwind_err) = parts.unwind(&mut self.graph) {
                log::warn!("Rollback for {} incomplete: {}", key, unwind_err);
            }
            self.registry.destroy(key);
            self.diagnostics.attach_rollbacks += 1;
            return Err(LooperError::AttachmentFailure(format!("{}: {}", key, e)));
        }

        log::info!(
            "Capture branch attached for {} (session {})",
            key,
            session.id()
        );
        self.captures[key.index()] = Some(CaptureBranch {
            session: Arc::clone(&session),
            parts,
        });
        self.diagnostics.capture_attaches += 1;
        Ok(session)
    }

    fn build_capture(
        graph: &mut G,
        supervisor: &mut StateTransitionSupervisor,
        session: &Arc<RecordingSession>,
        parts: &mut BranchParts,
    ) -> Result<(), LooperError> {
        let key = session.key().get();
        let queue = graph.add_node(NodeKind::Buffering, &format!("capture-{}-queue", key))?;
        parts.nodes.push(queue);
        let format = graph.add_node(NodeKind::Format, &format!("capture-{}-format", key))?;
        parts.nodes.push(format);
        let sink = graph.add_node(NodeKind::DiscardSink, &format!("capture-{}-sink", key))?;
        parts.nodes.push(sink);

        graph.link(queue, format)?;
        graph.link(format, sink)?;

        let feed = graph.request_point(PointKind::Distribution)?;
        parts.feed = Binding::Reserved(feed);
        graph.link_point(feed, queue)?;
        parts.feed = Binding::Wired(feed);

        // The hook holds only a weak session handle and a liveness flag, so a
        // late call after detach finds either a dead flag or a dropped session.
        let live = Arc::new(AtomicBool::new(true));
        let hook_live = Arc::clone(&live);
        let weak = Arc::downgrade(session);
        let hook: FrameHook = Arc::new(move |frame: &Frame| {
            if !hook_live.load(Ordering::Acquire) {
                return;
            }
            if let Some(session) = weak.upgrade() {
                session.ingest(frame);
            }
        });
        let hook_id = graph.install_hook(queue, hook)?;
        parts.hook = Some((hook_id, live));

        let stage = graph.stage();
        if !stage.is_idle() {
            supervisor.set_branch_stage(graph, &parts.nodes, stage)?;
            log::debug!("Capture branch for key {} joined running graph at {}", key, stage);
        }
        Ok(())
    }

    /// Detach the capture branch for `key`. No-op if nothing is attached.
    ///
    /// Teardown continues past individual failures; the first one is returned.
    pub fn detach_capture_branch(&mut self, key: KeyNumber) -> Result<(), LooperError> {
        let Some(CaptureBranch { session, mut parts }) = self.captures[key.index()].take() else {
            log::debug!("No capture branch attached for {}", key);
            return Ok(());
        };

        session.stop();

        let mut first_error = None;
        if let Err(e) =
            self.supervisor
                .set_branch_stage(&mut self.graph, &parts.nodes, GraphStage::Idle)
        {
            log::warn!("Could not idle capture branch for {}: {}", key, e);
            first_error = Some(e);
        }

        if parts.feed.is_vacant() {
            self.recover_lost_feed(key, &mut parts);
        }
        if let Err(e) = parts.unwind(&mut self.graph) {
            first_error.get_or_insert(e);
        }

        self.registry.destroy(key);
        self.supervisor.cancel_timer();
        self.diagnostics.capture_detaches += 1;
        log::info!("Capture branch detached for {}", key);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Find the distribution point still feeding a branch whose stored
    /// reference was lost, so it can be released normally.
    fn recover_lost_feed(&mut self, key: KeyNumber, parts: &mut BranchParts) {
        let Some(&head) = parts.nodes.first() else {
            return;
        };
        let found = self
            .graph
            .points(PointKind::Distribution)
            .into_iter()
            .find(|(_, linked)| *linked == Some(head));

        match found {
            Some((point, _)) => {
                log::warn!(
                    "Attachment point for {} was lost; released {} via fallback scan",
                    key,
                    point
                );
                parts.feed = Binding::Wired(point);
                self.diagnostics.fallback_releases += 1;
            }
            None => log::warn!("No attachment point found for {} during fallback scan", key),
        }
    }

    /// Clear the buffer of `key`'s session, keeping the branch wired.
    pub fn reset_capture(&mut self, key: KeyNumber) -> bool {
        match self.registry.get(key) {
            Some(session) => {
                session.reset();
                true
            }
            None => false,
        }
    }

    pub fn session(&self, key: KeyNumber) -> Option<&Arc<RecordingSession>> {
        self.registry.get(key)
    }

    pub fn is_capture_attached(&self, key: KeyNumber) -> bool {
        self.captures[key.index()].is_some()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // --- Playback branches ---

    /// Wire `source` into a free playback slot.
    ///
    /// The slot is reserved before any node is built and released again if
    /// wiring fails.
    pub fn attach_playback_branch(
        &mut self,
        slot: SlotIndex,
        source: Box<dyn FrameSource>,
    ) -> Result<(), LooperError> {
        if !self.layout.is_playback_slot(slot) {
            return Err(LooperError::InvalidSlot(slot.get()));
        }
        let entry = self
            .grid
            .slot_mut(slot)
            .ok_or(LooperError::InvalidSlot(slot.get()))?;
        if !entry.binding.reserve(()) {
            return Err(LooperError::SlotOccupied(slot.get()));
        }
        let output = entry.point();

        let frames = source.frame_count();
        let mut parts = BranchParts::default();
        match Self::build_playback(
            &mut self.graph,
            &mut self.supervisor,
            slot,
            output,
            source,
            &mut parts,
        ) {
            Ok(wiring) => {
                self.commit_slot(slot, wiring, parts)?;
                self.diagnostics.playback_attaches += 1;
                log::info!("Playback branch attached to {} ({} frames)", slot, frames);
                Ok(())
            }
            Err(e) => {
                log::error!("Playback branch for {} failed, rolling back: {}", slot, e);
                if let Err(unwind_err) = parts.unwind(&mut self.graph) {
                    log::warn!("Rollback for {} incomplete: {}", slot, unwind_err);
                }
                self.release_slot(slot);
                self.diagnostics.attach_rollbacks += 1;
                Err(LooperError::AttachmentFailure(format!("{}: {}", slot, e)))
            }
        }
    }

    fn build_playback(
        graph: &mut G,
        supervisor: &mut StateTransitionSupervisor,
        slot: SlotIndex,
        output: PointId,
        source: Box<dyn FrameSource>,
        parts: &mut BranchParts,
    ) -> Result<SlotWiring, LooperError> {
        let name = format!("playback-{}", slot.get());
        let source_node = graph.add_source_node(&format!("{}-source", name), source)?;
        parts.nodes.push(source_node);
        let format = graph.add_node(NodeKind::Format, &format!("{}-format", name))?;
        parts.nodes.push(format);

        graph.link(source_node, format)?;
        graph.link_point(output, format)?;
        parts.output = Some(output);

        let stage = graph.stage();
        if !stage.is_idle() {
            supervisor.set_branch_stage(graph, &parts.nodes, stage)?;
        }
        Ok(SlotWiring::Playback {
            source: source_node,
            format,
        })
    }

    /// Detach whatever occupies `slot`. No-op on an empty slot.
    pub fn detach_playback_branch(&mut self, slot: SlotIndex) -> Result<(), LooperError> {
        if !self.layout.is_playback_slot(slot) {
            return Err(LooperError::InvalidSlot(slot.get()));
        }
        let Some((output, binding)) = self
            .grid
            .slot_mut(slot)
            .map(|entry| (entry.point(), entry.binding.release()))
        else {
            return Ok(());
        };

        match binding {
            Binding::Vacant => Ok(()),
            Binding::Reserved(()) => {
                self.supervisor.cancel_timer();
                log::debug!("Released reservation on {}", slot);
                Ok(())
            }
            Binding::Wired(wiring) => {
                let is_playback = matches!(wiring, SlotWiring::Playback { .. });
                let result = self.teardown_wiring(slot, output, wiring);
                self.supervisor.cancel_timer();

                if is_playback {
                    self.diagnostics.playback_detaches += 1;
                    log::info!("Playback branch detached from {}", slot);
                } else {
                    log::debug!("Live preview removed from {}", slot);
                }
                result
            }
        }
    }

    /// Put `source` into `slot`, evicting the current occupant first.
    ///
    /// A live preview in the slot is removed without counting as an eviction.
    /// The slot is vacated even when tearing the old occupant down reports an
    /// error, so the new loop is still attached. Returns whether a loop was
    /// evicted.
    pub fn replace_playback(
        &mut self,
        slot: SlotIndex,
        source: Box<dyn FrameSource>,
    ) -> Result<bool, LooperError> {
        let occupancy = self
            .grid
            .slot(slot)
            .map_or(Occupancy::Empty, |entry| entry.occupancy());
        let cleared = match occupancy {
            Occupancy::Empty => Ok(()),
            Occupancy::LivePreview => self.disconnect_live_preview(slot),
            Occupancy::Playback => {
                log::info!("Evicting loop from {}", slot);
                self.diagnostics.slots_evicted += 1;
                self.detach_playback_branch(slot)
            }
        };
        if let Err(e) = cleared {
            log::warn!("Old occupant of {} not torn down cleanly: {}", slot, e);
        }

        self.attach_playback_branch(slot, source)?;
        Ok(occupancy == Occupancy::Playback)
    }

    /// Next playback slot in cyclic order. The cursor wraps after the last slot.
    pub fn assign_next_slot(&mut self) -> Result<SlotIndex, LooperError> {
        let ordinal = self.next_slot;
        self.next_slot = (self.next_slot + 1) % self.layout.playback_slots();
        self.layout.playback_slot(ordinal)
    }

    fn commit_slot(
        &mut self,
        slot: SlotIndex,
        wiring: SlotWiring,
        parts: BranchParts,
    ) -> Result<(), LooperError> {
        let wired = match self.grid.slot_mut(slot) {
            Some(entry) => entry.binding.wire(wiring).is_ok(),
            None => false,
        };
        if wired {
            return Ok(());
        }

        // The reservation vanished under us; undo the wiring.
        let _ = parts.unwind(&mut self.graph);
        Err(LooperError::AttachmentFailure(format!(
            "{} lost its reservation",
            slot
        )))
    }

    fn release_slot(&mut self, slot: SlotIndex) {
        if let Some(entry) = self.grid.slot_mut(slot) {
            entry.binding.release();
        }
    }

    pub fn grid(&self) -> &CompositorGrid {
        &self.grid
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    // --- Stage changes ---

    pub fn request_transition(
        &mut self,
        target: GraphStage,
    ) -> Result<TransitionOutcome, LooperError> {
        self.supervisor.request_transition(&mut self.graph, target)
    }

    pub fn poll_at(&mut self, now: Instant) -> Result<PollOutcome, LooperError> {
        self.supervisor.poll_at(&mut self.graph, now)
    }

    pub fn supervisor(&self) -> &StateTransitionSupervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut StateTransitionSupervisor {
        &mut self.supervisor
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut G {
        &mut self.graph
    }

    pub fn diagnostics(&self) -> LooperDiagnostics {
        LooperDiagnostics {
            recovery_attempts: self.supervisor.recovery_attempts(),
            ..self.diagnostics.clone()
        }
    }

    pub(crate) fn diagnostics_mut(&mut self) -> &mut LooperDiagnostics {
        &mut self.diagnostics
    }

    pub fn is_shut_down(&self) -> bool {
        !self.grid.is_allocated()
    }

    /// Detach every branch, release the grid and bring the graph to Idle.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<(), LooperError> {
        if self.is_shut_down() {
            return Ok(());
        }

        let mut first_error = None;
        for key in KeyNumber::all() {
            if let Err(e) = self.detach_capture_branch(key) {
                first_error.get_or_insert(e);
            }
        }
        for ordinal in 0..self.layout.playback_slots() {
            let result = self
                .layout
                .playback_slot(ordinal)
                .and_then(|slot| self.detach_playback_branch(slot));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        let live = self
            .grid
            .slot_mut(SlotIndex::LIVE_PREVIEW)
            .map(|entry| (entry.point(), entry.binding.release()));
        if let Some((output, Binding::Wired(wiring))) = live {
            if let Err(e) = self.teardown_wiring(SlotIndex::LIVE_PREVIEW, output, wiring) {
                first_error.get_or_insert(e);
            }
        }
        self.grid.release_all(&mut self.graph);

        self.supervisor.cancel_timer();
        if !self.graph.stage().is_idle() {
            if let Err(e) = self
                .supervisor
                .request_transition(&mut self.graph, GraphStage::Idle)
            {
                first_error.get_or_insert(e);
            }
        }

        log::info!("Branch manager shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<G: ProcessingGraph> Drop for BranchManager<G> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Shutdown during drop failed: {}", e);
        }
    }
}
