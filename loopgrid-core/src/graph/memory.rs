use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::LooperError;
use crate::models::frame::Frame;
use crate::models::grid::SlotGeometry;
use crate::models::stage::{GraphStage, StageChange};
use crate::traits::frame_source::FrameSource;
use crate::traits::processing_graph::{
    FrameHook, HookId, NodeId, NodeKind, PointId, PointKind, ProcessingGraph,
};

struct NodeEntry {
    kind: NodeKind,
    name: String,
    source: Option<Box<dyn FrameSource>>,
}

#[derive(Debug)]
struct PointEntry {
    kind: PointKind,
    linked: Option<NodeId>,
    geometry: Option<SlotGeometry>,
}

/// State touched by the streaming side.
#[derive(Default)]
struct Shared {
    hooks: Vec<(HookId, NodeId, FrameHook)>,
    /// Nodes linked to a distribution point.
    fed: HashSet<NodeId>,
    node_stages: HashMap<NodeId, GraphStage>,
    flowing: bool,
    last_live: Option<Frame>,
    delivered: u64,
}

impl Shared {
    fn node_running(&self, node: NodeId) -> bool {
        self.node_stages
            .get(&node)
            .is_some_and(|stage| stage.is_running())
    }
}

#[derive(Default)]
struct Faults {
    node_kinds: HashSet<NodeKind>,
    distribution_requests: bool,
    stages: HashMap<GraphStage, String>,
    deferred: HashSet<GraphStage>,
    node_stages: bool,
}

/// Handle for pushing captured frames into a [`MemoryGraph`]'s distribution node.
///
/// Cloneable and usable from any thread. Frames reach every hook on a node that
/// is linked to a distribution point and running, while the graph is Active.
#[derive(Clone)]
pub struct CaptureInput {
    shared: Arc<Mutex<Shared>>,
}

impl CaptureInput {
    /// Deliver one frame. Returns how many hooks saw it.
    pub fn deliver(&self, frame: &Frame) -> usize {
        let hooks: Vec<FrameHook> = {
            let mut guard = self.shared.lock();
            if !guard.flowing {
                return 0;
            }
            guard.last_live = Some(frame.clone());
            guard.delivered += 1;

            let shared = &*guard;
            shared
                .hooks
                .iter()
                .filter(|(_, node, _)| shared.fed.contains(node) && shared.node_running(*node))
                .map(|(_, _, hook)| Arc::clone(hook))
                .collect()
        };

        // Hooks run outside the lock; they may take their own.
        for hook in &hooks {
            hook(frame);
        }
        hooks.len()
    }

    pub fn is_flowing(&self) -> bool {
        self.shared.lock().flowing
    }

    /// Frames accepted while the graph was flowing.
    pub fn delivered(&self) -> u64 {
        self.shared.lock().delivered
    }
}

/// One compositor cell produced by [`MemoryGraph::render_tick`].
#[derive(Debug, Clone)]
pub struct RenderedCell {
    pub point: PointId,
    pub geometry: SlotGeometry,
    pub frame: Option<Frame>,
}

/// In-process processing graph.
///
/// Nodes, points and links live in maps; stage changes settle immediately
/// unless deferred. Fault injection hooks let tests drive failure paths.
pub struct MemoryGraph {
    nodes: HashMap<NodeId, NodeEntry>,
    /// upstream -> downstream
    links: HashMap<NodeId, NodeId>,
    points: BTreeMap<PointId, PointEntry>,
    shared: Arc<Mutex<Shared>>,
    stage: GraphStage,
    pending: Option<GraphStage>,
    history: Vec<GraphStage>,
    faults: Faults,
    next_id: u64,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            links: HashMap::new(),
            points: BTreeMap::new(),
            shared: Arc::new(Mutex::new(Shared::default())),
            stage: GraphStage::Idle,
            pending: None,
            history: Vec::new(),
            faults: Faults::default(),
            next_id: 1,
        }
    }

    pub fn capture_input(&self) -> CaptureInput {
        CaptureInput {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pull one frame for every wired compositor point.
    ///
    /// Playback cells pull from their source node; the live cell repeats the
    /// last delivered capture frame. Nothing renders unless the graph is Active.
    pub fn render_tick(&mut self) -> Vec<RenderedCell> {
        if !self.stage.is_active() {
            return Vec::new();
        }

        let mut cells = Vec::new();
        for (&point, entry) in &self.points {
            let (PointKind::Compositor, Some(node), Some(geometry)) =
                (entry.kind, entry.linked, entry.geometry)
            else {
                continue;
            };

            let upstream = self
                .links
                .iter()
                .find(|(_, down)| **down == node)
                .map(|(up, _)| *up);

            let frame = {
                let shared = self.shared.lock();
                match upstream.and_then(|up| self.nodes.get_mut(&up).map(|e| (up, e))) {
                    Some((up, NodeEntry { source: Some(source), .. })) => {
                        if shared.node_running(up) {
                            source.next_frame()
                        } else {
                            None
                        }
                    }
                    _ if shared.fed.contains(&node) => shared.last_live.clone(),
                    _ => None,
                }
            };

            cells.push(RenderedCell {
                point,
                geometry,
                frame,
            });
        }
        cells
    }

    // -- Fault injection --

    /// Make every creation of `kind` fail until faults are cleared.
    pub fn fail_node_creation(&mut self, kind: NodeKind) {
        self.faults.node_kinds.insert(kind);
    }

    pub fn fail_distribution_requests(&mut self) {
        self.faults.distribution_requests = true;
    }

    /// Refuse changes to `stage` with `reason`.
    pub fn fail_stage(&mut self, stage: GraphStage, reason: &str) {
        self.faults.stages.insert(stage, reason.to_string());
    }

    /// Accept changes to `stage` asynchronously; they settle on `resolve_pending`.
    pub fn defer_stage(&mut self, stage: GraphStage) {
        self.faults.deferred.insert(stage);
    }

    pub fn fail_node_stages(&mut self) {
        self.faults.node_stages = true;
    }

    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
    }

    /// Settle the pending asynchronous change, if any.
    pub fn resolve_pending(&mut self) {
        if let Some(target) = self.pending.take() {
            self.apply_stage(target);
        }
    }

    // -- Introspection --

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    pub fn node_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(&node).map(|n| n.name.as_str())
    }

    pub fn node_stage(&self, node: NodeId) -> Option<GraphStage> {
        self.shared.lock().node_stages.get(&node).copied()
    }

    pub fn allocated_points(&self, kind: PointKind) -> usize {
        self.points.values().filter(|p| p.kind == kind).count()
    }

    pub fn linked_points(&self, kind: PointKind) -> usize {
        self.points
            .values()
            .filter(|p| p.kind == kind && p.linked.is_some())
            .count()
    }

    pub fn point_geometry(&self, point: PointId) -> Option<SlotGeometry> {
        self.points.get(&point).and_then(|p| p.geometry)
    }

    pub fn hook_count(&self) -> usize {
        self.shared.lock().hooks.len()
    }

    /// Every stage passed to `set_stage`, including refused ones.
    pub fn stage_history(&self) -> Vec<GraphStage> {
        self.history.clone()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn apply_stage(&mut self, target: GraphStage) {
        self.stage = target;
        self.pending = None;
        let mut shared = self.shared.lock();
        shared.flowing = target.is_active();
        for stage in shared.node_stages.values_mut() {
            *stage = target;
        }
    }

    fn check_node(&self, node: NodeId) -> Result<(), LooperError> {
        if self.nodes.contains_key(&node) {
            Ok(())
        } else {
            Err(LooperError::Graph(format!("unknown {}", node)))
        }
    }

    fn point_mut(&mut self, point: PointId) -> Result<&mut PointEntry, LooperError> {
        self.points
            .get_mut(&point)
            .ok_or_else(|| LooperError::Graph(format!("unknown {}", point)))
    }

    fn insert_node(
        &mut self,
        kind: NodeKind,
        name: &str,
        source: Option<Box<dyn FrameSource>>,
    ) -> Result<NodeId, LooperError> {
        if self.faults.node_kinds.contains(&kind) {
            return Err(LooperError::Graph(format!(
                "{:?} node '{}' not available",
                kind, name
            )));
        }

        let id = NodeId(self.allocate_id());
        self.nodes.insert(
            id,
            NodeEntry {
                kind,
                name: name.to_string(),
                source,
            },
        );
        self.shared.lock().node_stages.insert(id, GraphStage::Idle);
        log::trace!("Created {:?} node '{}' as {}", kind, name, id);
        Ok(id)
    }
}

impl ProcessingGraph for MemoryGraph {
    fn add_node(&mut self, kind: NodeKind, name: &str) -> Result<NodeId, LooperError> {
        self.insert_node(kind, name, None)
    }

    fn add_source_node(
        &mut self,
        name: &str,
        source: Box<dyn FrameSource>,
    ) -> Result<NodeId, LooperError> {
        self.insert_node(NodeKind::Source, name, Some(source))
    }

    fn remove_node(&mut self, node: NodeId) -> Result<(), LooperError> {
        self.nodes
            .remove(&node)
            .ok_or_else(|| LooperError::Graph(format!("unknown {}", node)))?;

        self.links.remove(&node);
        self.links.retain(|_, down| *down != node);
        for entry in self.points.values_mut() {
            if entry.linked == Some(node) {
                entry.linked = None;
            }
        }

        let mut shared = self.shared.lock();
        shared.hooks.retain(|(_, hooked, _)| *hooked != node);
        shared.fed.remove(&node);
        shared.node_stages.remove(&node);
        Ok(())
    }

    fn link(&mut self, upstream: NodeId, downstream: NodeId) -> Result<(), LooperError> {
        self.check_node(upstream)?;
        self.check_node(downstream)?;
        if self.links.contains_key(&upstream) {
            return Err(LooperError::Graph(format!("{} is already linked", upstream)));
        }
        self.links.insert(upstream, downstream);
        Ok(())
    }

    fn request_point(&mut self, kind: PointKind) -> Result<PointId, LooperError> {
        if kind == PointKind::Distribution && self.faults.distribution_requests {
            return Err(LooperError::Graph(
                "distribution node has no free attachment point".into(),
            ));
        }

        let id = PointId(self.allocate_id());
        self.points.insert(
            id,
            PointEntry {
                kind,
                linked: None,
                geometry: None,
            },
        );
        Ok(id)
    }

    fn configure_point(
        &mut self,
        point: PointId,
        geometry: &SlotGeometry,
    ) -> Result<(), LooperError> {
        let entry = self.point_mut(point)?;
        if entry.kind != PointKind::Compositor {
            return Err(LooperError::Graph(format!(
                "{} does not take geometry",
                point
            )));
        }
        entry.geometry = Some(*geometry);
        Ok(())
    }

    fn link_point(&mut self, point: PointId, node: NodeId) -> Result<(), LooperError> {
        self.check_node(node)?;
        let entry = self.point_mut(point)?;
        if let Some(existing) = entry.linked {
            return Err(LooperError::Graph(format!(
                "{} is already linked to {}",
                point, existing
            )));
        }
        entry.linked = Some(node);
        if entry.kind == PointKind::Distribution {
            self.shared.lock().fed.insert(node);
        }
        Ok(())
    }

    fn unlink_point(&mut self, point: PointId) -> Result<(), LooperError> {
        let entry = self.point_mut(point)?;
        let kind = entry.kind;
        if let Some(node) = entry.linked.take() {
            if kind == PointKind::Distribution {
                self.shared.lock().fed.remove(&node);
            }
        }
        Ok(())
    }

    fn release_point(&mut self, point: PointId) -> Result<(), LooperError> {
        let entry = self.point_mut(point)?;
        if let Some(node) = entry.linked {
            return Err(LooperError::Graph(format!(
                "{} released while still linked to {}",
                point, node
            )));
        }
        self.points.remove(&point);
        Ok(())
    }

    fn points(&self, kind: PointKind) -> Vec<(PointId, Option<NodeId>)> {
        self.points
            .iter()
            .filter(|(_, entry)| entry.kind == kind)
            .map(|(id, entry)| (*id, entry.linked))
            .collect()
    }

    fn install_hook(&mut self, node: NodeId, hook: FrameHook) -> Result<HookId, LooperError> {
        self.check_node(node)?;
        let id = HookId(self.allocate_id());
        self.shared.lock().hooks.push((id, node, hook));
        Ok(id)
    }

    fn remove_hook(&mut self, hook: HookId) {
        self.shared.lock().hooks.retain(|(id, _, _)| *id != hook);
    }

    fn stage(&self) -> GraphStage {
        self.stage
    }

    fn pending_stage(&self) -> Option<GraphStage> {
        self.pending
    }

    fn set_stage(&mut self, target: GraphStage) -> StageChange {
        self.history.push(target);
        if let Some(reason) = self.faults.stages.get(&target) {
            return StageChange::Failure(reason.clone());
        }
        if self.faults.deferred.contains(&target) {
            self.pending = Some(target);
            return StageChange::Async;
        }
        self.apply_stage(target);
        StageChange::Success
    }

    fn set_node_stage(&mut self, node: NodeId, target: GraphStage) -> StageChange {
        if self.faults.node_stages {
            return StageChange::Failure(format!("{} refused state change", node));
        }
        if !self.nodes.contains_key(&node) {
            return StageChange::Failure(format!("{} not found", node));
        }
        self.shared.lock().node_stages.insert(node, target);
        StageChange::Success
    }
}
