use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::error::LooperError;
use crate::models::frame::Frame;
use crate::models::grid::SlotGeometry;
use crate::models::stage::{GraphStage, StageChange};
use crate::traits::frame_source::FrameSource;

/// Handle to a node owned by a processing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Handle to an attachment point on the distribution or compositor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PointId(pub u64);

/// Handle to an installed frame hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Decouples a branch from the upstream streaming context.
    Buffering,
    /// Fixes the format of frames passing through.
    Format,
    /// Accepts and drops every frame.
    DiscardSink,
    /// Pulls frames from a `FrameSource`.
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    /// Output of the node that fans the capture stream out to branches.
    Distribution,
    /// Input of the grid compositor.
    Compositor,
}

/// Callback invoked for every frame passing a hooked node.
///
/// Fires on the graph's streaming context, concurrently with control-thread calls.
pub type FrameHook = Arc<dyn Fn(&Frame) + Send + Sync + 'static>;

/// Backend for the shared media processing graph.
///
/// The control thread is the only caller. Implementations deliver frames to
/// hooks from their own streaming context.
///
/// `link_point` direction depends on the point kind: a distribution point feeds
/// the node, a compositor point is fed by it.
pub trait ProcessingGraph: Send {
    fn add_node(&mut self, kind: NodeKind, name: &str) -> Result<NodeId, LooperError>;

    fn add_source_node(
        &mut self,
        name: &str,
        source: Box<dyn FrameSource>,
    ) -> Result<NodeId, LooperError>;

    /// Remove a node along with its links and hooks.
    fn remove_node(&mut self, node: NodeId) -> Result<(), LooperError>;

    fn link(&mut self, upstream: NodeId, downstream: NodeId) -> Result<(), LooperError>;

    fn request_point(&mut self, kind: PointKind) -> Result<PointId, LooperError>;

    fn configure_point(&mut self, point: PointId, geometry: &SlotGeometry)
        -> Result<(), LooperError>;

    fn link_point(&mut self, point: PointId, node: NodeId) -> Result<(), LooperError>;

    fn unlink_point(&mut self, point: PointId) -> Result<(), LooperError>;

    /// Return a point to its owner. The point must be unlinked first.
    fn release_point(&mut self, point: PointId) -> Result<(), LooperError>;

    /// Every allocated point of `kind` with the node it is linked to.
    fn points(&self, kind: PointKind) -> Vec<(PointId, Option<NodeId>)>;

    fn install_hook(&mut self, node: NodeId, hook: FrameHook) -> Result<HookId, LooperError>;

    fn remove_hook(&mut self, hook: HookId);

    /// Last stage the graph settled in.
    fn stage(&self) -> GraphStage;

    /// Target of an accepted asynchronous change that has not resolved yet.
    fn pending_stage(&self) -> Option<GraphStage>;

    fn set_stage(&mut self, target: GraphStage) -> StageChange;

    fn set_node_stage(&mut self, node: NodeId, target: GraphStage) -> StageChange;
}
