use serde::{Deserialize, Serialize};

use crate::graph::binding::Binding;
use crate::models::error::LooperError;
use crate::models::grid::{GridLayout, SlotGeometry, SlotIndex};
use crate::traits::processing_graph::{NodeId, PointId, PointKind, ProcessingGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Occupancy {
    Empty,
    Playback,
    LivePreview,
}

/// Nodes wired into a compositing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotWiring {
    Playback { source: NodeId, format: NodeId },
    LivePreview { format: NodeId, feed: PointId },
}

impl SlotWiring {
    pub fn nodes(&self) -> Vec<NodeId> {
        match *self {
            Self::Playback { source, format } => vec![source, format],
            Self::LivePreview { format, .. } => vec![format],
        }
    }
}

/// A pre-allocated grid position. Geometry is fixed for the grid's lifetime.
#[derive(Debug)]
pub struct CompositingSlot {
    index: SlotIndex,
    geometry: SlotGeometry,
    point: PointId,
    pub(crate) binding: Binding<(), SlotWiring>,
}

impl CompositingSlot {
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    pub fn geometry(&self) -> &SlotGeometry {
        &self.geometry
    }

    pub fn point(&self) -> PointId {
        self.point
    }

    /// A reservation counts as playback occupancy.
    pub fn occupancy(&self) -> Occupancy {
        match &self.binding {
            Binding::Vacant => Occupancy::Empty,
            Binding::Reserved(()) => Occupancy::Playback,
            Binding::Wired(SlotWiring::Playback { .. }) => Occupancy::Playback,
            Binding::Wired(SlotWiring::LivePreview { .. }) => Occupancy::LivePreview,
        }
    }

    pub fn wiring(&self) -> Option<&SlotWiring> {
        self.binding.wired()
    }
}

/// Compositor inputs for every grid slot, requested once up front.
#[derive(Debug)]
pub struct CompositorGrid {
    layout: GridLayout,
    slots: Vec<CompositingSlot>,
}

impl CompositorGrid {
    /// Request and configure one compositor point per slot.
    ///
    /// On failure every point requested so far is released.
    pub fn allocate<G: ProcessingGraph + ?Sized>(
        graph: &mut G,
        layout: GridLayout,
    ) -> Result<Self, LooperError> {
        let mut slots: Vec<CompositingSlot> = Vec::with_capacity(layout.total_slots());
        for i in 0..layout.total_slots() {
            let index = SlotIndex(i);
            match Self::allocate_slot(graph, &layout, index) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    log::error!("Compositor {} allocation failed: {}", index, e);
                    for slot in &slots {
                        if let Err(release_err) = graph.release_point(slot.point) {
                            log::warn!("Failed to release {}: {}", slot.point, release_err);
                        }
                    }
                    return Err(LooperError::Allocation(format!(
                        "compositor {}: {}",
                        index, e
                    )));
                }
            }
        }

        let (width, height) = layout.canvas_size();
        log::info!(
            "Compositor grid allocated: {} slots, {}x{} canvas",
            slots.len(),
            width,
            height
        );
        Ok(Self { layout, slots })
    }

    fn allocate_slot<G: ProcessingGraph + ?Sized>(
        graph: &mut G,
        layout: &GridLayout,
        index: SlotIndex,
    ) -> Result<CompositingSlot, LooperError> {
        let geometry = layout
            .geometry(index)
            .ok_or(LooperError::InvalidSlot(index.get()))?;
        let point = graph.request_point(PointKind::Compositor)?;
        if let Err(e) = graph.configure_point(point, &geometry) {
            let _ = graph.release_point(point);
            return Err(e);
        }
        Ok(CompositingSlot {
            index,
            geometry,
            point,
            binding: Binding::Vacant,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn slot(&self, index: SlotIndex) -> Option<&CompositingSlot> {
        self.slots.get(index.get())
    }

    pub(crate) fn slot_mut(&mut self, index: SlotIndex) -> Option<&mut CompositingSlot> {
        self.slots.get_mut(index.get())
    }

    pub fn slots(&self) -> &[CompositingSlot] {
        &self.slots
    }

    pub fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Playback slots currently reserved or wired.
    pub fn occupied_playback(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .filter(|s| s.occupancy() == Occupancy::Playback)
            .map(|s| s.index)
            .collect()
    }

    /// Unlink and release every compositor point. Wiring must already be torn down.
    pub fn release_all<G: ProcessingGraph + ?Sized>(&mut self, graph: &mut G) {
        for slot in self.slots.drain(..) {
            if !slot.binding.is_vacant() {
                log::warn!("Releasing {} while still occupied", slot.index);
            }
            if let Err(e) = graph
                .unlink_point(slot.point)
                .and_then(|_| graph.release_point(slot.point))
            {
                log::warn!("Failed to release compositor {}: {}", slot.index, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::MemoryGraph;

    #[test]
    fn allocates_every_slot_with_geometry() {
        let mut graph = MemoryGraph::new();
        let layout = GridLayout::new(9, 9, 320, 180);
        let grid = CompositorGrid::allocate(&mut graph, layout).unwrap();

        assert_eq!(grid.slots().len(), 10);
        assert_eq!(graph.allocated_points(PointKind::Compositor), 10);

        let slot = grid.slot(SlotIndex(3)).unwrap();
        let geometry = graph.point_geometry(slot.point()).unwrap();
        assert_eq!(geometry.x, 960);
        assert_eq!(geometry.z_order, 3);
        approx::assert_relative_eq!(geometry.alpha, 1.0);
    }

    #[test]
    fn occupancy_follows_binding() {
        let mut graph = MemoryGraph::new();
        let mut grid = CompositorGrid::allocate(&mut graph, GridLayout::new(3, 3, 320, 180)).unwrap();
        assert!(grid.occupied_playback().is_empty());

        let slot = grid.slot_mut(SlotIndex(2)).unwrap();
        assert!(slot.binding.reserve(()));
        assert_eq!(slot.occupancy(), Occupancy::Playback);
        assert_eq!(grid.occupied_playback(), vec![SlotIndex(2)]);
    }

    #[test]
    fn release_all_frees_points() {
        let mut graph = MemoryGraph::new();
        let mut grid = CompositorGrid::allocate(&mut graph, GridLayout::new(4, 2, 320, 180)).unwrap();
        grid.release_all(&mut graph);
        assert!(!grid.is_allocated());
        assert_eq!(graph.allocated_points(PointKind::Compositor), 0);
    }
}
