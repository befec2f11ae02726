use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::LooperError;

/// Index of a compositing slot in the grid. Slot 0 is the live preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub usize);

impl SlotIndex {
    pub const LIVE_PREVIEW: SlotIndex = SlotIndex(0);

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Fixed placement of one compositing slot, configured once at graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotGeometry {
    pub row: u32,
    pub column: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub z_order: u32,
    pub alpha: f32,
}

/// Grid geometry shared with the presentation surface.
///
/// ```text
/// row 0: [live][p0][p1] ... [p(c-1)]
/// row 1: [    ][pc] ...
/// ```
/// Column 0 of every row belongs to the live preview column; only row 0 uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    playback_slots: usize,
    playback_columns: usize,
    cell_width_px: u32,
    cell_height_px: u32,
}

impl GridLayout {
    pub fn new(
        playback_slots: usize,
        playback_columns: usize,
        cell_width_px: u32,
        cell_height_px: u32,
    ) -> Self {
        Self {
            playback_slots,
            playback_columns: playback_columns.max(1),
            cell_width_px,
            cell_height_px,
        }
    }

    pub fn playback_slots(&self) -> usize {
        self.playback_slots
    }

    /// Playback slots plus the live preview slot.
    pub fn total_slots(&self) -> usize {
        self.playback_slots + 1
    }

    pub fn rows(&self) -> usize {
        self.playback_slots.div_ceil(self.playback_columns).max(1)
    }

    /// Columns including the live column.
    pub fn columns(&self) -> usize {
        self.playback_columns.min(self.playback_slots.max(1)) + 1
    }

    pub fn cell_width_px(&self) -> u32 {
        self.cell_width_px
    }

    pub fn cell_height_px(&self) -> u32 {
        self.cell_height_px
    }

    /// Composited output size in pixels.
    pub fn canvas_size(&self) -> (u32, u32) {
        (
            self.columns() as u32 * self.cell_width_px,
            self.rows() as u32 * self.cell_height_px,
        )
    }

    pub fn is_playback_slot(&self, slot: SlotIndex) -> bool {
        slot.0 >= 1 && slot.0 <= self.playback_slots
    }

    /// Grid slot for the `ordinal`-th playback position (`0..playback_slots`).
    pub fn playback_slot(&self, ordinal: usize) -> Result<SlotIndex, LooperError> {
        if ordinal >= self.playback_slots {
            return Err(LooperError::InvalidSlot(ordinal + 1));
        }
        Ok(SlotIndex(ordinal + 1))
    }

    pub fn geometry(&self, slot: SlotIndex) -> Option<SlotGeometry> {
        if slot.0 > self.playback_slots {
            return None;
        }
        let (row, column) = if slot == SlotIndex::LIVE_PREVIEW {
            (0, 0)
        } else {
            let ordinal = slot.0 - 1;
            (
                (ordinal / self.playback_columns) as u32,
                (ordinal % self.playback_columns) as u32 + 1,
            )
        };
        Some(SlotGeometry {
            row,
            column,
            x: column * self.cell_width_px,
            y: row * self.cell_height_px,
            width: self.cell_width_px,
            height: self.cell_height_px,
            z_order: slot.0 as u32,
            alpha: 1.0,
        })
    }
}
