use thiserror::Error;

use super::stage::GraphStage;

/// Errors that can occur while recording, wiring branches or changing graph stages.
///
/// Validation errors (`Duplicate*`, `InvalidKey`, `InvalidSlot`, `SlotOccupied`,
/// `OutOfRange`, zero-capacity `Allocation`) leave all state unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LooperError {
    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("session for key {0} already exists")]
    DuplicateSession(u8),

    #[error("capture branch for key {0} already attached")]
    DuplicateBranch(u8),

    #[error("invalid key number: {0}")]
    InvalidKey(u8),

    #[error("invalid playback slot: {0}")]
    InvalidSlot(usize),

    #[error("slot {0} is already occupied")]
    SlotOccupied(usize),

    #[error("frame index {index} out of range (frame count {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("branch attachment failed: {0}")]
    AttachmentFailure(String),

    #[error("deadlock detected: transition to {target} pending for {elapsed_ms} ms")]
    DeadlockDetected { target: GraphStage, elapsed_ms: u64 },

    #[error("state change to {target} failed: {reason}")]
    StateChangeFailure { target: GraphStage, reason: String },

    #[error("graph is unrecoverable")]
    GraphUnrecoverable,

    #[error("configuration failed: {0}")]
    Configuration(String),

    #[error("graph operation failed: {0}")]
    Graph(String),
}
