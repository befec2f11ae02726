//! # loopgrid-core
//!
//! Capture and playback core for a key-driven video looper.
//!
//! Holding a key records frames into a bounded ring buffer; releasing it turns
//! the recording into a forward/backward loop composited into a fixed grid.
//! The shared processing graph is reshaped at runtime as capture and playback
//! branches come and go, with stage changes watched for deadlocks.
//!
//! Graph backends implement the `ProcessingGraph` trait and plug into the
//! generic `Looper`. `MemoryGraph` is the in-process backend.
//!
//! ## Architecture
//!
//! ```text
//! loopgrid-core (this crate)
//! ├── traits/       ← ProcessingGraph, FrameSource, LooperDelegate
//! ├── models/       ← LooperError, LooperConfig, Frame, GraphStage, GridLayout, LoopResult
//! ├── processing/   ← FrameRingBuffer, PalindromeSequencer, LoopPlayback
//! ├── session/      ← RecordingSession, SessionRegistry, Looper (orchestrator)
//! ├── graph/        ← BranchManager, CompositorGrid, Binding, MemoryGraph
//! └── supervisor/   ← StateTransitionSupervisor, recovery ladder, failure classification
//! ```

pub mod graph;
pub mod models;
pub mod processing;
pub mod session;
pub mod supervisor;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use graph::binding::Binding;
pub use graph::compositor::{CompositingSlot, CompositorGrid, Occupancy, SlotWiring};
pub use graph::lifecycle::BranchManager;
pub use graph::memory::{CaptureInput, MemoryGraph, RenderedCell};
pub use models::config::{CaptureLifecycle, LooperConfig};
pub use models::error::LooperError;
pub use models::frame::{Frame, FrameFormat, KeyNumber, KEY_COUNT};
pub use models::grid::{GridLayout, SlotGeometry, SlotIndex};
pub use models::loop_result::{LoopResult, LooperDiagnostics};
pub use models::stage::{GraphStage, StageChange};
pub use processing::palindrome::{Direction, PalindromeSequencer};
pub use processing::playback::LoopPlayback;
pub use processing::ring_buffer::FrameRingBuffer;
pub use session::looper::Looper;
pub use session::recording::{RecordingSession, SessionRegistry};
pub use supervisor::classify::{FailureCategory, GraphErrorInfo, GraphErrorKind};
pub use supervisor::recovery::{RecoveryCallback, RecoveryStep};
pub use supervisor::transition::{
    ErrorCallback, PollOutcome, StateTransitionSupervisor, TransitionOutcome, TransitionRecord,
};
pub use traits::frame_source::FrameSource;
pub use traits::looper_delegate::LooperDelegate;
pub use traits::processing_graph::{
    FrameHook, HookId, NodeId, NodeKind, PointId, PointKind, ProcessingGraph,
};
