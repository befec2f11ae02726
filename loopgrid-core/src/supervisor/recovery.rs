use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::error::LooperError;
use crate::models::stage::GraphStage;
use crate::traits::processing_graph::ProcessingGraph;

/// Callback invoked once per attempted recovery step with `(description, success)`.
pub type RecoveryCallback = Arc<dyn Fn(&str, bool) + Send + Sync + 'static>;

/// One rung of the recovery ladder, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStep {
    RevertToPrevious(GraphStage),
    ForceReady,
    ForceIdle,
}

impl RecoveryStep {
    pub fn ladder(rollback: GraphStage) -> [RecoveryStep; 3] {
        [
            Self::RevertToPrevious(rollback),
            Self::ForceReady,
            Self::ForceIdle,
        ]
    }

    pub fn target(&self) -> GraphStage {
        match self {
            Self::RevertToPrevious(stage) => *stage,
            Self::ForceReady => GraphStage::Ready,
            Self::ForceIdle => GraphStage::Idle,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::RevertToPrevious(stage) => format!("revert to previous stage {}", stage),
            Self::ForceReady => "force READY".into(),
            Self::ForceIdle => "force IDLE (full stop)".into(),
        }
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// Walk the ladder until a step is accepted by the graph.
///
/// An asynchronous acceptance counts as success. Returns the step that worked,
/// or `GraphUnrecoverable` once all three have failed.
pub(crate) fn run_ladder<G: ProcessingGraph + ?Sized>(
    graph: &mut G,
    rollback: GraphStage,
    callback: Option<&RecoveryCallback>,
) -> Result<RecoveryStep, LooperError> {
    for step in RecoveryStep::ladder(rollback) {
        let change = graph.set_stage(step.target());
        let success = !change.is_failure();
        if success {
            log::info!("Recovery succeeded: {}", step);
        } else {
            log::warn!("Recovery step failed: {}", step);
        }
        if let Some(cb) = callback {
            cb(&step.description(), success);
        }
        if success {
            return Ok(step);
        }
    }

    log::error!("All recovery attempts failed, graph is unrecoverable");
    Err(LooperError::GraphUnrecoverable)
}
