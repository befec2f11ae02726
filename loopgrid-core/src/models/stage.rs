use std::fmt;

use serde::{Deserialize, Serialize};

/// Processing graph stage.
///
/// Stage transitions:
/// ```text
/// idle → ready → paused → active
///                  ↓        ↓
///                 idle ←────┘   (teardown)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphStage {
    Idle,
    Ready,
    Paused,
    Active,
}

impl GraphStage {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether data may flow through branches wired in this stage.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Paused | Self::Active)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Ready => "READY",
            Self::Paused => "PAUSED",
            Self::Active => "ACTIVE",
        }
    }
}

impl fmt::Display for GraphStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the underlying graph reported for a requested stage change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageChange {
    /// The change completed synchronously.
    Success,
    /// The change was accepted and will resolve later.
    Async,
    /// The change was refused; carries the backend's failure text.
    Failure(String),
}

impl StageChange {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
