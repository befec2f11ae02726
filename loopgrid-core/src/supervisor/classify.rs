use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::error::LooperError;
use crate::models::stage::GraphStage;

/// Best-effort category of a backend failure. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ElementMissing,
    Negotiation,
    Resource,
    Unknown,
}

impl FailureCategory {
    /// Match the backend's failure text against known phrases, case-insensitively.
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("not found") || text.contains("not available") {
            Self::ElementMissing
        } else if text.contains("negotiation") || text.contains("caps") {
            Self::Negotiation
        } else if text.contains("resource")
            || text.contains("memory")
            || text.contains("allocation")
        {
            Self::Resource
        } else {
            Self::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ElementMissing => "element missing",
            Self::Negotiation => "format negotiation",
            Self::Resource => "resource",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphErrorKind {
    StateChangeFailure,
    DeadlockDetected,
}

/// Record of the most recent graph failure, handed to the error callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphErrorInfo {
    pub kind: GraphErrorKind,
    pub category: FailureCategory,
    pub message: String,
    pub target: GraphStage,
    pub rollback: GraphStage,
    /// Time the transition had been pending; zero for immediate failures.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl GraphErrorInfo {
    pub fn new(
        kind: GraphErrorKind,
        message: impl Into<String>,
        target: GraphStage,
        rollback: GraphStage,
    ) -> Self {
        let message = message.into();
        let category = match kind {
            GraphErrorKind::StateChangeFailure => FailureCategory::classify(&message),
            GraphErrorKind::DeadlockDetected => FailureCategory::Unknown,
        };
        Self {
            kind,
            category,
            message,
            target,
            rollback,
            elapsed_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn to_error(&self) -> LooperError {
        match self.kind {
            GraphErrorKind::StateChangeFailure => LooperError::StateChangeFailure {
                target: self.target,
                reason: self.message.clone(),
            },
            GraphErrorKind::DeadlockDetected => LooperError::DeadlockDetected {
                target: self.target,
                elapsed_ms: self.elapsed_ms,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_phrases() {
        assert_eq!(
            FailureCategory::classify("element 'x264enc' not found"),
            FailureCategory::ElementMissing
        );
        assert_eq!(
            FailureCategory::classify("Caps negotiation failed"),
            FailureCategory::Negotiation
        );
        assert_eq!(
            FailureCategory::classify("Out of MEMORY"),
            FailureCategory::Resource
        );
        assert_eq!(
            FailureCategory::classify("internal data stream error"),
            FailureCategory::Unknown
        );
    }

    #[test]
    fn deadlock_info_is_uncategorized() {
        let info = GraphErrorInfo::new(
            GraphErrorKind::DeadlockDetected,
            "resource busy",
            GraphStage::Active,
            GraphStage::Paused,
        );
        assert_eq!(info.category, FailureCategory::Unknown);
    }
}
