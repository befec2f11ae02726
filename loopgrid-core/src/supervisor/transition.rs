use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::config::LooperConfig;
use crate::models::error::LooperError;
use crate::models::stage::{GraphStage, StageChange};
use crate::supervisor::classify::{GraphErrorInfo, GraphErrorKind};
use crate::supervisor::recovery::{run_ladder, RecoveryCallback, RecoveryStep};
use crate::traits::processing_graph::{NodeId, ProcessingGraph};

/// Callback invoked with every recorded graph failure.
pub type ErrorCallback = Arc<dyn Fn(&GraphErrorInfo) + Send + Sync + 'static>;

/// The transition currently watched by the deadlock timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRecord {
    pub target: GraphStage,
    pub rollback: GraphStage,
    pub started_at: Instant,
    next_check: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The graph reached the target synchronously.
    Completed,
    /// The graph accepted the change and will settle later.
    Pending,
    /// The change failed and the ladder brought the graph to a stable stage.
    Recovered(RecoveryStep),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No transition is being watched.
    Idle,
    /// Not due yet, or still pending within the timeout.
    Waiting,
    /// The pending change settled in this stage.
    Resolved(GraphStage),
    /// The transition timed out and the ladder ran.
    Recovered(RecoveryStep),
}

/// Wraps graph stage changes with deadlock detection and the recovery ladder.
///
/// The deadlock timer is cooperative: the control loop calls [`poll_at`] and
/// nothing here blocks. One timer is tracked per graph; a new request replaces it.
///
/// Callback registration keeps a single slot per callback and the last
/// registration wins. This mirrors the legacy control surface; callers that need
/// fan-out should dispatch from their own callback.
///
/// [`poll_at`]: StateTransitionSupervisor::poll_at
pub struct StateTransitionSupervisor {
    deadlock_detection: bool,
    timeout: Duration,
    poll_interval: Duration,
    tracked: Option<TransitionRecord>,
    last_error: Option<GraphErrorInfo>,
    error_callback: Option<ErrorCallback>,
    recovery_callback: Option<RecoveryCallback>,
    unrecoverable: bool,
    recovery_attempts: u64,
}

impl StateTransitionSupervisor {
    pub fn new(config: &LooperConfig) -> Self {
        Self {
            deadlock_detection: config.deadlock_detection,
            timeout: config.transition_timeout(),
            poll_interval: config.poll_interval(),
            tracked: None,
            last_error: None,
            error_callback: None,
            recovery_callback: None,
            unrecoverable: false,
            recovery_attempts: 0,
        }
    }

    pub fn register_error_callback(&mut self, callback: ErrorCallback) {
        if self.error_callback.replace(callback).is_some() {
            log::debug!("Error callback replaced");
        }
    }

    pub fn register_recovery_callback(&mut self, callback: RecoveryCallback) {
        if self.recovery_callback.replace(callback).is_some() {
            log::debug!("Recovery callback replaced");
        }
    }

    /// Request a graph stage change.
    ///
    /// The current stage becomes the rollback target. A failed change runs the
    /// recovery ladder before returning.
    pub fn request_transition<G: ProcessingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        target: GraphStage,
    ) -> Result<TransitionOutcome, LooperError> {
        let rollback = graph.stage();
        let now = Instant::now();
        if self.deadlock_detection {
            self.tracked = Some(TransitionRecord {
                target,
                rollback,
                started_at: now,
                next_check: now + self.poll_interval,
            });
        }

        log::debug!("Requesting graph transition {} -> {}", rollback, target);
        match graph.set_stage(target) {
            StageChange::Success => {
                self.tracked = None;
                log::debug!("Graph reached {}", target);
                Ok(TransitionOutcome::Completed)
            }
            StageChange::Async => {
                log::debug!("Graph transition to {} is pending", target);
                Ok(TransitionOutcome::Pending)
            }
            StageChange::Failure(reason) => {
                self.tracked = None;
                let info = GraphErrorInfo::new(
                    GraphErrorKind::StateChangeFailure,
                    reason,
                    target,
                    rollback,
                );
                log::error!(
                    "Graph transition to {} failed ({}): {}",
                    target,
                    info.category,
                    info.message
                );
                self.report(info);
                self.recover(graph, rollback)
                    .map(TransitionOutcome::Recovered)
            }
        }
    }

    pub fn poll<G: ProcessingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
    ) -> Result<PollOutcome, LooperError> {
        self.poll_at(graph, Instant::now())
    }

    /// Check the tracked transition as of `now`.
    ///
    /// Checks are skipped until the poll interval has passed since the last one.
    pub fn poll_at<G: ProcessingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        now: Instant,
    ) -> Result<PollOutcome, LooperError> {
        let Some(record) = self.tracked.as_mut() else {
            return Ok(PollOutcome::Idle);
        };
        if now < record.next_check {
            return Ok(PollOutcome::Waiting);
        }
        record.next_check = now + self.poll_interval;
        let record = *record;

        if graph.pending_stage().is_none() {
            self.tracked = None;
            let stage = graph.stage();
            if stage != record.target {
                log::warn!(
                    "Graph settled in {} instead of requested {}",
                    stage,
                    record.target
                );
            } else {
                log::debug!("Pending transition to {} resolved", stage);
            }
            return Ok(PollOutcome::Resolved(stage));
        }

        let elapsed = now.saturating_duration_since(record.started_at);
        if elapsed < self.timeout {
            return Ok(PollOutcome::Waiting);
        }

        self.tracked = None;
        let elapsed_ms = elapsed.as_millis() as u64;
        log::error!(
            "Deadlock detected: transition to {} pending for {} ms (timeout {} ms)",
            record.target,
            elapsed_ms,
            self.timeout.as_millis()
        );
        let mut info = GraphErrorInfo::new(
            GraphErrorKind::DeadlockDetected,
            format!("transition to {} timed out", record.target),
            record.target,
            record.rollback,
        );
        info.elapsed_ms = elapsed_ms;
        self.report(info);
        self.recover(graph, record.rollback)
            .map(PollOutcome::Recovered)
    }

    /// Move a set of branch nodes to `target`, stopping at the first refusal.
    ///
    /// Branch failures are recorded and reported but do not run the ladder.
    pub fn set_branch_stage<G: ProcessingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        nodes: &[NodeId],
        target: GraphStage,
    ) -> Result<(), LooperError> {
        for &node in nodes {
            if let StageChange::Failure(reason) = graph.set_node_stage(node, target) {
                log::warn!("{} refused stage {}: {}", node, target, reason);
                let info = GraphErrorInfo::new(
                    GraphErrorKind::StateChangeFailure,
                    reason.clone(),
                    target,
                    graph.stage(),
                );
                self.report(info);
                return Err(LooperError::StateChangeFailure { target, reason });
            }
        }
        Ok(())
    }

    /// Stop watching the tracked transition, if any.
    pub fn cancel_timer(&mut self) {
        if let Some(record) = self.tracked.take() {
            log::debug!("Deadlock timer for {} cancelled", record.target);
        }
    }

    pub fn tracked(&self) -> Option<&TransitionRecord> {
        self.tracked.as_ref()
    }

    pub fn last_error(&self) -> Option<&GraphErrorInfo> {
        self.last_error.as_ref()
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable
    }

    /// Number of times the ladder has run.
    pub fn recovery_attempts(&self) -> u64 {
        self.recovery_attempts
    }

    pub fn deadlock_detection(&self) -> bool {
        self.deadlock_detection
    }

    fn report(&mut self, info: GraphErrorInfo) {
        if let Some(cb) = &self.error_callback {
            cb(&info);
        }
        self.last_error = Some(info);
    }

    fn recover<G: ProcessingGraph + ?Sized>(
        &mut self,
        graph: &mut G,
        rollback: GraphStage,
    ) -> Result<RecoveryStep, LooperError> {
        self.recovery_attempts += 1;
        run_ladder(graph, rollback, self.recovery_callback.as_ref()).inspect_err(|_| {
            self.unrecoverable = true;
        })
    }
}
