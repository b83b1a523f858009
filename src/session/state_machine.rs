use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::store::models::SessionStatus;

/// Lifecycle phase of one game session.
///
/// The question index lives inside [`SessionPhase::Active`] so the machine is
/// the single owner of "which question is being served" — never a client-side
/// cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Session created; players can join, no question served yet.
    Waiting,
    /// Questions are being served; `question` is the 0-based current index.
    Active {
        /// Index of the question currently on screen.
        question: usize,
    },
    /// The final question was advanced past. Terminal: no command applies.
    Completed,
}

impl SessionPhase {
    /// Status column value persisted for this phase.
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionPhase::Waiting => SessionStatus::Waiting,
            SessionPhase::Active { .. } => SessionStatus::Active,
            SessionPhase::Completed => SessionStatus::Completed,
        }
    }

    /// Question index persisted for this phase, when one is being served.
    pub fn question_index(&self) -> Option<usize> {
        match self {
            SessionPhase::Active { question } => Some(*question),
            _ => None,
        }
    }
}

/// Commands the host can apply to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin serving the first question.
    Start,
    /// Move past the current question: next question, or completion when it
    /// was the last one.
    Advance,
    /// End the session early from any active question.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {command:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid command arrived.
    pub from: SessionPhase,
    /// The command that cannot be applied from this phase.
    pub command: SessionCommand,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when the plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
    /// Machine version changed since the plan was created.
    VersionMismatch {
        /// Version expected after applying this plan.
        expected: usize,
        /// Version that applying would actually produce.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been committed yet.
///
/// The host persists the new status between `plan` and `apply`; a failed
/// persistence aborts the plan, so no broadcast ever reflects a state the
/// store did not accept.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the machine is currently in.
    pub from: SessionPhase,
    /// Phase the machine will transition to.
    pub to: SessionPhase,
    /// Command that triggered this transition.
    pub command: SessionCommand,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the machine for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Version number (increments on each applied transition).
    pub version: usize,
    /// Target phase of a pending plan, if any.
    pub pending: Option<SessionPhase>,
}

/// State machine governing the `waiting → active → completed` lifecycle.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    question_count: usize,
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl SessionStateMachine {
    /// Create a machine in `waiting` for a quiz with `question_count`
    /// questions.
    pub fn new(question_count: usize) -> Self {
        Self::resume(question_count, SessionPhase::Waiting)
    }

    /// Rebuild a machine from a persisted phase (host reconnect).
    pub fn resume(question_count: usize, phase: SessionPhase) -> Self {
        Self {
            question_count,
            phase,
            version: 0,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Number of questions the session serves.
    pub fn question_count(&self) -> usize {
        self.question_count
    }

    /// Create a snapshot of the current machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the command applies from the
    /// current phase. Returns a [`Plan`] to later apply or abort.
    pub fn plan(&mut self, command: SessionCommand) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(command)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            command,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the machine to the next phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(
        &self,
        command: SessionCommand,
    ) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self.phase, command) {
            (SessionPhase::Waiting, SessionCommand::Start) => SessionPhase::Active { question: 0 },
            (SessionPhase::Active { question }, SessionCommand::Advance) => {
                if question + 1 < self.question_count {
                    SessionPhase::Active {
                        question: question + 1,
                    }
                } else {
                    SessionPhase::Completed
                }
            }
            (SessionPhase::Active { .. }, SessionCommand::Finish) => SessionPhase::Completed,
            (from, command) => return Err(InvalidTransition { from, command }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, command: SessionCommand) -> SessionPhase {
        let plan = sm.plan(command).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_waiting() {
        let sm = SessionStateMachine::new(3);
        assert_eq!(sm.phase(), SessionPhase::Waiting);
    }

    #[test]
    fn full_happy_path_through_three_questions() {
        let mut sm = SessionStateMachine::new(3);

        assert_eq!(
            apply(&mut sm, SessionCommand::Start),
            SessionPhase::Active { question: 0 }
        );
        assert_eq!(
            apply(&mut sm, SessionCommand::Advance),
            SessionPhase::Active { question: 1 }
        );
        assert_eq!(
            apply(&mut sm, SessionCommand::Advance),
            SessionPhase::Active { question: 2 }
        );
        assert_eq!(apply(&mut sm, SessionCommand::Advance), SessionPhase::Completed);
    }

    #[test]
    fn waiting_cannot_jump_straight_to_completed() {
        let mut sm = SessionStateMachine::new(2);
        let err = sm.plan(SessionCommand::Finish).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, SessionPhase::Waiting);
                assert_eq!(invalid.command, SessionCommand::Finish);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn completed_is_terminal() {
        let mut sm = SessionStateMachine::new(1);
        apply(&mut sm, SessionCommand::Start);
        apply(&mut sm, SessionCommand::Advance);
        assert_eq!(sm.phase(), SessionPhase::Completed);

        for command in [
            SessionCommand::Start,
            SessionCommand::Advance,
            SessionCommand::Finish,
        ] {
            assert!(matches!(
                sm.plan(command),
                Err(PlanError::InvalidTransition(_))
            ));
        }
    }

    #[test]
    fn finish_ends_a_running_session_early() {
        let mut sm = SessionStateMachine::new(5);
        apply(&mut sm, SessionCommand::Start);
        apply(&mut sm, SessionCommand::Advance);
        assert_eq!(apply(&mut sm, SessionCommand::Finish), SessionPhase::Completed);
    }

    #[test]
    fn planning_twice_without_applying_fails() {
        let mut sm = SessionStateMachine::new(2);
        let _plan = sm.plan(SessionCommand::Start).unwrap();
        assert!(matches!(
            sm.plan(SessionCommand::Start),
            Err(PlanError::AlreadyPending)
        ));

        let snapshot = sm.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Waiting);
        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.pending, Some(SessionPhase::Active { question: 0 }));
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = SessionStateMachine::new(2);
        let plan = sm.plan(SessionCommand::Start).unwrap();
        sm.abort(plan.id).unwrap();
        assert_eq!(sm.phase(), SessionPhase::Waiting);
        assert!(sm.plan(SessionCommand::Start).is_ok());
    }

    #[test]
    fn apply_with_wrong_plan_id_keeps_the_plan() {
        let mut sm = SessionStateMachine::new(2);
        let plan = sm.plan(SessionCommand::Start).unwrap();
        let bogus = Uuid::new_v4();
        assert!(matches!(
            sm.apply(bogus),
            Err(ApplyError::IdMismatch { .. })
        ));
        // Original plan is still applicable.
        assert_eq!(
            sm.apply(plan.id).unwrap(),
            SessionPhase::Active { question: 0 }
        );
    }

    #[test]
    fn resume_restores_a_mid_game_phase() {
        let sm = SessionStateMachine::resume(4, SessionPhase::Active { question: 2 });
        assert_eq!(sm.phase().status(), SessionStatus::Active);
        assert_eq!(sm.phase().question_index(), Some(2));
    }
}
