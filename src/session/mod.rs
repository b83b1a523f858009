//! Session lifecycle ownership.

pub mod state_machine;

pub use self::state_machine::{
    AbortError, ApplyError, InvalidTransition, Plan, PlanError, PlanId, SessionCommand,
    SessionPhase, SessionStateMachine, Snapshot,
};
