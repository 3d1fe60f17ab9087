//! Workflow phases, typed orchestrator events, and the observable device
//! snapshot.
//!
//! Cross-component signaling goes through typed channels instead of ad hoc
//! global events: the orchestrator broadcasts [`OrchestratorEvent`] values
//! after each transition and publishes the refreshed [`DeviceSnapshot`] on a
//! watch channel for UI-adjacent consumers.

use crate::error::SwitchError;
use crate::hook::HookState;
use crate::native::{MachineIdentity, UsageSnapshot, UserInfo};
use std::fmt;
use uuid::Uuid;

/// The user-facing workflow kinds. Each kind has its own advisory in-flight
/// flag in the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    ResetMachine,
    SwitchAccount,
    QuickChange,
    SavedAccountSwitch,
    HookMaintenance,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResetMachine => "reset-machine",
            Self::SwitchAccount => "switch-account",
            Self::QuickChange => "quick-change",
            Self::SavedAccountSwitch => "saved-account-switch",
            Self::HookMaintenance => "hook-maintenance",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation workflow phase.
///
/// `Aborted` is only reachable from `Guarding` (nothing has been mutated
/// yet); `Failed` is reachable from any later phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Idle,
    Guarding,
    HookEnsuring,
    CreditChecking,
    Mutating,
    HistoryAppending,
    Refreshing,
    Done,
    Aborted,
    Failed,
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Guarding => "Guarding",
            Self::HookEnsuring => "HookEnsuring",
            Self::CreditChecking => "CreditChecking",
            Self::Mutating => "Mutating",
            Self::HistoryAppending => "HistoryAppending",
            Self::Refreshing => "Refreshing",
            Self::Done => "Done",
            Self::Aborted => "Aborted",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// One workflow invocation: a correlation id, its kind, and the current
/// phase. Phase moves only through [`WorkflowRun::advance`], which validates
/// the transition; terminal `Aborted`/`Failed` states are stamped by the
/// orchestrator when it settles the run.
#[derive(Debug)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub kind: WorkflowKind,
    pub phase: WorkflowPhase,
}

impl WorkflowRun {
    pub fn new(kind: WorkflowKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            phase: WorkflowPhase::Idle,
        }
    }

    /// Moves to the next phase, rejecting transitions outside the documented
    /// sequence. The `HistoryAppending -> HookEnsuring` and
    /// `CreditChecking -> Mutating` edges exist for quick-change, which runs
    /// the reset leg and the switch leg inside one invocation.
    pub fn advance(&mut self, to: WorkflowPhase) -> Result<(), SwitchError> {
        use WorkflowPhase::*;

        let valid = matches!(
            (self.phase, to),
            (Idle, Guarding)
                | (Guarding, HookEnsuring)
                | (Guarding, Mutating)
                | (Guarding, Aborted)
                | (HookEnsuring, CreditChecking)
                | (HookEnsuring, Mutating)
                | (CreditChecking, Mutating)
                | (Mutating, HistoryAppending)
                | (HistoryAppending, HookEnsuring)
                | (HistoryAppending, Refreshing)
                | (Refreshing, Done)
                | (HookEnsuring, Failed)
                | (CreditChecking, Failed)
                | (Mutating, Failed)
                | (HistoryAppending, Failed)
                | (Refreshing, Failed)
        );

        if !valid {
            return Err(SwitchError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }
}

/// Typed events published by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    PhaseChanged {
        kind: WorkflowKind,
        from: WorkflowPhase,
        to: WorkflowPhase,
    },
    WorkflowCompleted {
        kind: WorkflowKind,
    },
    /// Terminated from `Guarding` before any mutation.
    WorkflowAborted {
        kind: WorkflowKind,
        reason: String,
    },
    WorkflowFailed {
        kind: WorkflowKind,
        reason: String,
    },
    /// The device snapshot was re-queried; observers should re-render.
    DeviceRefreshed,
    /// The history store changed; observers should re-list.
    HistoryUpdated,
}

/// Observable device state, re-queried at workflow start and after every
/// successful mutation. The identity triple is always replaced whole.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub identity: Option<MachineIdentity>,
    pub hook_state: HookState,
    pub user: Option<UserInfo>,
    pub usage: Option<UsageSnapshot>,
}
