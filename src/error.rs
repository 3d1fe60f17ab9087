//! Error taxonomy for the switching workflows.

use crate::native::NativeError;
use crate::state::{WorkflowKind, WorkflowPhase};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the orchestrator and its components.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// The target process is running and force-kill was not authorized.
    /// Recoverable: re-invoke the workflow with force-kill confirmed.
    #[error("target process is running; close it or confirm force kill")]
    ProcessConflict,

    /// Force-kill was requested but the process did not exit within the
    /// bounded wait. Not retried automatically.
    #[error("target process did not exit within {0:?}")]
    ProcessCloseTimeout(Duration),

    /// The hook query could not be resolved because the launch script path is
    /// unknown. Distinct from a `NotApplied` result; callers must not treat
    /// it as "needs apply".
    #[error("hook state indeterminate: launch script not found")]
    HookQueryIndeterminate,

    /// Computed locally before any externally visible side effect.
    #[error("insufficient credit: {available} available, {required} required")]
    InsufficientCredit { available: u32, required: u32 },

    /// The pool returned no usable credential, or the caller supplied a
    /// half-populated one.
    #[error("account pool did not supply a usable credential")]
    NoCredentialAvailable,

    /// The native layer reported a non-success switch result without raising
    /// an error.
    #[error("native layer rejected the account switch")]
    SwitchRejected,

    /// A workflow of the same kind is already running. The orchestrator never
    /// queues; the caller decides whether to retry.
    #[error("{0} workflow already in flight")]
    WorkflowInFlight(WorkflowKind),

    #[error("invalid workflow phase transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkflowPhase,
        to: WorkflowPhase,
    },

    #[error(transparent)]
    Native(NativeError),
}

impl SwitchError {
    /// True when the failure is recoverable by re-invoking the same workflow
    /// with force-kill confirmed. This is the one failure kind that needs a
    /// distinct UI branch (re-prompt) instead of a terminal message.
    pub fn needs_force_kill_confirmation(&self) -> bool {
        matches!(self, Self::ProcessConflict)
    }
}

impl From<NativeError> for SwitchError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::ProcessRunning => Self::ProcessConflict,
            NativeError::MainJsNotFound => Self::HookQueryIndeterminate,
            other => Self::Native(other),
        }
    }
}

pub type Result<T, E = SwitchError> = std::result::Result<T, E>;
