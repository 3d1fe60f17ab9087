//! Identity-switching orchestration for the Cursor editor.
//!
//! This crate coordinates the externally risky, non-idempotent operations
//! behind switching a device's editor identity: resetting the machine
//! identifier, swapping the authenticated account credential, keeping the
//! launch-script hook in place, controlling the editor's process lifecycle,
//! and recording a durable audit trail with a local fallback buffer.
//!
//! The actual mutations happen on the other side of a request/response
//! command channel ([`native::NativeCommands`]); this crate owns the
//! sequencing, partial-failure policy, and state caching around them. The
//! entry point is [`orchestrator::Orchestrator`], constructed at the
//! embedding application's composition root.

pub mod config;
pub mod credit;
pub mod error;
pub mod history;
pub mod hook;
pub mod identity;
pub mod native;
pub mod orchestrator;
pub mod pending;
pub mod process;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SwitchConfig;
pub use error::{Result, SwitchError};
pub use history::{HistoryAccount, HistoryRecord};
pub use hook::HookState;
pub use identity::ResetOptions;
pub use native::{MachineIdentity, NativeCommands, NativeError, UserInfo};
pub use orchestrator::{Orchestrator, SwitchRequest};
pub use state::{DeviceSnapshot, OrchestratorEvent, WorkflowKind, WorkflowPhase};
