//! The two mutating identity primitives.
//!
//! Neither operation is idempotent. They are invoked exactly once per
//! workflow step; retry policy, if any, belongs to the orchestrator.

use crate::error::{Result, SwitchError};
use crate::native::NativeCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Options for a machine identifier reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetOptions {
    pub force_kill: bool,
    /// When set, pins the new identifier instead of generating a fresh one.
    /// Used when restoring a specific historical identity.
    #[serde(default)]
    pub machine_id: Option<String>,
}

impl ResetOptions {
    pub fn pinned(machine_id: impl Into<String>) -> Self {
        Self {
            force_kill: false,
            machine_id: Some(machine_id.into()),
        }
    }
}

pub struct IdentityMutator<C> {
    commands: Arc<C>,
}

impl<C: NativeCommands> IdentityMutator<C> {
    pub fn new(commands: Arc<C>) -> Self {
        Self { commands }
    }

    pub async fn reset_machine_id(&self, options: &ResetOptions) -> Result<()> {
        self.commands.reset_machine_id(options).await?;
        Ok(())
    }

    /// Swaps the authenticated account. The native call can report rejection
    /// as a `false` result without raising an error, so the result is checked
    /// explicitly.
    pub async fn switch_account(&self, email: &str, token: &str, force_kill: bool) -> Result<()> {
        let accepted = self
            .commands
            .switch_account(email, token, force_kill)
            .await?;
        if !accepted {
            return Err(SwitchError::SwitchRejected);
        }
        Ok(())
    }
}
