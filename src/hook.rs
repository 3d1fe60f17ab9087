//! Launch-script hook state tracking and mutation.

use crate::error::{Result, SwitchError};
use crate::native::{NativeCommands, NativeError};
use crate::process::ProcessGuard;
use std::sync::Arc;

/// Whether the launch-time patch is applied to the editor.
///
/// `Unknown` is the only legal initial value. It collapses to
/// `Applied`/`NotApplied` after a successful query and is never left stale
/// across an apply/restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookState {
    #[default]
    Unknown,
    Applied,
    NotApplied,
}

impl HookState {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Queries and mutates the launch-script hook, keeping a cached [`HookState`]
/// in sync with the outcome of each call.
pub struct HookManager<C> {
    commands: Arc<C>,
    guard: ProcessGuard<C>,
    state: HookState,
}

impl<C: NativeCommands> HookManager<C> {
    pub fn new(commands: Arc<C>, guard: ProcessGuard<C>) -> Self {
        Self {
            commands,
            guard,
            state: HookState::Unknown,
        }
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    /// Idempotent query. A missing launch script leaves the cached state
    /// untouched (the query failed; that is not a negative result) and
    /// surfaces [`SwitchError::HookQueryIndeterminate`]. Any other query
    /// failure resets the cache to `Unknown` before propagating.
    pub async fn check(&mut self) -> Result<HookState> {
        match self.commands.is_hook().await {
            Ok(true) => self.state = HookState::Applied,
            Ok(false) => self.state = HookState::NotApplied,
            Err(NativeError::MainJsNotFound) => {
                return Err(SwitchError::HookQueryIndeterminate);
            }
            Err(err) => {
                self.state = HookState::Unknown;
                return Err(err.into());
            }
        }
        Ok(self.state)
    }

    /// Applies the hook. Requires the process guard precondition; a missing
    /// launch script leaves the cached state unchanged.
    pub async fn apply(&mut self, force_kill: bool) -> Result<()> {
        self.guard.ensure_not_running(force_kill).await?;
        self.commands.hook_main_js(force_kill).await?;
        self.state = HookState::Applied;
        Ok(())
    }

    /// Removes the hook. Symmetric to [`HookManager::apply`].
    pub async fn restore(&mut self, force_kill: bool) -> Result<()> {
        self.guard.ensure_not_running(force_kill).await?;
        self.commands.restore_hook(force_kill).await?;
        self.state = HookState::NotApplied;
        Ok(())
    }

    /// Queries, and applies only when the query result is not `Applied`.
    /// Never force-kills implicitly. Returns whether an apply happened.
    pub async fn ensure_applied(&mut self) -> Result<bool> {
        if self.check().await? == HookState::Applied {
            return Ok(false);
        }
        self.apply(false).await?;
        Ok(true)
    }
}

#[cfg(test)]
#[path = "tests/hook_tests.rs"]
mod tests;
