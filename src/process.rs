//! Process lifecycle guard for the target editor.

use crate::config::SwitchConfig;
use crate::error::{Result, SwitchError};
use crate::native::NativeCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Queries and controls whether the target editor process is running.
///
/// `ensure_not_running` is the precondition every mutating operation takes:
/// either the process is already gone, or the caller has authorized a kill
/// and we wait (bounded) for the process to actually exit.
pub struct ProcessGuard<C> {
    commands: Arc<C>,
    kill_wait: Duration,
    poll_interval: Duration,
    settle_delay: Duration,
}

impl<C> Clone for ProcessGuard<C> {
    fn clone(&self) -> Self {
        Self {
            commands: Arc::clone(&self.commands),
            kill_wait: self.kill_wait,
            poll_interval: self.poll_interval,
            settle_delay: self.settle_delay,
        }
    }
}

impl<C: NativeCommands> ProcessGuard<C> {
    pub fn new(commands: Arc<C>, config: &SwitchConfig) -> Self {
        Self {
            commands,
            kill_wait: config.kill_wait(),
            poll_interval: config.poll_interval(),
            settle_delay: config.settle_delay(),
        }
    }

    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.commands.check_cursor_running().await?)
    }

    /// Fails with [`SwitchError::ProcessConflict`] if the process is running
    /// and `force_kill` is false. With `force_kill` it kills the process and
    /// waits for exit, failing with [`SwitchError::ProcessCloseTimeout`] if
    /// the process never goes away.
    pub async fn ensure_not_running(&self, force_kill: bool) -> Result<()> {
        if !self.is_running().await? {
            return Ok(());
        }
        if !force_kill {
            return Err(SwitchError::ProcessConflict);
        }
        self.commands.kill_cursor_process().await?;
        self.wait_for_exit().await
    }

    async fn wait_for_exit(&self) -> Result<()> {
        let deadline = Instant::now() + self.kill_wait;
        loop {
            if !self.is_running().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SwitchError::ProcessCloseTimeout(self.kill_wait));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Requests a graceful close.
    pub async fn close(&self) -> Result<bool> {
        Ok(self.commands.close_cursor().await?)
    }

    pub async fn launch(&self) -> Result<bool> {
        Ok(self.commands.launch_cursor().await?)
    }

    /// Fixed delay after a forced close so file locks release before any
    /// mutation touches the editor's files.
    pub async fn settle(&self) {
        tokio::time::sleep(self.settle_delay).await;
    }
}

#[cfg(test)]
#[path = "tests/process_tests.rs"]
mod tests;
