//! Command channel to the native host.
//!
//! Every externally risky operation (process control, launch-script patching,
//! identifier reset, credential swap, durable history) crosses this boundary
//! as a request/response command. The orchestrator owns no transport details;
//! it only depends on the [`NativeCommands`] contract, which makes the whole
//! subsystem testable against a scripted fake.

use crate::history::{HistoryAccount, HistoryRecord};
use crate::identity::ResetOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure signals the native host can report.
///
/// These are typed rather than matched out of message strings so that callers
/// can branch exhaustively. `MainJsNotFound` is deliberately distinct from a
/// negative hook query: the target path itself is unresolved, so the query is
/// indeterminate, not `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("transport error: {0}")]
    Transport(String),
    /// The target editor process is running and the command refused to touch
    /// its files.
    #[error("target process is running")]
    ProcessRunning,
    /// The launch script could not be located; hook queries and mutations
    /// cannot proceed until a path is resolved out of band.
    #[error("launch script not found")]
    MainJsNotFound,
    #[error("authentication expired or rejected")]
    AuthExpired,
    /// The history backend is unreachable. Never fatal to a workflow; the
    /// reconciler buffers locally instead.
    #[error("history backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("{0}")]
    Other(String),
}

/// The machine-facing identity triple.
///
/// Owned by the orchestrator's current-state cache and always replaced as a
/// whole: the three fields describe one installation state and are never
/// updated piecemeal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineIdentity {
    pub machine_id: String,
    pub current_account: String,
    pub credential_token: String,
}

/// Entitlement counters for the signed-in pool user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: Option<String>,
    pub total_count: u32,
    pub used_count: u32,
    #[serde(default)]
    pub expire_time: Option<String>,
    #[serde(default)]
    pub level: u32,
}

/// Per-model request counters reported by the editor account backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub num_requests: u32,
    #[serde(default)]
    pub max_request_usage: Option<u32>,
}

/// Usage snapshot for the currently signed-in editor account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Premium-model usage (the gated, quota-bearing tier).
    pub premium: ModelUsage,
    /// Standard-model usage.
    pub standard: ModelUsage,
}

/// Candidate credential returned by the account pool.
///
/// Both fields are optional on the wire; callers must validate that both are
/// present before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccount {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Envelope for a pool fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPayload {
    pub account_info: PoolAccount,
    #[serde(default)]
    pub activation_code: Option<String>,
}

/// The full native command surface the orchestrator depends on.
///
/// Implementations are expected to be request/response with no streaming.
/// None of these commands are retried here; retry policy belongs to the
/// orchestrator.
#[async_trait]
pub trait NativeCommands: Send + Sync {
    async fn check_cursor_running(&self) -> Result<bool, NativeError>;
    async fn kill_cursor_process(&self) -> Result<(), NativeError>;
    async fn close_cursor(&self) -> Result<bool, NativeError>;
    async fn launch_cursor(&self) -> Result<bool, NativeError>;

    /// Queries whether the launch-script hook is applied.
    async fn is_hook(&self) -> Result<bool, NativeError>;
    async fn hook_main_js(&self, force_kill: bool) -> Result<(), NativeError>;
    async fn restore_hook(&self, force_kill: bool) -> Result<(), NativeError>;

    /// Resets the machine identifier. A pinned id in `options` restores a
    /// specific historical identity instead of generating a fresh one.
    async fn reset_machine_id(&self, options: &ResetOptions) -> Result<bool, NativeError>;

    /// Swaps the authenticated account credential. A `false` result is a
    /// rejection even when no error is raised; callers must check it.
    async fn switch_account(
        &self,
        email: &str,
        token: &str,
        force_kill: bool,
    ) -> Result<bool, NativeError>;

    async fn get_machine_ids(&self) -> Result<MachineIdentity, NativeError>;

    /// Fetches one candidate account from the pool.
    async fn get_account(
        &self,
        pool_selector: Option<&str>,
        usage_count: Option<&str>,
    ) -> Result<AccountPayload, NativeError>;

    async fn get_user_info(&self) -> Result<UserInfo, NativeError>;

    /// Usage lookup for an arbitrary credential token (the current one, or a
    /// saved account's).
    async fn get_usage(&self, token: &str) -> Result<UsageSnapshot, NativeError>;

    async fn save_history_record(&self, record: &HistoryRecord) -> Result<(), NativeError>;
    async fn save_history_records(&self, records: &[HistoryRecord]) -> Result<(), NativeError>;
    async fn get_history_records(&self) -> Result<Vec<HistoryRecord>, NativeError>;

    async fn save_history_account(&self, account: &HistoryAccount) -> Result<(), NativeError>;
    async fn get_history_accounts(&self) -> Result<Vec<HistoryAccount>, NativeError>;
    async fn remove_history_account(&self, email: &str) -> Result<(), NativeError>;
}
