//! Durable audit history with a local fallback buffer.
//!
//! The backend store (reached over the native command channel) is the source
//! of truth. Writes go there first and fall back to the [`PendingBuffer`]
//! only when the backend is unavailable; buffered entries are pushed in bulk
//! at startup and the buffer is cleared regardless of outcome. That is an
//! accepted at-most-once-delivery tradeoff: a drain that fails to push loses
//! those entries rather than retrying forever.

use crate::error::Result;
use crate::native::NativeCommands;
use crate::pending::PendingBuffer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

pub const RECORD_TYPE_MACHINE_RESET: &str = "machine-id-reset";
pub const RECORD_TYPE_ACCOUNT_SWITCH: &str = "account-switch";
pub const RECORD_TYPE_SAVED_ACCOUNT_SWITCH: &str = "saved-account-switch";
pub const RECORD_TYPE_SYSTEM_CONTROL: &str = "system-control";

/// Premium-model cap assumed when an account never reported one.
const DEFAULT_PREMIUM_CAP: u32 = 500;

/// Usage share (percent) at which an account counts as exhausted.
const HIGH_USAGE_THRESHOLD_PERCENT: u32 = 90;

/// Append-only audit entry. `id` is monotonic and time-derived; descending
/// `id` is the canonical display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub type_name: String,
    pub detail: String,
    pub timestamp: String,
    pub operator: String,
}

/// Per-account usage snapshot, upserted keyed by `email`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryAccount {
    pub email: String,
    pub token: String,
    pub machine_code: String,
    pub gpt4_count: u32,
    pub gpt35_count: u32,
    #[serde(default)]
    pub gpt4_max_usage: Option<u32>,
    #[serde(default)]
    pub gpt35_max_usage: Option<u32>,
    /// Milliseconds since the epoch; touched on every switch to or capture
    /// of this account.
    pub last_used: i64,
}

impl HistoryAccount {
    /// Whether the premium-model quota is effectively exhausted.
    pub fn is_high_usage(&self) -> bool {
        let cap = self.gpt4_max_usage.unwrap_or(DEFAULT_PREMIUM_CAP);
        cap > 0 && self.gpt4_count.saturating_mul(100) >= cap.saturating_mul(HIGH_USAGE_THRESHOLD_PERCENT)
    }
}

/// Which tier accepted a history write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Backend,
    Buffered,
}

/// Merges locally buffered history into the durable backend and exposes the
/// merged view.
pub struct HistoryReconciler<C> {
    commands: Arc<C>,
    buffer: PendingBuffer,
    operator: String,
    last_id: AtomicU64,
}

impl<C: NativeCommands> HistoryReconciler<C> {
    pub fn new(commands: Arc<C>, buffer: PendingBuffer, operator: String) -> Self {
        Self {
            commands,
            buffer,
            operator,
            last_id: AtomicU64::new(0),
        }
    }

    /// Builds a record stamped with the next monotonic id, the current time,
    /// and the configured operator.
    pub fn new_record(&self, type_name: &str, detail: String) -> HistoryRecord {
        HistoryRecord {
            id: self.next_id(),
            type_name: type_name.to_string(),
            detail,
            timestamp: Utc::now().to_rfc3339(),
            operator: self.operator.clone(),
        }
    }

    fn next_id(&self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        loop {
            let last = self.last_id.load(Ordering::Relaxed);
            let candidate = now.max(last + 1);
            if self
                .last_id
                .compare_exchange(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return candidate;
            }
        }
    }

    /// Pushes buffered records and accounts to the backend, clearing the
    /// buffer first. Failures are logged, never propagated: the triggering
    /// startup must not be blocked by history delivery.
    pub async fn drain_pending(&self) {
        match self.buffer.take_records() {
            Ok(records) if !records.is_empty() => {
                if let Err(err) = self.commands.save_history_records(&records).await {
                    warn!(error = %err, dropped = records.len(), "pending history push failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to read pending history records"),
        }

        match self.buffer.take_accounts() {
            Ok(accounts) => {
                for account in accounts {
                    if let Err(err) = self.commands.save_history_account(&account).await {
                        warn!(error = %err, email = %account.email, "pending account push failed");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to read pending history accounts"),
        }
    }

    /// Writes backend-first, buffering locally only on backend failure.
    pub async fn append(&self, record: HistoryRecord) -> AppendOutcome {
        match self.commands.save_history_record(&record).await {
            Ok(()) => AppendOutcome::Backend,
            Err(err) => {
                warn!(error = %err, "history backend write failed, buffering locally");
                if let Err(io_err) = self.buffer.append_record(&record) {
                    warn!(error = %io_err, "local history buffer write failed");
                }
                AppendOutcome::Buffered
            }
        }
    }

    /// Upserts an account record (keyed by email) backend-first, buffering
    /// on failure.
    pub async fn upsert_account(&self, account: HistoryAccount) -> AppendOutcome {
        match self.commands.save_history_account(&account).await {
            Ok(()) => AppendOutcome::Backend,
            Err(err) => {
                warn!(error = %err, email = %account.email, "account backend write failed, buffering locally");
                if let Err(io_err) = self.buffer.append_account(&account) {
                    warn!(error = %io_err, "local account buffer write failed");
                }
                AppendOutcome::Buffered
            }
        }
    }

    /// Touches an account after a switch to it: `last_used` always moves,
    /// token and machine code are refreshed, previously captured usage
    /// counters are preserved. Unknown accounts are inserted with zeroed
    /// counters until the next capture fills them in.
    pub async fn touch_account(
        &self,
        email: &str,
        token: &str,
        machine_code: &str,
    ) -> AppendOutcome {
        let existing = match self.commands.get_history_accounts().await {
            Ok(accounts) => accounts.into_iter().find(|a| a.email == email),
            Err(err) => {
                warn!(error = %err, "account lookup failed; treating as new account");
                None
            }
        };

        let mut account = existing.unwrap_or(HistoryAccount {
            email: email.to_string(),
            token: String::new(),
            machine_code: String::new(),
            gpt4_count: 0,
            gpt35_count: 0,
            gpt4_max_usage: None,
            gpt35_max_usage: None,
            last_used: 0,
        });
        account.token = token.to_string();
        account.machine_code = machine_code.to_string();
        account.last_used = Utc::now().timestamp_millis();

        self.upsert_account(account).await
    }

    /// Backend records as the source of truth, in canonical display order
    /// (id descending).
    pub async fn list_merged(&self) -> Result<Vec<HistoryRecord>> {
        let mut records = self.commands.get_history_records().await?;
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }

    pub async fn list_accounts(&self) -> Result<Vec<HistoryAccount>> {
        Ok(self.commands.get_history_accounts().await?)
    }

    pub async fn remove_account(&self, email: &str) -> Result<()> {
        Ok(self.commands.remove_history_account(email).await?)
    }

    pub async fn high_usage_accounts(&self) -> Result<Vec<HistoryAccount>> {
        let accounts = self.list_accounts().await?;
        Ok(accounts.into_iter().filter(HistoryAccount::is_high_usage).collect())
    }

    /// Removes all accounts whose premium quota is exhausted. Returns how
    /// many were removed.
    pub async fn clear_high_usage_accounts(&self) -> Result<usize> {
        let high = self.high_usage_accounts().await?;
        for account in &high {
            self.commands.remove_history_account(&account.email).await?;
        }
        Ok(high.len())
    }

    /// Refreshes usage counters for every saved account by querying with its
    /// own token. Per-account failures are logged and skipped; returns the
    /// number of accounts updated.
    pub async fn refresh_accounts_usage(&self) -> Result<usize> {
        let accounts = self.list_accounts().await?;
        let mut updated = 0;
        for mut account in accounts {
            let usage = match self.commands.get_usage(&account.token).await {
                Ok(usage) => usage,
                Err(err) => {
                    warn!(error = %err, email = %account.email, "usage refresh failed for account");
                    continue;
                }
            };
            account.gpt4_count = usage.premium.num_requests;
            account.gpt35_count = usage.standard.num_requests;
            account.gpt4_max_usage = usage.premium.max_request_usage;
            account.gpt35_max_usage = usage.standard.max_request_usage;
            account.last_used = Utc::now().timestamp_millis();
            if let Err(err) = self.commands.save_history_account(&account).await {
                warn!(error = %err, email = %account.email, "usage refresh save failed");
                continue;
            }
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
#[path = "tests/history_tests.rs"]
mod tests;
