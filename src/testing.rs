//! Scripted fake of the native command channel for unit tests.
//!
//! Every command appends its name to a call log so tests can assert both
//! presence and relative ordering of native calls.

use crate::history::{HistoryAccount, HistoryRecord};
use crate::identity::ResetOptions;
use crate::native::{
    AccountPayload, MachineIdentity, ModelUsage, NativeCommands, NativeError, PoolAccount,
    UsageSnapshot, UserInfo,
};
use async_trait::async_trait;
use std::sync::Mutex;

/// What a hook query should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookProbe {
    Applied,
    NotApplied,
    /// Launch script path unresolved: queries fail with `MainJsNotFound`.
    Missing,
    /// Transport-level failure on every hook query.
    Broken,
}

pub struct MockNative {
    calls: Mutex<Vec<String>>,
    pub running: Mutex<bool>,
    /// Refuses to die when killed (drives the close-timeout path).
    pub stubborn: Mutex<bool>,
    kill_requested: Mutex<bool>,
    /// Liveness polls the process survives after a kill before exiting.
    pub linger_polls: Mutex<u32>,
    pub hook_probe: Mutex<HookProbe>,
    pub machine: Mutex<MachineIdentity>,
    pub user: Mutex<UserInfo>,
    pub usage: Mutex<UsageSnapshot>,
    pub pool: Mutex<Option<PoolAccount>>,
    pub switch_accepted: Mutex<bool>,
    pub reset_error: Mutex<Option<NativeError>>,
    pub backend_down: Mutex<bool>,
    pub records: Mutex<Vec<HistoryRecord>>,
    pub accounts: Mutex<Vec<HistoryAccount>>,
    pub launch_fails: Mutex<bool>,
}

impl MockNative {
    /// Editor not running, hook applied, plenty of credit, one pool account.
    pub fn idle() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            running: Mutex::new(false),
            stubborn: Mutex::new(false),
            kill_requested: Mutex::new(false),
            linger_polls: Mutex::new(0),
            hook_probe: Mutex::new(HookProbe::Applied),
            machine: Mutex::new(MachineIdentity {
                machine_id: "machine-original".to_string(),
                current_account: "old@example.com".to_string(),
                credential_token: "tok-old".to_string(),
            }),
            user: Mutex::new(UserInfo {
                username: Some("tester".to_string()),
                total_count: 10,
                used_count: 0,
                expire_time: None,
                level: 1,
            }),
            usage: Mutex::new(UsageSnapshot {
                premium: ModelUsage {
                    num_requests: 12,
                    max_request_usage: Some(150),
                },
                standard: ModelUsage {
                    num_requests: 40,
                    max_request_usage: Some(500),
                },
            }),
            pool: Mutex::new(Some(PoolAccount {
                account: Some("new@example.com".to_string()),
                token: Some("tok-new".to_string()),
            })),
            switch_accepted: Mutex::new(true),
            reset_error: Mutex::new(None),
            backend_down: Mutex::new(false),
            records: Mutex::new(Vec::new()),
            accounts: Mutex::new(Vec::new()),
            launch_fails: Mutex::new(false),
        }
    }

    /// Like [`MockNative::idle`] but with the editor running.
    pub fn running() -> Self {
        let mock = Self::idle();
        *mock.running.lock().unwrap() = true;
        mock
    }

    fn record_call(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == name)
    }

    pub fn call_index(&self, name: &str) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == name)
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn process_blocked(&self, force_kill: bool) -> bool {
        *self.running.lock().unwrap() && !force_kill
    }
}

#[async_trait]
impl NativeCommands for MockNative {
    async fn check_cursor_running(&self) -> Result<bool, NativeError> {
        self.record_call("check_cursor_running");
        let mut running = self.running.lock().unwrap();
        if *running && *self.kill_requested.lock().unwrap() && !*self.stubborn.lock().unwrap() {
            let mut linger = self.linger_polls.lock().unwrap();
            if *linger == 0 {
                *running = false;
            } else {
                *linger -= 1;
            }
        }
        Ok(*running)
    }

    async fn kill_cursor_process(&self) -> Result<(), NativeError> {
        self.record_call("kill_cursor_process");
        *self.kill_requested.lock().unwrap() = true;
        Ok(())
    }

    async fn close_cursor(&self) -> Result<bool, NativeError> {
        self.record_call("close_cursor");
        let mut running = self.running.lock().unwrap();
        let was_running = *running;
        *running = false;
        Ok(was_running)
    }

    async fn launch_cursor(&self) -> Result<bool, NativeError> {
        self.record_call("launch_cursor");
        if *self.launch_fails.lock().unwrap() {
            return Err(NativeError::Other("launch failed".to_string()));
        }
        *self.running.lock().unwrap() = true;
        Ok(true)
    }

    async fn is_hook(&self) -> Result<bool, NativeError> {
        self.record_call("is_hook");
        match *self.hook_probe.lock().unwrap() {
            HookProbe::Applied => Ok(true),
            HookProbe::NotApplied => Ok(false),
            HookProbe::Missing => Err(NativeError::MainJsNotFound),
            HookProbe::Broken => Err(NativeError::Transport("hook query failed".to_string())),
        }
    }

    async fn hook_main_js(&self, force_kill: bool) -> Result<(), NativeError> {
        self.record_call("hook_main_js");
        if self.process_blocked(force_kill) {
            return Err(NativeError::ProcessRunning);
        }
        let mut probe = self.hook_probe.lock().unwrap();
        if *probe == HookProbe::Missing {
            return Err(NativeError::MainJsNotFound);
        }
        *probe = HookProbe::Applied;
        Ok(())
    }

    async fn restore_hook(&self, force_kill: bool) -> Result<(), NativeError> {
        self.record_call("restore_hook");
        if self.process_blocked(force_kill) {
            return Err(NativeError::ProcessRunning);
        }
        let mut probe = self.hook_probe.lock().unwrap();
        if *probe == HookProbe::Missing {
            return Err(NativeError::MainJsNotFound);
        }
        *probe = HookProbe::NotApplied;
        Ok(())
    }

    async fn reset_machine_id(&self, options: &ResetOptions) -> Result<bool, NativeError> {
        self.record_call("reset_machine_id");
        if let Some(err) = self.reset_error.lock().unwrap().clone() {
            return Err(err);
        }
        if self.process_blocked(options.force_kill) {
            return Err(NativeError::ProcessRunning);
        }
        let mut machine = self.machine.lock().unwrap();
        machine.machine_id = options
            .machine_id
            .clone()
            .unwrap_or_else(|| "machine-fresh".to_string());
        Ok(true)
    }

    async fn switch_account(
        &self,
        email: &str,
        token: &str,
        force_kill: bool,
    ) -> Result<bool, NativeError> {
        self.record_call("switch_account");
        if self.process_blocked(force_kill) {
            return Err(NativeError::ProcessRunning);
        }
        if !*self.switch_accepted.lock().unwrap() {
            return Ok(false);
        }
        let mut machine = self.machine.lock().unwrap();
        machine.current_account = email.to_string();
        machine.credential_token = token.to_string();
        Ok(true)
    }

    async fn get_machine_ids(&self) -> Result<MachineIdentity, NativeError> {
        self.record_call("get_machine_ids");
        Ok(self.machine.lock().unwrap().clone())
    }

    async fn get_account(
        &self,
        _pool_selector: Option<&str>,
        _usage_count: Option<&str>,
    ) -> Result<AccountPayload, NativeError> {
        self.record_call("get_account");
        let account_info = self
            .pool
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(PoolAccount {
                account: None,
                token: None,
            });
        Ok(AccountPayload {
            account_info,
            activation_code: None,
        })
    }

    async fn get_user_info(&self) -> Result<UserInfo, NativeError> {
        self.record_call("get_user_info");
        Ok(self.user.lock().unwrap().clone())
    }

    async fn get_usage(&self, _token: &str) -> Result<UsageSnapshot, NativeError> {
        self.record_call("get_usage");
        Ok(self.usage.lock().unwrap().clone())
    }

    async fn save_history_record(&self, record: &HistoryRecord) -> Result<(), NativeError> {
        self.record_call("save_history_record");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn save_history_records(&self, records: &[HistoryRecord]) -> Result<(), NativeError> {
        self.record_call("save_history_records");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn get_history_records(&self) -> Result<Vec<HistoryRecord>, NativeError> {
        self.record_call("get_history_records");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn save_history_account(&self, account: &HistoryAccount) -> Result<(), NativeError> {
        self.record_call("save_history_account");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.iter_mut().find(|a| a.email == account.email) {
            Some(existing) => *existing = account.clone(),
            None => accounts.push(account.clone()),
        }
        Ok(())
    }

    async fn get_history_accounts(&self) -> Result<Vec<HistoryAccount>, NativeError> {
        self.record_call("get_history_accounts");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        Ok(self.accounts.lock().unwrap().clone())
    }

    async fn remove_history_account(&self, email: &str) -> Result<(), NativeError> {
        self.record_call("remove_history_account");
        if *self.backend_down.lock().unwrap() {
            return Err(NativeError::BackendUnavailable("backend offline".to_string()));
        }
        self.accounts.lock().unwrap().retain(|a| a.email != email);
        Ok(())
    }
}
