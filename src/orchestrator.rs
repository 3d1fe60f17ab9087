//! Top-level identity-switching state machine.
//!
//! Composes the process guard, hook manager, identity mutator, credit gate,
//! and history reconciler into the user-facing workflows: reset the machine
//! identifier, switch the authenticated account, quick-change (reset +
//! switch), restore a saved account, and hook maintenance.
//!
//! The orchestrator is the only owner of the current-state cache. It never
//! trusts cached state across a mutation: every workflow re-queries the
//! device after its mutation succeeds, so observers never see a snapshot
//! older than the just-completed change. Mutations are never rolled back;
//! errors after `Mutating` surface with the mutation left in place.

use crate::config::SwitchConfig;
use crate::credit::CreditGate;
use crate::error::{Result, SwitchError};
use crate::history::{
    HistoryAccount, HistoryReconciler, RECORD_TYPE_ACCOUNT_SWITCH, RECORD_TYPE_MACHINE_RESET,
    RECORD_TYPE_SAVED_ACCOUNT_SWITCH, RECORD_TYPE_SYSTEM_CONTROL,
};
use crate::hook::HookManager;
use crate::identity::{IdentityMutator, ResetOptions};
use crate::native::{NativeCommands, UserInfo};
use crate::pending::PendingBuffer;
use crate::process::ProcessGuard;
use crate::state::{DeviceSnapshot, OrchestratorEvent, WorkflowKind, WorkflowPhase, WorkflowRun};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Caller input for an account switch. Leave both credential fields `None`
/// to draw exactly one candidate from the account pool; a half-populated
/// pair is rejected, never forwarded.
#[derive(Debug, Clone, Default)]
pub struct SwitchRequest {
    pub email: Option<String>,
    pub token: Option<String>,
    pub force_kill: bool,
}

/// Which hook mutation a maintenance workflow performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Apply,
    Restore,
}

/// Advisory per-kind in-flight flags. The orchestrator rejects a second
/// invocation of the same kind instead of queuing it; the embedding UI is
/// expected to prevent concurrent triggers, and these flags are the backstop
/// when it does not.
#[derive(Debug, Default)]
struct InFlight {
    reset: bool,
    switch: bool,
    quick: bool,
    saved: bool,
    hook: bool,
}

impl InFlight {
    fn flag_mut(&mut self, kind: WorkflowKind) -> &mut bool {
        match kind {
            WorkflowKind::ResetMachine => &mut self.reset,
            WorkflowKind::SwitchAccount => &mut self.switch,
            WorkflowKind::QuickChange => &mut self.quick,
            WorkflowKind::SavedAccountSwitch => &mut self.saved,
            WorkflowKind::HookMaintenance => &mut self.hook,
        }
    }

    fn flag(&self, kind: WorkflowKind) -> bool {
        match kind {
            WorkflowKind::ResetMachine => self.reset,
            WorkflowKind::SwitchAccount => self.switch,
            WorkflowKind::QuickChange => self.quick,
            WorkflowKind::SavedAccountSwitch => self.saved,
            WorkflowKind::HookMaintenance => self.hook,
        }
    }
}

/// The identity-switching orchestrator. Constructed once at the composition
/// root with the native command channel and configuration injected; tests
/// build a fresh one per case.
pub struct Orchestrator<C: NativeCommands> {
    commands: Arc<C>,
    config: SwitchConfig,
    guard: ProcessGuard<C>,
    hook: HookManager<C>,
    mutator: IdentityMutator<C>,
    gate: CreditGate,
    history: HistoryReconciler<C>,
    snapshot: DeviceSnapshot,
    snapshot_tx: watch::Sender<DeviceSnapshot>,
    events_tx: broadcast::Sender<OrchestratorEvent>,
    in_flight: InFlight,
}

impl<C: NativeCommands> Orchestrator<C> {
    /// Builds the orchestrator and returns a watch receiver for device
    /// snapshots. Call [`Orchestrator::init`] before running workflows.
    pub fn new(commands: Arc<C>, config: SwitchConfig) -> (Self, watch::Receiver<DeviceSnapshot>) {
        let guard = ProcessGuard::new(Arc::clone(&commands), &config);
        let hook = HookManager::new(Arc::clone(&commands), guard.clone());
        let mutator = IdentityMutator::new(Arc::clone(&commands));
        let gate = CreditGate::new(config.credits_per_unit);
        let history = HistoryReconciler::new(
            Arc::clone(&commands),
            PendingBuffer::new(config.pending_dir()),
            config.operator.clone(),
        );
        let (snapshot_tx, snapshot_rx) = watch::channel(DeviceSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let orchestrator = Self {
            commands,
            config,
            guard,
            hook,
            mutator,
            gate,
            history,
            snapshot: DeviceSnapshot::default(),
            snapshot_tx,
            events_tx,
            in_flight: InFlight::default(),
        };
        (orchestrator, snapshot_rx)
    }

    /// Subscribes to orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn history(&self) -> &HistoryReconciler<C> {
        &self.history
    }

    pub fn is_in_flight(&self, kind: WorkflowKind) -> bool {
        self.in_flight.flag(kind)
    }

    /// Startup: drain the local history buffer into the backend, then take
    /// the first device snapshot.
    pub async fn init(&mut self) -> Result<()> {
        self.history.drain_pending().await;
        self.emit(OrchestratorEvent::HistoryUpdated);
        self.refresh().await
    }

    /// Re-queries machine identity, hook state, and (best-effort) usage,
    /// then publishes the snapshot. An indeterminate hook query keeps the
    /// previous hook state rather than failing the refresh.
    pub async fn refresh(&mut self) -> Result<()> {
        let identity = self.commands.get_machine_ids().await?;
        self.snapshot.identity = Some(identity);

        match self.hook.check().await {
            Ok(state) => self.snapshot.hook_state = state,
            Err(SwitchError::HookQueryIndeterminate) => {
                warn!("hook state indeterminate during refresh; keeping previous state");
                self.snapshot.hook_state = self.hook.state();
            }
            Err(err) => return Err(err),
        }

        self.fetch_usage_best_effort().await;
        self.publish_snapshot();
        self.emit(OrchestratorEvent::DeviceRefreshed);
        Ok(())
    }

    /// Resets the machine identifier.
    pub async fn reset_machine(&mut self, options: ResetOptions) -> Result<()> {
        let mut run = self.begin(WorkflowKind::ResetMachine)?;
        let result = self.run_reset_machine(&mut run, &options).await;
        self.finish(&mut run, &result);
        result
    }

    /// Switches the authenticated account.
    pub async fn switch_account(&mut self, request: SwitchRequest) -> Result<()> {
        let mut run = self.begin(WorkflowKind::SwitchAccount)?;
        let result = self.run_switch_account(&mut run, &request).await;
        self.finish(&mut run, &result);
        result
    }

    /// Resets the identifier and switches the account as one logical unit.
    /// If the reset succeeds and the switch fails, the reset stays applied
    /// (no rollback) and its history record remains.
    pub async fn quick_change(&mut self, request: SwitchRequest) -> Result<()> {
        let mut run = self.begin(WorkflowKind::QuickChange)?;
        let result = self.run_quick_change(&mut run, &request).await;
        self.finish(&mut run, &result);
        result
    }

    /// Restores a previously captured account: the stored machine code is
    /// pinned back before the credential swap. No credit gate; the account
    /// was already paid for when first acquired.
    pub async fn switch_to_saved_account(
        &mut self,
        account: &HistoryAccount,
        force_kill: bool,
    ) -> Result<()> {
        let mut run = self.begin(WorkflowKind::SavedAccountSwitch)?;
        let result = self
            .run_saved_account_switch(&mut run, account, force_kill)
            .await;
        self.finish(&mut run, &result);
        result
    }

    pub async fn apply_hook(&mut self, force_kill: bool) -> Result<()> {
        let mut run = self.begin(WorkflowKind::HookMaintenance)?;
        let result = self
            .run_hook_maintenance(&mut run, HookAction::Apply, force_kill)
            .await;
        self.finish(&mut run, &result);
        result
    }

    pub async fn restore_hook(&mut self, force_kill: bool) -> Result<()> {
        let mut run = self.begin(WorkflowKind::HookMaintenance)?;
        let result = self
            .run_hook_maintenance(&mut run, HookAction::Restore, force_kill)
            .await;
        self.finish(&mut run, &result);
        result
    }

    async fn run_reset_machine(
        &mut self,
        run: &mut WorkflowRun,
        options: &ResetOptions,
    ) -> Result<()> {
        self.advance(run, WorkflowPhase::Guarding)?;
        let forced = self.guard_entry(options.force_kill).await?;

        self.advance(run, WorkflowPhase::Mutating)?;
        self.mutator.reset_machine_id(options).await?;

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        self.append_reset_record().await;

        self.advance(run, WorkflowPhase::Refreshing)?;
        self.refresh().await?;

        self.relaunch_if_forced(forced).await;
        self.advance(run, WorkflowPhase::Done)
    }

    async fn run_switch_account(
        &mut self,
        run: &mut WorkflowRun,
        request: &SwitchRequest,
    ) -> Result<()> {
        self.advance(run, WorkflowPhase::Guarding)?;
        let forced = self.guard_entry(request.force_kill).await?;
        self.capture_outgoing_account().await;

        self.advance(run, WorkflowPhase::HookEnsuring)?;
        self.hook.ensure_applied().await?;
        self.snapshot.hook_state = self.hook.state();

        self.advance(run, WorkflowPhase::CreditChecking)?;
        let user = self.fetch_user_info().await?;
        self.gate.require(&user, self.config.switch_credit_cost)?;
        let (email, token) = self.resolve_credential(request).await?;

        self.advance(run, WorkflowPhase::Mutating)?;
        self.mutator
            .switch_account(&email, &token, request.force_kill)
            .await?;

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        self.append_switch_record(&email, &token).await;

        self.advance(run, WorkflowPhase::Refreshing)?;
        self.refresh().await?;
        self.fetch_user_info().await?;

        self.relaunch_if_forced(forced).await;
        self.advance(run, WorkflowPhase::Done)
    }

    async fn run_quick_change(
        &mut self,
        run: &mut WorkflowRun,
        request: &SwitchRequest,
    ) -> Result<()> {
        self.advance(run, WorkflowPhase::Guarding)?;
        let forced = self.guard_entry(request.force_kill).await?;
        self.capture_outgoing_account().await;

        // Reset leg. The identifier reset stands on its own even when the
        // switch leg fails below.
        self.advance(run, WorkflowPhase::Mutating)?;
        let reset_options = ResetOptions {
            force_kill: request.force_kill,
            machine_id: None,
        };
        self.mutator.reset_machine_id(&reset_options).await?;

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        self.append_reset_record().await;

        // Switch leg.
        self.advance(run, WorkflowPhase::HookEnsuring)?;
        self.hook.ensure_applied().await?;
        self.snapshot.hook_state = self.hook.state();

        self.advance(run, WorkflowPhase::CreditChecking)?;
        let user = self.fetch_user_info().await?;
        self.gate.require(&user, self.config.switch_credit_cost)?;
        let (email, token) = self.resolve_credential(request).await?;

        self.advance(run, WorkflowPhase::Mutating)?;
        self.mutator
            .switch_account(&email, &token, request.force_kill)
            .await?;

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        self.append_switch_record(&email, &token).await;

        self.advance(run, WorkflowPhase::Refreshing)?;
        self.refresh().await?;
        self.fetch_user_info().await?;

        self.relaunch_if_forced(forced).await;
        self.advance(run, WorkflowPhase::Done)
    }

    async fn run_saved_account_switch(
        &mut self,
        run: &mut WorkflowRun,
        account: &HistoryAccount,
        force_kill: bool,
    ) -> Result<()> {
        self.advance(run, WorkflowPhase::Guarding)?;
        let forced = self.guard_entry(force_kill).await?;

        self.advance(run, WorkflowPhase::HookEnsuring)?;
        self.hook.ensure_applied().await?;
        self.snapshot.hook_state = self.hook.state();

        self.advance(run, WorkflowPhase::Mutating)?;
        let options = ResetOptions {
            force_kill,
            machine_id: Some(account.machine_code.clone()),
        };
        self.mutator.reset_machine_id(&options).await?;
        self.mutator
            .switch_account(&account.email, &account.token, force_kill)
            .await?;

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        let record = self.history.new_record(
            RECORD_TYPE_SAVED_ACCOUNT_SWITCH,
            format!("switched to saved account: {}", account.email),
        );
        self.history.append(record).await;
        self.history
            .touch_account(&account.email, &account.token, &account.machine_code)
            .await;
        self.emit(OrchestratorEvent::HistoryUpdated);

        self.advance(run, WorkflowPhase::Refreshing)?;
        self.refresh().await?;

        self.relaunch_if_forced(forced).await;
        self.advance(run, WorkflowPhase::Done)
    }

    async fn run_hook_maintenance(
        &mut self,
        run: &mut WorkflowRun,
        action: HookAction,
        force_kill: bool,
    ) -> Result<()> {
        self.advance(run, WorkflowPhase::Guarding)?;
        let forced = self.guard_entry(force_kill).await?;

        self.advance(run, WorkflowPhase::Mutating)?;
        match action {
            HookAction::Apply => self.hook.apply(force_kill).await?,
            HookAction::Restore => self.hook.restore(force_kill).await?,
        }
        self.snapshot.hook_state = self.hook.state();

        self.advance(run, WorkflowPhase::HistoryAppending)?;
        let detail = match action {
            HookAction::Apply => "hook applied".to_string(),
            HookAction::Restore => "hook restored".to_string(),
        };
        let record = self.history.new_record(RECORD_TYPE_SYSTEM_CONTROL, detail);
        self.history.append(record).await;
        self.emit(OrchestratorEvent::HistoryUpdated);

        self.advance(run, WorkflowPhase::Refreshing)?;
        // Re-query so the cached state reflects what is actually on disk.
        match self.hook.check().await {
            Ok(state) => self.snapshot.hook_state = state,
            Err(SwitchError::HookQueryIndeterminate) => {
                warn!("hook state indeterminate after mutation; keeping transition result");
            }
            Err(err) => return Err(err),
        }
        self.publish_snapshot();
        self.emit(OrchestratorEvent::DeviceRefreshed);

        self.relaunch_if_forced(forced).await;
        self.advance(run, WorkflowPhase::Done)
    }

    /// Shared `Guarding` step: checks liveness, enforces the force-kill
    /// policy, and settles after a forced close. Returns whether a forced
    /// close actually happened (drives the relaunch at the end).
    async fn guard_entry(&mut self, force_kill: bool) -> Result<bool> {
        let was_running = self.guard.is_running().await?;
        self.guard.ensure_not_running(force_kill).await?;
        let forced = was_running && force_kill;
        if forced {
            self.guard.settle().await;
        }
        Ok(forced)
    }

    async fn fetch_user_info(&mut self) -> Result<UserInfo> {
        let user = self.commands.get_user_info().await?;
        self.snapshot.user = Some(user.clone());
        self.publish_snapshot();
        Ok(user)
    }

    async fn fetch_usage_best_effort(&mut self) {
        let token = match &self.snapshot.identity {
            Some(identity) if !identity.credential_token.is_empty() => {
                identity.credential_token.clone()
            }
            _ => return,
        };
        match self.commands.get_usage(&token).await {
            Ok(usage) => self.snapshot.usage = Some(usage),
            Err(err) => warn!(error = %err, "usage fetch failed; keeping previous snapshot"),
        }
    }

    async fn resolve_credential(&self, request: &SwitchRequest) -> Result<(String, String)> {
        match (&request.email, &request.token) {
            (Some(email), Some(token)) => Ok((email.clone(), token.clone())),
            (None, None) => {
                let payload = self
                    .commands
                    .get_account(self.config.pool_selector.as_deref(), Some("1"))
                    .await?;
                match (payload.account_info.account, payload.account_info.token) {
                    (Some(email), Some(token)) => Ok((email, token)),
                    _ => Err(SwitchError::NoCredentialAvailable),
                }
            }
            // A half-populated credential is never forwarded.
            _ => {
                warn!("credential with missing email or token rejected");
                Err(SwitchError::NoCredentialAvailable)
            }
        }
    }

    /// Captures the signed-in account into the account history before a
    /// switch replaces it. Best-effort: a missing identity or a backend
    /// failure must not block the switch itself.
    async fn capture_outgoing_account(&mut self) {
        let Some(identity) = self.snapshot.identity.clone() else {
            return;
        };
        if identity.current_account.is_empty() || identity.credential_token.is_empty() {
            return;
        }
        let usage = self.snapshot.usage.as_ref();
        let account = HistoryAccount {
            email: identity.current_account,
            token: identity.credential_token,
            machine_code: identity.machine_id,
            gpt4_count: usage.map_or(0, |u| u.premium.num_requests),
            gpt35_count: usage.map_or(0, |u| u.standard.num_requests),
            gpt4_max_usage: usage.and_then(|u| u.premium.max_request_usage),
            gpt35_max_usage: usage.and_then(|u| u.standard.max_request_usage),
            last_used: Utc::now().timestamp_millis(),
        };
        self.history.upsert_account(account).await;
        self.emit(OrchestratorEvent::HistoryUpdated);
    }

    async fn append_reset_record(&mut self) {
        let previous = self
            .snapshot
            .identity
            .as_ref()
            .map(|i| i.machine_id.clone())
            .unwrap_or_default();
        let record = self.history.new_record(
            RECORD_TYPE_MACHINE_RESET,
            format!("machine id reset (previous: {previous})"),
        );
        self.history.append(record).await;
        self.emit(OrchestratorEvent::HistoryUpdated);
    }

    async fn append_switch_record(&mut self, email: &str, token: &str) {
        let record = self.history.new_record(
            RECORD_TYPE_ACCOUNT_SWITCH,
            format!(
                "switched to account: {email} ({} credits)",
                self.config.switch_credit_cost
            ),
        );
        self.history.append(record).await;

        let machine_code = self
            .snapshot
            .identity
            .as_ref()
            .map(|i| i.machine_id.clone())
            .unwrap_or_default();
        self.history.touch_account(email, token, &machine_code).await;
        self.emit(OrchestratorEvent::HistoryUpdated);
    }

    /// Relaunches the editor after a forced workflow. A relaunch failure is
    /// logged and swallowed: the mutation the user asked for has already
    /// happened.
    async fn relaunch_if_forced(&self, forced: bool) {
        if !forced || !self.config.relaunch_after_force_kill {
            return;
        }
        match self.guard.launch().await {
            Ok(_) => info!("relaunched editor after forced workflow"),
            Err(err) => warn!(error = %err, "relaunch failed; mutation already applied"),
        }
    }

    fn begin(&mut self, kind: WorkflowKind) -> Result<WorkflowRun> {
        let flag = self.in_flight.flag_mut(kind);
        if *flag {
            return Err(SwitchError::WorkflowInFlight(kind));
        }
        *flag = true;
        let run = WorkflowRun::new(kind);
        info!(run = %run.id, kind = %kind, "workflow started");
        Ok(run)
    }

    fn finish(&mut self, run: &mut WorkflowRun, result: &Result<()>) {
        *self.in_flight.flag_mut(run.kind) = false;
        match result {
            Ok(()) => {
                info!(run = %run.id, kind = %run.kind, "workflow completed");
                self.emit(OrchestratorEvent::WorkflowCompleted { kind: run.kind });
            }
            Err(err) if run.phase == WorkflowPhase::Guarding => {
                run.phase = WorkflowPhase::Aborted;
                info!(run = %run.id, kind = %run.kind, error = %err, "workflow aborted before mutation");
                self.emit(OrchestratorEvent::WorkflowAborted {
                    kind: run.kind,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                run.phase = WorkflowPhase::Failed;
                warn!(run = %run.id, kind = %run.kind, error = %err, "workflow failed");
                self.emit(OrchestratorEvent::WorkflowFailed {
                    kind: run.kind,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn advance(&mut self, run: &mut WorkflowRun, to: WorkflowPhase) -> Result<()> {
        let from = run.phase;
        run.advance(to)?;
        debug!(run = %run.id, kind = %run.kind, %from, %to, "phase transition");
        self.emit(OrchestratorEvent::PhaseChanged {
            kind: run.kind,
            from,
            to,
        });
        Ok(())
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send(self.snapshot.clone());
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events_tx.send(event);
    }

    #[cfg(test)]
    pub(crate) fn set_in_flight(&mut self, kind: WorkflowKind, value: bool) {
        *self.in_flight.flag_mut(kind) = value;
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
