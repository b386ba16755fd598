//! Voice interface controller.
//!
//! Root of the subsystem: owns the `CallList`, the in-call resource
//! manager, the reconciler, the multi-party coordinator, and the
//! authorisation/registration collaborators. Routes every bus-surface
//! operation and both plugin report-ingestion entry points. Grounded on
//! `rvoip_session_core::coordinator::coordinator`'s `SessionCoordinator`
//! (root struct owning registry + sub-managers + event bus) and
//! `coordinator/session_ops.rs` (one async method per public operation).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::call::{Call, CallCreateArgs};
use crate::emergency::{self, RegistrationFacts};
use crate::errors::{Result, VoiceError};
use crate::events::{EventBus, VoiceEvent};
use crate::incall::InCallManager;
use crate::multiparty::MultipartyCoordinator;
use crate::plugin::{VoiceCapability, VoicePlugin};
use crate::reconciler::Reconciler;
use crate::registry::CallList;
use crate::types::{CallId, CallInfo, CallProperties, CallState, Direction, StateReason};

/// Collaborator the controller consults before any mutating bus-surface
/// method runs. The core only branches on the result.
#[async_trait]
pub trait AuthorizationHook: Send + Sync {
    async fn authorize(&self, capability: &str) -> bool;
}

/// Grants everything; used by the demo binary and by tests that are not
/// exercising authorisation itself.
pub struct AllowAll;

#[async_trait]
impl AuthorizationHook for AllowAll {
    async fn authorize(&self, _capability: &str) -> bool {
        true
    }
}

/// Registration/SIM facts the modem skeleton (out of scope) would
/// otherwise push in; exposed here as plain setters so a host
/// application can wire its own modem-state notifications in.
#[derive(Default)]
struct RegistrationState {
    registered: bool,
    sim_present: bool,
    sim_emergency_numbers: Vec<String>,
}

pub struct VoiceController {
    calls: Arc<CallList>,
    events: EventBus,
    plugin: Arc<dyn VoicePlugin>,
    config: Arc<VoiceConfig>,
    auth: Arc<dyn AuthorizationHook>,
    incall: Arc<InCallManager>,
    multiparty: MultipartyCoordinator,
    registration: RwLock<RegistrationState>,
    emergency_only: AtomicBool,
    reconciler: std::sync::Mutex<Option<Arc<Reconciler>>>,
}

impl VoiceController {
    pub fn new(
        plugin: Arc<dyn VoicePlugin>,
        config: Arc<VoiceConfig>,
        auth: Arc<dyn AuthorizationHook>,
    ) -> Arc<Self> {
        let calls = Arc::new(CallList::new());
        let events = EventBus::default();
        let incall = InCallManager::new(calls.clone(), plugin.clone(), events.clone());
        let multiparty = MultipartyCoordinator::new(calls.clone(), plugin.clone(), events.clone());
        Arc::new(Self {
            calls,
            events,
            plugin,
            config,
            auth,
            incall,
            multiparty,
            registration: RwLock::new(RegistrationState::default()),
            emergency_only: AtomicBool::new(true),
            reconciler: std::sync::Mutex::new(None),
        })
    }

    /// Wires the reconciler and in-call manager background loops. Must
    /// be called once after construction, before serving bus requests.
    /// Both tasks stop when `cancel` fires.
    pub fn spawn_background_tasks(self: &Arc<Self>, cancel: CancellationToken) {
        let reconciler = Reconciler::new(Arc::downgrade(self), self.plugin.clone(), self.config.clone());
        *self.reconciler.lock().unwrap() = Some(reconciler.clone());
        tokio::spawn(reconciler.run(cancel.clone()));
        tokio::spawn(self.incall.clone().run(cancel));
    }

    pub fn call_list(&self) -> &Arc<CallList> {
        &self.calls
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn set_registration(&self, registered: bool) {
        self.registration.write().await.registered = registered;
        let was_emergency_only = self.emergency_only.swap(!registered, Ordering::SeqCst);
        if was_emergency_only != !registered {
            self.events.publish(VoiceEvent::EmergencyOnlyChanged { emergency_only: !registered });
        }
    }

    pub async fn set_sim_state(&self, present: bool, ecc_numbers: Vec<String>) {
        let mut r = self.registration.write().await;
        r.sim_present = present;
        r.sim_emergency_numbers = ecc_numbers;
    }

    pub fn emergency_only(&self) -> bool {
        self.emergency_only.load(Ordering::SeqCst)
    }

    async fn authorize(&self) -> Result<()> {
        if self.auth.authorize("voice").await {
            Ok(())
        } else {
            Err(VoiceError::unauthorized("authorisation hook refused capability 'voice'"))
        }
    }

    fn nudge_reconciler(&self) {
        if let Some(r) = self.reconciler.lock().unwrap().as_ref() {
            r.nudge();
        }
    }

    // ---- CreateCall / DeleteCall / ListCalls ----

    pub async fn create_call(&self, props: CallProperties) -> Result<Arc<Call>> {
        self.authorize().await?;
        if !self.plugin.check_voice_support().await? {
            return Err(VoiceError::unsupported("voice calling is not supported by this modem"));
        }

        let call = Arc::new(Call::new(CallCreateArgs {
            direction: Direction::Outgoing,
            number: props.number.clone(),
            initial_state: CallState::Unknown,
            config: self.config.clone(),
            dtmf_tone_duration_override: props.dtmf_tone_duration_ms.map(std::time::Duration::from_millis),
        }));

        let plugin_call = self.plugin.create_call(Direction::Outgoing, &props.number).await?;
        call.attach_plugin_call(plugin_call).await;

        self.calls.insert(call.clone()).await;
        info!(call_id = %call.id(), "outgoing call created");
        self.events.publish(VoiceEvent::CallAdded { call_id: call.id().clone() });
        Ok(call)
    }

    pub async fn delete_call(&self, id: &CallId) -> Result<()> {
        self.authorize().await?;
        let call = self.calls.get(id).ok_or_else(|| VoiceError::not_found(format!("no such call: {id}")))?;
        if call.state().await != CallState::Terminated {
            return Err(VoiceError::wrong_state("DeleteCall requires a terminated call"));
        }
        self.calls.remove(id).await;
        self.events.publish(VoiceEvent::CallDeleted { call_id: id.clone() });
        Ok(())
    }

    pub async fn list_calls(&self) -> Vec<String> {
        self.calls.object_paths().await
    }

    /// Computes emergency-only admission and performs `Start()` on the
    /// given call.
    pub async fn start_call(&self, call: &Arc<Call>) -> Result<()> {
        let admitted = {
            let r = self.registration.read().await;
            emergency::is_admitted(
                &call.number().await,
                RegistrationFacts {
                    registered: r.registered,
                    sim_present: r.sim_present,
                    sim_emergency_numbers: &r.sim_emergency_numbers,
                },
                &self.config,
            )
        };
        let result = call.start(admitted, &self.events).await;
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        result
    }

    /// Performs `Accept()` on the given call and re-evaluates in-call
    /// resource state.
    pub async fn accept_call(&self, call: &Arc<Call>) -> Result<()> {
        let result = call.accept(&self.events).await;
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        result
    }

    /// Performs `Deflect(number)` on the given call and re-evaluates
    /// in-call resource state.
    pub async fn deflect_call(&self, call: &Arc<Call>, number: &str) -> Result<()> {
        let result = call.deflect(number, &self.events).await;
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        result
    }

    /// Performs `Hangup()` on the given call and re-evaluates in-call
    /// resource state.
    pub async fn hangup_call(&self, call: &Arc<Call>) -> Result<()> {
        let result = call.hangup(&self.events).await;
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        result
    }

    /// `SendDtmf(tones)` on the given call, threading through the
    /// modem-wide `dtmf_accept_len`/stop_dtmf support the single-call
    /// `Call::send_dtmf` has no way to know.
    pub async fn send_dtmf(&self, call: &Arc<Call>, tones: &str) -> Result<()> {
        let accept_len = self.plugin.dtmf_accept_len();
        let supports_stop_dtmf = self.plugin.supports(VoiceCapability::StopDtmf);
        call.send_dtmf_with(tones, accept_len, supports_stop_dtmf).await
    }

    // ---- Aggregate-state operations ----

    pub async fn hold_and_accept(&self) -> Result<()> {
        self.authorize().await?;
        if !self.plugin.supports(VoiceCapability::HoldAndAccept) {
            return Err(VoiceError::unsupported("plugin does not support HoldAndAccept"));
        }
        let (waiting, held) = self.waiting_and_held().await;
        if waiting.is_empty() && held.is_empty() {
            return Err(VoiceError::wrong_state("HoldAndAccept requires a waiting or held call"));
        }
        let next = waiting.first().or_else(|| held.first()).cloned();

        self.plugin.hold_and_accept(CancellationToken::new()).await?;

        for active in self.calls_in_state(CallState::Active).await {
            active.transition(CallState::Held, StateReason::Unknown, &self.events).await?;
        }
        if let Some(next) = next {
            next.transition(CallState::Active, StateReason::Accepted, &self.events).await?;
        }
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        Ok(())
    }

    pub async fn hangup_and_accept(&self) -> Result<()> {
        self.authorize().await?;
        if !self.plugin.supports(VoiceCapability::HangupAndAccept) {
            return Err(VoiceError::unsupported("plugin does not support HangupAndAccept"));
        }
        let (waiting, held) = self.waiting_and_held().await;
        if waiting.is_empty() && held.is_empty() {
            return Err(VoiceError::wrong_state("HangupAndAccept requires a waiting or held call"));
        }
        let next = waiting.first().or_else(|| held.first()).cloned();

        self.plugin.hangup_and_accept(CancellationToken::new()).await?;

        for active in self.calls_in_state(CallState::Active).await {
            active.transition(CallState::Terminated, StateReason::Terminated, &self.events).await?;
        }
        if let Some(next) = next {
            next.transition(CallState::Active, StateReason::Accepted, &self.events).await?;
        }
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        Ok(())
    }

    /// Terminates every call in `{dialling, ringing_out, ringing_in,
    /// active}`. `held`/`waiting` calls are untouched — the "only active
    /// ones" reading.
    pub async fn hangup_all(&self) -> Result<()> {
        self.authorize().await?;
        if !self.plugin.supports(VoiceCapability::HangupAll) {
            return Err(VoiceError::unsupported("plugin does not support HangupAll"));
        }
        self.plugin.hangup_all(CancellationToken::new()).await?;

        for call in self.calls.snapshot_non_terminated().await {
            if matches!(
                call.state().await,
                CallState::Dialling | CallState::RingingOut | CallState::RingingIn | CallState::Active
            ) {
                call.transition(CallState::Terminated, StateReason::Terminated, &self.events).await?;
            }
        }
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        Ok(())
    }

    pub async fn transfer(&self) -> Result<()> {
        self.authorize().await?;
        if !self.plugin.supports(VoiceCapability::Transfer) {
            return Err(VoiceError::unsupported("plugin does not support Transfer"));
        }
        self.plugin.transfer(CancellationToken::new()).await?;

        for call in self.calls.snapshot_non_terminated().await {
            if matches!(call.state().await, CallState::Active | CallState::Held) {
                call.transition(CallState::Terminated, StateReason::Transferred, &self.events).await?;
            }
        }
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        Ok(())
    }

    pub async fn call_waiting_setup(&self, enable: bool) -> Result<()> {
        self.authorize().await?;
        if !self.plugin.supports(VoiceCapability::CallWaitingSetup) {
            return Err(VoiceError::unsupported("plugin does not support CallWaitingSetup"));
        }
        self.plugin.call_waiting_setup(enable, CancellationToken::new()).await
    }

    pub async fn call_waiting_query(&self) -> Result<bool> {
        if !self.plugin.supports(VoiceCapability::CallWaitingQuery) {
            return Err(VoiceError::unsupported("plugin does not support CallWaitingQuery"));
        }
        self.plugin.call_waiting_query(CancellationToken::new()).await
    }

    pub async fn join_multiparty(&self, id: &CallId) -> Result<()> {
        self.authorize().await?;
        let call = self.calls.get(id).ok_or_else(|| VoiceError::not_found(format!("no such call: {id}")))?;
        self.multiparty.join(&call, CancellationToken::new()).await?;
        self.incall.schedule_reevaluation();
        Ok(())
    }

    pub async fn leave_multiparty(&self, id: &CallId) -> Result<()> {
        self.authorize().await?;
        let call = self.calls.get(id).ok_or_else(|| VoiceError::not_found(format!("no such call: {id}")))?;
        self.multiparty.leave(&call, CancellationToken::new()).await?;
        self.incall.schedule_reevaluation();
        Ok(())
    }

    async fn waiting_and_held(&self) -> (Vec<Arc<Call>>, Vec<Arc<Call>>) {
        let mut waiting = Vec::new();
        let mut held = Vec::new();
        for call in self.calls.snapshot_non_terminated().await {
            match call.state().await {
                CallState::Waiting => waiting.push(call),
                CallState::Held => held.push(call),
                _ => {}
            }
        }
        (waiting, held)
    }

    async fn calls_in_state(&self, state: CallState) -> Vec<Arc<Call>> {
        let mut out = Vec::new();
        for call in self.calls.snapshot_non_terminated().await {
            if call.state().await == state {
                out.push(call);
            }
        }
        out
    }

    // ---- Report ingestion ----

    /// Single-event update from the plugin.
    pub async fn report_call(&self, info: CallInfo) -> Result<()> {
        for call in self.calls.snapshot_non_terminated().await {
            if Self::info_matches(&call, &info).await {
                self.apply_report(&call, &info).await?;
                return Ok(());
            }
        }

        if info.direction == Some(Direction::Incoming)
            && matches!(
                info.state,
                Some(CallState::RingingIn) | Some(CallState::Waiting) | Some(CallState::Active)
            )
        {
            self.create_incoming_call(info).await?;
        } else {
            warn!(?info, "discarding unmatched plugin report");
        }
        Ok(())
    }

    /// Full-snapshot update, typically from the reconciler.
    ///
    /// `poll_revisions` is the revision the reconciler observed on each
    /// call at the moment it issued the poll. Between then and now a
    /// single-event report may have already moved a call on; if the
    /// call's revision has advanced past what the reconciler saw, this
    /// poll result is stale for that call and is discarded rather than
    /// re-applied or used to mark the call terminated. Calls the
    /// reconciler never saw (created after the poll was issued) are
    /// left untouched entirely — the poll has nothing to say about them.
    pub async fn report_all_calls(
        &self,
        infos: Vec<CallInfo>,
        poll_revisions: std::collections::HashMap<CallId, u64>,
    ) -> Result<()> {
        let mut remaining = infos;

        for call in self.calls.snapshot_non_terminated().await {
            let Some(&observed) = poll_revisions.get(call.id()) else {
                continue;
            };
            if call.revision() != observed {
                debug!(call_id = %call.id(), "discarding stale reconciler poll result");
                continue;
            }

            let mut matched_idx = None;
            for (i, info) in remaining.iter().enumerate() {
                if Self::info_matches(&call, info).await {
                    matched_idx = Some(i);
                    break;
                }
            }
            match matched_idx {
                Some(i) => {
                    let info = remaining.remove(i);
                    self.apply_report(&call, &info).await?;
                }
                None => {
                    call.transition(CallState::Terminated, StateReason::Terminated, &self.events).await?;
                }
            }
        }

        for info in remaining {
            if info.direction == Some(Direction::Incoming)
                && matches!(
                    info.state,
                    Some(CallState::RingingIn) | Some(CallState::Waiting) | Some(CallState::Active)
                )
            {
                self.create_incoming_call(info).await?;
            } else {
                warn!(?info, "ignoring unmatched reconciler entry");
            }
        }
        self.incall.schedule_reevaluation();
        Ok(())
    }

    /// `received_dtmf(index, tone)`: forwards to every matching active
    /// call (or to all active calls if `index == 0`).
    pub async fn received_dtmf(&self, index: u32, tone: char) {
        for call in self.calls_in_state(CallState::Active).await {
            if index == 0 || call.index() == index {
                self.events.publish(VoiceEvent::DtmfReceived { call_id: call.id().clone(), tone });
            }
        }
    }

    async fn info_matches(call: &Arc<Call>, info: &CallInfo) -> bool {
        let info_index = info.index.unwrap_or(0);
        let call_index = call.index();

        if info_index != 0 && info_index == call_index {
            return true;
        }
        if let (Some(direction), Some(state)) = (info.direction, info.state) {
            if direction == call.direction()
                && state == call.state().await
                && (info_index == 0 || call_index == 0 || info_index == call_index)
            {
                return true;
            }
        }
        if let Some(number) = info.number.as_deref() {
            if !number.is_empty() && number == call.number().await {
                return true;
            }
        }
        if info.state == Some(CallState::Terminated)
            && info.direction == Some(Direction::Unknown)
            && info_index == 0
            && info.number.as_deref().unwrap_or("").is_empty()
            && !call.multiparty().await
        {
            return true;
        }
        false
    }

    async fn apply_report(&self, call: &Arc<Call>, info: &CallInfo) -> Result<()> {
        if let Some(number) = info.number.as_deref() {
            call.set_number_if_unset(number).await;
        }
        if let Some(index) = info.index {
            if index != 0 {
                call.set_index_if_unset(index);
            }
        }
        if let Some(new_state) = info.state {
            let current = call.state().await;
            if new_state == CallState::RingingOut && !call.supports_dialling_to_ringing().await {
                warn!(
                    call_id = %call.id(),
                    "ignoring ringing_out report from a plugin that does not report that stage"
                );
            } else if new_state != current {
                let reason = if new_state == CallState::Terminated {
                    StateReason::Terminated
                } else {
                    StateReason::Unknown
                };
                call.transition(new_state, reason, &self.events).await?;
            }
            if !new_state.is_terminal() && call.direction() == Direction::Incoming {
                call.arm_incoming_validity_timer(self.events.clone(), *self.config.incoming_call_validity).await;
            }
        }
        Ok(())
    }

    async fn create_incoming_call(&self, info: CallInfo) -> Result<()> {
        let state = info.state.unwrap_or(CallState::RingingIn);
        let number = info.number.clone().unwrap_or_default();
        let call = Arc::new(Call::new(CallCreateArgs {
            direction: Direction::Incoming,
            number: number.clone(),
            initial_state: CallState::Unknown,
            config: self.config.clone(),
            dtmf_tone_duration_override: None,
        }));
        if let Some(index) = info.index {
            if index != 0 {
                call.set_index_if_unset(index);
            }
        }

        let plugin_call = self.plugin.create_call(Direction::Incoming, &number).await?;
        call.attach_plugin_call(plugin_call).await;

        if state == CallState::Active {
            // A plugin that doesn't report ringing_in/waiting for this call
            // jumps straight to active; synthesise the skipped hop so the
            // report still lands instead of being rejected as an illegal
            // unknown -> active edge.
            call.transition(CallState::RingingIn, StateReason::IncomingNew, &self.events).await?;
            call.transition(CallState::Active, StateReason::Unknown, &self.events).await?;
        } else {
            call.transition(state, StateReason::IncomingNew, &self.events).await?;
        }
        call.arm_incoming_validity_timer(self.events.clone(), *self.config.incoming_call_validity).await;

        self.calls.insert(call.clone()).await;
        info!(call_id = %call.id(), ?state, "incoming call created from plugin report");
        self.events.publish(VoiceEvent::CallAdded { call_id: call.id().clone() });
        self.nudge_reconciler();
        self.incall.schedule_reevaluation();
        Ok(())
    }
}
