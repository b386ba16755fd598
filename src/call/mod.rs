//! Call object and state machine.
//!
//! Grounded on `rvoip_session_core::api::types::CallSession` for the
//! data shape and `rvoip_session_core::coordinator::session_ops`'s
//! per-session operation methods (`terminate_session`, `send_dtmf`, ...)
//! for the operation shape — generalized from a SIP dialog's lifecycle
//! to the richer multi-state graph of a modem call, with the actual
//! protocol work pushed down into a `PluginCall`.

pub mod dtmf;
pub mod state_machine;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::errors::{Result, VoiceError};
use crate::events::{EventBus, VoiceEvent};
use crate::plugin::{AudioChannel, PluginCall};
use crate::types::{CallId, CallState, Direction, StateReason};

use self::dtmf::DtmfEngine;

/// Arguments to construct a new `Call`.
pub struct CallCreateArgs {
    pub direction: Direction,
    pub number: String,
    pub initial_state: CallState,
    pub config: Arc<VoiceConfig>,
    pub dtmf_tone_duration_override: Option<Duration>,
}

/// A single call's state and client-visible operations. Owns no other call (multi-call preconditions live in `controller.rs`
/// / `multiparty.rs`). Emits `VoiceEvent::StateChanged` to its owner's
/// event bus on every transition.
pub struct Call {
    id: CallId,
    direction: Direction,
    config: Arc<VoiceConfig>,
    dtmf_tone_duration: Duration,

    state: RwLock<CallState>,
    state_reason: RwLock<StateReason>,
    number: RwLock<String>,
    /// Hardware-assigned index; 0 means unassigned.
    index: AtomicU32,
    multiparty: RwLock<bool>,
    audio: RwLock<Option<AudioChannel>>,

    /// Bumped on every transition so the reconciler can detect and
    /// discard stale poll-derived matches that race a more recent
    /// single-event report.
    revision: AtomicU64,

    /// Serialises `Start`/`Accept`/`Deflect`/`Hangup` against each other.
    op_lock: Mutex<()>,
    dtmf: DtmfEngine,

    /// Cancelled when the call is hung up, so any in-flight plugin
    /// operation (including a DTMF wait) observes cancellation promptly.
    cancel: CancellationToken,

    plugin_call: Mutex<Option<Box<dyn PluginCall>>>,

    /// Cancellation handle for the currently-armed incoming-call
    /// validity timer, if any. Re-arming cancels the previous
    /// one before spawning a fresh one.
    validity_timer: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call").field("id", &self.id).field("direction", &self.direction).finish()
    }
}

impl Call {
    pub fn new(args: CallCreateArgs) -> Self {
        let dtmf_tone_duration = args
            .dtmf_tone_duration_override
            .unwrap_or(*args.config.default_dtmf_tone_duration);
        Self {
            id: CallId::new(),
            direction: args.direction,
            config: args.config,
            dtmf_tone_duration,
            state: RwLock::new(args.initial_state),
            state_reason: RwLock::new(StateReason::Unknown),
            number: RwLock::new(args.number),
            index: AtomicU32::new(0),
            multiparty: RwLock::new(false),
            audio: RwLock::new(None),
            revision: AtomicU64::new(0),
            op_lock: Mutex::new(()),
            dtmf: DtmfEngine::new(),
            cancel: CancellationToken::new(),
            plugin_call: Mutex::new(None),
            validity_timer: Mutex::new(None),
        }
    }

    pub async fn attach_plugin_call(&self, plugin_call: Box<dyn PluginCall>) {
        *self.plugin_call.lock().await = Some(plugin_call);
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub async fn state(&self) -> CallState {
        *self.state.read().await
    }

    pub async fn state_reason(&self) -> StateReason {
        *self.state_reason.read().await
    }

    pub async fn number(&self) -> String {
        self.number.read().await.clone()
    }

    pub async fn set_number_if_unset(&self, number: &str) {
        let mut n = self.number.write().await;
        if n.is_empty() && !number.is_empty() {
            *n = number.to_string();
        }
    }

    pub fn index(&self) -> u32 {
        self.index.load(Ordering::SeqCst)
    }

    pub fn set_index_if_unset(&self, index: u32) {
        let _ = self
            .index
            .compare_exchange(0, index, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub async fn multiparty(&self) -> bool {
        *self.multiparty.read().await
    }

    pub async fn set_multiparty(&self, value: bool) {
        *self.multiparty.write().await = value;
    }

    pub async fn audio(&self) -> Option<AudioChannel> {
        self.audio.read().await.clone()
    }

    pub async fn set_audio(&self, audio: Option<AudioChannel>) {
        *self.audio.write().await = audio;
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn dtmf_tone_duration(&self) -> Duration {
        self.dtmf_tone_duration
    }

    /// Apply a validated transition, bump the revision, and publish
    /// `StateChanged`. Returns `wrong_state` if the edge is illegal —
    /// nothing transitions away from `terminated`.
    pub async fn transition(
        &self,
        new_state: CallState,
        reason: StateReason,
        events: &EventBus,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if *state == new_state {
            return Ok(());
        }
        if !state_machine::is_legal_transition(*state, new_state) {
            return Err(VoiceError::wrong_state(format!(
                "illegal transition {:?} -> {:?} on call {}",
                *state, new_state, self.id
            )));
        }
        let old = *state;
        *state = new_state;
        *self.state_reason.write().await = reason;
        self.revision.fetch_add(1, Ordering::SeqCst);
        drop(state);

        info!(call_id = %self.id, ?old, new = ?new_state, ?reason, "call state changed");
        events.publish(VoiceEvent::StateChanged {
            call_id: self.id.clone(),
            old,
            new: new_state,
            reason,
        });

        if new_state == CallState::Terminated {
            self.cancel.cancel();
        }
        Ok(())
    }

    /// `Start()` — outgoing only; legal only from `unknown`.
    /// Emergency-only admission is checked by the caller and passed in
    /// as `admitted`.
    pub async fn start(&self, admitted: bool, events: &EventBus) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.direction != Direction::Outgoing {
            return Err(VoiceError::wrong_state("Start is only legal for outgoing calls"));
        }
        if self.state().await != CallState::Unknown {
            return Err(VoiceError::wrong_state("Start is only legal from the unknown state"));
        }
        if !admitted {
            return Err(VoiceError::unauthorized("only emergency calls allowed"));
        }

        match self.call_plugin(|pc, cancel| Box::pin(async move { pc.start(cancel).await })).await {
            Ok(()) => {
                self.transition(CallState::Dialling, StateReason::OutgoingStarted, events).await
            }
            Err(e) => {
                let reason = match &e {
                    VoiceError::RefusedOrBusy(_) | VoiceError::NoDialTone(_) => StateReason::RefusedOrBusy,
                    _ => StateReason::Error,
                };
                // Best-effort: this may itself fail as wrong_state if a
                // concurrent report already moved the call; that's fine,
                // the original plugin error is what the caller sees.
                let _ = self.transition(CallState::Terminated, reason, events).await;
                Err(e)
            }
        }
    }

    /// `Accept()` — incoming only; legal only from `ringing_in`/`waiting`.
    pub async fn accept(&self, events: &EventBus) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.direction != Direction::Incoming {
            return Err(VoiceError::wrong_state("Accept is only legal for incoming calls"));
        }
        let state = self.state().await;
        if !matches!(state, CallState::RingingIn | CallState::Waiting) {
            return Err(VoiceError::wrong_state(
                "Accept is only legal from ringing_in or waiting",
            ));
        }
        self.call_plugin(|pc, cancel| Box::pin(async move { pc.accept(cancel).await })).await?;
        self.transition(CallState::Active, StateReason::Accepted, events).await
    }

    /// `Deflect(number)` — incoming only; legal only from `ringing_in`/`waiting`.
    pub async fn deflect(&self, number: &str, events: &EventBus) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.direction != Direction::Incoming {
            return Err(VoiceError::wrong_state("Deflect is only legal for incoming calls"));
        }
        let state = self.state().await;
        if !matches!(state, CallState::RingingIn | CallState::Waiting) {
            return Err(VoiceError::wrong_state(
                "Deflect is only legal from ringing_in or waiting",
            ));
        }
        let number = number.to_string();
        self.call_plugin(move |pc, cancel| {
            let number = number.clone();
            Box::pin(async move { pc.deflect(&number, cancel).await })
        })
        .await?;
        self.transition(CallState::Terminated, StateReason::Deflected, events).await
    }

    /// `Hangup()` — legal from any non-terminal state.
    pub async fn hangup(&self, events: &EventBus) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if self.state().await.is_terminal() {
            return Err(VoiceError::wrong_state("call is already terminated"));
        }
        self.call_plugin(|pc, cancel| Box::pin(async move { pc.hangup(cancel).await })).await?;
        self.transition(CallState::Terminated, StateReason::Terminated, events).await
    }

    /// `SendDtmf(tones)` — call must be `active`.
    pub async fn send_dtmf(&self, tones: &str) -> Result<()> {
        if self.state().await != CallState::Active {
            return Err(VoiceError::wrong_state("SendDtmf is only legal on an active call"));
        }
        let guard = self.plugin_call.lock().await;
        let plugin_call = guard
            .as_deref()
            .ok_or_else(|| VoiceError::unsupported("no plugin attached to this call"))?;
        // Assumes the single-tone, no-stop-dtmf shape; used by tests and
        // callers that don't have the plugin-wide capability surface to
        // hand. The bus-facing path goes through `send_dtmf_with` instead.
        self.dtmf
            .send(tones, plugin_call, 1, false, self.dtmf_tone_duration, self.config.max_dtmf_sequence_len, self.cancel.clone())
            .await
    }

    /// Variant used by the controller, which knows the modem-wide
    /// `dtmf_accept_len` / stop_dtmf support from the `VoicePlugin`.
    pub async fn send_dtmf_with(
        &self,
        tones: &str,
        accept_len: usize,
        supports_stop_dtmf: bool,
    ) -> Result<()> {
        if self.state().await != CallState::Active {
            return Err(VoiceError::wrong_state("SendDtmf is only legal on an active call"));
        }
        let guard = self.plugin_call.lock().await;
        let plugin_call = guard
            .as_deref()
            .ok_or_else(|| VoiceError::unsupported("no plugin attached to this call"))?;
        self.dtmf
            .send(
                tones,
                plugin_call,
                accept_len,
                supports_stop_dtmf,
                self.dtmf_tone_duration,
                self.config.max_dtmf_sequence_len,
                self.cancel.clone(),
            )
            .await
    }

    async fn call_plugin<'a, F>(&'a self, f: F) -> Result<()>
    where
        F: for<'b> FnOnce(
            &'b dyn PluginCall,
            CancellationToken,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'b>>,
    {
        let guard = self.plugin_call.lock().await;
        let plugin_call = guard
            .as_deref()
            .ok_or_else(|| VoiceError::unsupported("no plugin attached to this call"))?;
        let cancel = self.cancel.clone();
        tokio::time::timeout(*self.config.plugin_operation_timeout, f(plugin_call, cancel))
            .await
            .map_err(|_| VoiceError::timed_out("plugin operation exceeded its timeout"))?
    }

    /// Whether the plugin reports miss/hangup reliably enough that the
    /// incoming-call validity timer should never be armed for this call.
    /// `false` (timer armed) until a plugin call is attached.
    pub async fn skip_incoming_timeout(&self) -> bool {
        match self.plugin_call.lock().await.as_deref() {
            Some(pc) => pc.skip_incoming_timeout(),
            None => false,
        }
    }

    /// Whether the attached plugin explicitly reports the `ringing_out`
    /// stage of an outgoing call rather than jumping straight to
    /// `active`. `true` (no special handling needed) until a plugin
    /// call is attached.
    pub async fn supports_dialling_to_ringing(&self) -> bool {
        match self.plugin_call.lock().await.as_deref() {
            Some(pc) => pc.supports_dialling_to_ringing(),
            None => true,
        }
    }

    /// Whether the attached plugin explicitly reports `ringing_in`/
    /// `waiting` before the connected signal on an incoming call, rather
    /// than reporting `active` directly. `true` until a plugin call is
    /// attached.
    pub async fn supports_ringing_to_active(&self) -> bool {
        match self.plugin_call.lock().await.as_deref() {
            Some(pc) => pc.supports_ringing_to_active(),
            None => true,
        }
    }

    /// (Re)arm the incoming-call validity timer: cancels any timer
    /// already running on this call and spawns a fresh one. If
    /// `skip_incoming_timeout` is set, this is a no-op (any previously
    /// armed timer is still cancelled).
    pub async fn arm_incoming_validity_timer(self: &Arc<Self>, events: EventBus, validity: Duration) {
        let mut slot = self.validity_timer.lock().await;
        if let Some(old) = slot.take() {
            old.cancel();
        }
        if self.skip_incoming_timeout().await {
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let call = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(validity) => {
                    let state = call.state().await;
                    if matches!(state, CallState::RingingIn | CallState::Waiting) {
                        debug!(call_id = %call.id, "incoming call validity window expired");
                        if let Err(e) = call.transition(CallState::Terminated, StateReason::Missed, &events).await {
                            warn!(call_id = %call.id, error = %e, "failed to mark missed call terminated");
                        }
                    }
                }
                _ = child.cancelled() => {}
            }
        });
        *slot = Some(token);
    }

    /// Disarm the validity timer without transitioning the call —
    /// used once a non-terminated call leaves `ringing_in`/`waiting`.
    pub async fn disarm_incoming_validity_timer(&self) {
        if let Some(token) = self.validity_timer.lock().await.take() {
            token.cancel();
        }
    }
}
