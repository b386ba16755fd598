//! Multi-party coordinator.
//!
//! Enforces which calls are legally joinable/leavable and updates the
//! `multiparty` flag and state of every affected call on each join or
//! leave. Grounded on `rvoip_session_core::conference::manager`'s
//! `ConferenceManager` (participant-set collection + single plugin
//! invocation + fan-out state update), narrowed from N-way SIP dialog
//! merging to the two preconditions and two update rules join/leave require.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::call::Call;
use crate::errors::{Result, VoiceError};
use crate::events::EventBus;
use crate::plugin::{VoiceCapability, VoicePlugin};
use crate::registry::CallList;
use crate::types::{CallState, StateReason};

pub struct MultipartyCoordinator {
    calls: Arc<CallList>,
    plugin: Arc<dyn VoicePlugin>,
    events: EventBus,
}

impl MultipartyCoordinator {
    pub fn new(calls: Arc<CallList>, plugin: Arc<dyn VoicePlugin>, events: EventBus) -> Self {
        Self { calls, plugin, events }
    }

    /// `Join(c)`: preconditions `c.multiparty == false`, `c.state == held`.
    pub async fn join(&self, call: &Arc<Call>, cancel: CancellationToken) -> Result<()> {
        if !self.plugin.supports(VoiceCapability::JoinMultiparty) {
            return Err(VoiceError::unsupported("plugin does not support joining a multiparty call"));
        }
        if call.multiparty().await {
            return Err(VoiceError::wrong_state("call is already part of a multiparty"));
        }
        if call.state().await != CallState::Held {
            return Err(VoiceError::wrong_state("Join requires the call to be held"));
        }

        let mut participants = self.active_and_held_participants().await;
        if !participants.iter().any(|c| c.id() == call.id()) {
            participants.push(call.clone());
        }

        self.plugin.join_multiparty(cancel).await?;

        info!(call_id = %call.id(), participants = participants.len(), "multiparty join succeeded");
        for participant in &participants {
            participant.set_multiparty(true).await;
            participant
                .transition(CallState::Active, StateReason::Unknown, &self.events)
                .await?;
        }
        Ok(())
    }

    /// `Leave(c)`: preconditions `c.multiparty == true`, `c.state ∈
    /// {active, held}`.
    pub async fn leave(&self, call: &Arc<Call>, cancel: CancellationToken) -> Result<()> {
        if !self.plugin.supports(VoiceCapability::LeaveMultiparty) {
            return Err(VoiceError::unsupported("plugin does not support leaving a multiparty call"));
        }
        if !call.multiparty().await {
            return Err(VoiceError::wrong_state("call is not part of a multiparty"));
        }
        let state = call.state().await;
        if !matches!(state, CallState::Active | CallState::Held) {
            return Err(VoiceError::wrong_state("Leave requires the call to be active or held"));
        }

        let mut others = Vec::new();
        for c in self.calls.snapshot().await {
            if c.id() == call.id() {
                continue;
            }
            if c.multiparty().await && matches!(c.state().await, CallState::Active | CallState::Held) {
                others.push(c);
            }
        }

        self.plugin.leave_multiparty(call.index(), cancel).await?;

        info!(call_id = %call.id(), remaining = others.len(), "multiparty leave succeeded");
        if others.len() == 1 {
            others[0].set_multiparty(false).await;
            others[0].transition(CallState::Held, StateReason::Unknown, &self.events).await?;
        } else {
            for other in &others {
                other.transition(CallState::Held, StateReason::Unknown, &self.events).await?;
            }
        }
        call.set_multiparty(false).await;
        call.transition(CallState::Active, StateReason::Unknown, &self.events).await?;
        Ok(())
    }

    async fn active_and_held_participants(&self) -> Vec<Arc<Call>> {
        let mut out = Vec::new();
        for c in self.calls.snapshot().await {
            if matches!(c.state().await, CallState::Active | CallState::Held) {
                out.push(c);
            }
        }
        out
    }
}
