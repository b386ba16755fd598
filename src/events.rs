//! Voice event system.
//!
//! A simple broadcast bus, following the pattern in
//! `rvoip_session_core::manager::events` ("simple event system using
//! tokio::sync::broadcast... aligns with the event patterns used
//! throughout the rest of the codebase"). The controller publishes
//! events; the in-call resource manager and the dbus layer subscribe.

use tokio::sync::broadcast;

use crate::types::{AudioFormat, CallId, CallState, StateReason};

/// Events published by the voice subsystem. Every event that concerns a
/// call carries its `CallId`.
#[derive(Debug, Clone)]
pub enum VoiceEvent {
    /// A call was created and exported on the bus.
    CallAdded { call_id: CallId },

    /// A call was deleted and unexported.
    CallDeleted { call_id: CallId },

    /// A call's state changed (mirrors the `StateChanged(old, new,
    /// reason)` dbus signal).
    StateChanged {
        call_id: CallId,
        old: CallState,
        new: CallState,
        reason: StateReason,
    },

    /// An inbound DTMF tone was demultiplexed to this call.
    DtmfReceived { call_id: CallId, tone: char },

    /// The `EmergencyOnly` property changed.
    EmergencyOnlyChanged { emergency_only: bool },

    /// The in-call resource manager's audio channel was set up.
    AudioChannelOpened { port: String, format: AudioFormat },

    /// The in-call resource manager's audio channel was torn down.
    AudioChannelClosed,
}

/// Thin wrapper around a broadcast channel, giving the bus a named type
/// instead of a bare `broadcast::Sender`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<VoiceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Errors (no subscribers) are not a failure —
    /// a "nobody was listening" condition never propagates to the caller.
    pub fn publish(&self, event: VoiceEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
