//! Core data types shared across the voice call subsystem.
//!
//! # Call lifecycle
//!
//! ```text
//! unknown -> dialling      (outgoing start)
//! unknown -> ringing_in    (incoming reported)
//! unknown -> waiting       (incoming reported while another is active)
//! dialling -> ringing_out  (plugin reports remote ringing, or inferred)
//! dialling -> active       (plugin reports connected, or inferred)
//! dialling -> terminated   (error/refused)
//! ringing_out -> active
//! ringing_out -> terminated
//! ringing_in -> active     (local accept)
//! ringing_in -> terminated (hangup, deflect, missed)
//! waiting -> active        (local accept; swaps with prior active)
//! waiting -> terminated
//! active -> held           (swap/hold)
//! active -> terminated
//! held -> active           (swap/resume)
//! held -> terminated
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable opaque identifier for a call, used as the dbus object path
/// component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    pub fn new() -> Self {
        Self(format!("call_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dbus object path for this call, e.g.
    /// `/org/freedesktop/ModemManager1/Call/call_<uuid>`.
    pub fn object_path(&self) -> String {
        format!("/org/freedesktop/ModemManager1/Call/{}", self.0)
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction fixed at call creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Unknown,
    Incoming,
    Outgoing,
}

/// The call's externally-visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    Unknown,
    Dialling,
    RingingOut,
    RingingIn,
    Waiting,
    Active,
    Held,
    Terminated,
}

impl CallState {
    /// The "in-call" set: calls that motivate audio-channel and
    /// URC-handler setup. `RingingIn` and `Waiting` are deliberately
    /// excluded.
    pub fn is_in_call(self) -> bool {
        matches!(
            self,
            CallState::Dialling | CallState::RingingOut | CallState::Held | CallState::Active
        )
    }

    /// The "establishing" set that motivates reconciler polling.
    pub fn is_establishing(self) -> bool {
        matches!(
            self,
            CallState::Dialling
                | CallState::RingingOut
                | CallState::RingingIn
                | CallState::Held
                | CallState::Waiting
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Terminated)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Unknown => "unknown",
            CallState::Dialling => "dialling",
            CallState::RingingOut => "ringing_out",
            CallState::RingingIn => "ringing_in",
            CallState::Waiting => "waiting",
            CallState::Active => "active",
            CallState::Held => "held",
            CallState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Last cause of a state transition, carried on the `Call` object and on
/// every `StateChanged` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateReason {
    IncomingNew,
    OutgoingStarted,
    Accepted,
    Deflected,
    Terminated,
    Transferred,
    RefusedOrBusy,
    Missed,
    Error,
    AudioSetupFailed,
    Unknown,
}

impl fmt::Display for StateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateReason::IncomingNew => "incoming_new",
            StateReason::OutgoingStarted => "outgoing_started",
            StateReason::Accepted => "accepted",
            StateReason::Deflected => "deflected",
            StateReason::Terminated => "terminated",
            StateReason::Transferred => "transferred",
            StateReason::RefusedOrBusy => "refused_or_busy",
            StateReason::Missed => "missed",
            StateReason::Error => "error",
            StateReason::AudioSetupFailed => "audio_setup_failed",
            StateReason::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Audio format descriptor returned by `plugin.setup_in_call_audio_channel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub resolution: String,
    pub rate: u32,
}

/// Plain descriptor used by the plugin-to-core boundary. Any field
/// except `state` may be unset.
#[derive(Debug, Clone, Default)]
pub struct CallInfo {
    pub index: Option<u32>,
    pub direction: Option<Direction>,
    pub state: Option<CallState>,
    pub number: Option<String>,
}

impl CallInfo {
    pub fn new(state: CallState) -> Self {
        Self {
            index: None,
            direction: None,
            state: Some(state),
            number: None,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// Client-supplied properties for `CreateCall`.
#[derive(Debug, Clone, Default)]
pub struct CallProperties {
    pub number: String,
    pub dtmf_tone_duration_ms: Option<u64>,
}

impl CallProperties {
    /// Parse the recognised-keys dictionary. Unrecognised keys cause
    /// `invalid_args`.
    pub fn from_dict(
        dict: &std::collections::HashMap<String, String>,
    ) -> crate::errors::Result<Self> {
        use crate::errors::VoiceError;

        let mut props = CallProperties::default();
        let mut saw_number = false;

        for (key, value) in dict {
            match key.as_str() {
                "number" => {
                    props.number = value.clone();
                    saw_number = true;
                }
                "dtmf-tone-duration" => {
                    props.dtmf_tone_duration_ms = Some(value.parse().map_err(|_| {
                        VoiceError::invalid_args(format!(
                            "dtmf-tone-duration must be an integer, got {value:?}"
                        ))
                    })?);
                }
                other => {
                    return Err(VoiceError::invalid_args(format!(
                        "unrecognised CreateCall property {other:?}"
                    )));
                }
            }
        }

        if !saw_number || props.number.is_empty() {
            return Err(VoiceError::invalid_args("number is required"));
        }

        Ok(props)
    }
}
