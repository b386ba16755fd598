//! Voice subsystem configuration.
//!
//! Carries the implementation-defined constants left open to the
//! embedder (reconciler period, incoming-call validity window,
//! plugin operation timeout, default DTMF tone duration, the emergency
//! number sets), in the fluent-builder style of
//! `rvoip_session_core`'s `SessionManagerConfig`/`MediaConfig`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Tunable constants for a single modem's voice subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// The reconciler's poll period.
    pub reconciler_period: DurationWrap,
    /// The incoming-call validity window.
    pub incoming_call_validity: DurationWrap,
    /// Per-plugin-operation timeout.
    pub plugin_operation_timeout: DurationWrap,
    /// Default DTMF tone duration, overridable per call via
    /// `CallProperties::dtmf_tone_duration_ms`.
    pub default_dtmf_tone_duration: DurationWrap,
    /// Implementation limit on a single `SendDtmf` request.
    pub max_dtmf_sequence_len: usize,
    /// Always-valid emergency numbers, e.g. `{"112", "911"}`.
    pub always_valid_emergency_numbers: HashSet<String>,
    /// Emergency numbers admitted even with no SIM present.
    pub no_sim_emergency_numbers: HashSet<String>,
}

/// Newtype so `VoiceConfig` can derive `Serialize`/`Deserialize` with a
/// plain-integer-milliseconds wire representation without fighting
/// `serde`'s handling of `std::time::Duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationWrap(#[serde(with = "duration_millis")] pub Duration);

impl From<Duration> for DurationWrap {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl std::ops::Deref for DurationWrap {
    type Target = Duration;
    fn deref(&self) -> &Duration {
        &self.0
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            reconciler_period: Duration::from_secs(2).into(),
            incoming_call_validity: Duration::from_secs(30).into(),
            plugin_operation_timeout: Duration::from_secs(120).into(),
            default_dtmf_tone_duration: Duration::from_millis(100).into(),
            max_dtmf_sequence_len: 256,
            always_valid_emergency_numbers: ["112", "911"].iter().map(|s| s.to_string()).collect(),
            no_sim_emergency_numbers: ["000", "08", "110", "999", "118", "119"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl VoiceConfig {
    pub fn with_reconciler_period(mut self, period: Duration) -> Self {
        self.reconciler_period = period.into();
        self
    }

    pub fn with_incoming_call_validity(mut self, validity: Duration) -> Self {
        self.incoming_call_validity = validity.into();
        self
    }

    pub fn with_plugin_operation_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_operation_timeout = timeout.into();
        self
    }

    pub fn with_default_dtmf_tone_duration(mut self, duration: Duration) -> Self {
        self.default_dtmf_tone_duration = duration.into();
        self
    }
}
