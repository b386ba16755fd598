//! Emergency-only admission predicate.
//!
//! No direct teacher analogue — a SIP softswitch has no concept of
//! SIM/registration-gated emergency dialing — so this is written fresh,
//! in the small validation-helper style of
//! `conference/participant.rs`'s precondition checks: one function, one
//! job, no state of its own.

use crate::config::VoiceConfig;

/// Registration and SIM facts the controller supplies; collaborators
/// (modem skeleton, SIM manager) are out of scope here, so the caller
/// gathers these and passes them in rather than this module reaching
/// out to them itself.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationFacts<'a> {
    /// `EmergencyOnly` is false when the modem is registered on a network.
    pub registered: bool,
    pub sim_present: bool,
    /// The SIM's EF_ECC emergency-number list, when a SIM is present.
    pub sim_emergency_numbers: &'a [String],
}

/// Whether `number` is admitted for an outgoing `Start`: registered, or
/// an always-valid emergency number, or (no SIM and a no-SIM emergency
/// number), or (SIM present and listed in its EF_ECC).
pub fn is_admitted(number: &str, facts: RegistrationFacts<'_>, config: &VoiceConfig) -> bool {
    if facts.registered {
        return true;
    }
    if config.always_valid_emergency_numbers.contains(number) {
        return true;
    }
    if !facts.sim_present && config.no_sim_emergency_numbers.contains(number) {
        return true;
    }
    if facts.sim_present && facts.sim_emergency_numbers.iter().any(|n| n == number) {
        return true;
    }
    false
}
