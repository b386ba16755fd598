//! The legal call-state transition table, generalized from the
//! `CallState::is_final`/`is_in_progress` helpers in
//! `rvoip_session_core::api::types` into a full directed-graph check.

use crate::types::CallState;

/// Returns whether `from -> to` is one of the edges of the call
/// lifecycle's directed graph. `from == to` is never legal on its own —
/// callers that want
/// idempotent no-ops should special-case it before calling this.
pub fn is_legal_transition(from: CallState, to: CallState) -> bool {
    use CallState::*;
    matches!(
        (from, to),
        (Unknown, Dialling)
            | (Unknown, RingingIn)
            | (Unknown, Waiting)
            | (Dialling, RingingOut)
            | (Dialling, Active)
            | (Dialling, Terminated)
            | (RingingOut, Active)
            | (RingingOut, Terminated)
            | (RingingIn, Active)
            | (RingingIn, Terminated)
            | (Waiting, Active)
            | (Waiting, Terminated)
            | (Active, Held)
            | (Active, Terminated)
            | (Held, Active)
            | (Held, Terminated)
    )
}
