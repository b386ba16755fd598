//! Error taxonomy for the voice call subsystem.
//!
//! `VoiceError` carries a fixed, stable set of error categories plus an
//! optional detail string. Plugin-sourced failures preserve the
//! plugin's own message verbatim in the detail.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VoiceError>;

/// A stable error taxonomy for every fallible operation in the voice
/// subsystem. The `Display` of each variant is the snake_case category
/// name used in the dbus-facing `"error: <category>: <detail>"` form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoiceError {
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid_args: {0}")]
    InvalidArgs(String),

    #[error("not_found: {0}")]
    NotFound(String),

    #[error("wrong_state: {0}")]
    WrongState(String),

    #[error("in_progress: {0}")]
    InProgress(String),

    #[error("refused_or_busy: {0}")]
    RefusedOrBusy(String),

    #[error("no_dial_tone: {0}")]
    NoDialTone(String),

    #[error("timed_out: {0}")]
    TimedOut(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("plugin_failure: {0}")]
    PluginFailure(String),
}

impl VoiceError {
    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::Unsupported(detail.into())
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }

    pub fn invalid_args(detail: impl Into<String>) -> Self {
        Self::InvalidArgs(detail.into())
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::NotFound(detail.into())
    }

    pub fn wrong_state(detail: impl Into<String>) -> Self {
        Self::WrongState(detail.into())
    }

    pub fn in_progress(detail: impl Into<String>) -> Self {
        Self::InProgress(detail.into())
    }

    pub fn plugin_failure(detail: impl Into<String>) -> Self {
        Self::PluginFailure(detail.into())
    }

    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::TimedOut(detail.into())
    }

    pub fn cancelled(detail: impl Into<String>) -> Self {
        Self::Cancelled(detail.into())
    }

    /// The category name alone, e.g. `"wrong_state"` — used by the dbus
    /// layer to build the `"error: <category>: <detail>"` wire form.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unsupported(_) => "unsupported",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidArgs(_) => "invalid_args",
            Self::NotFound(_) => "not_found",
            Self::WrongState(_) => "wrong_state",
            Self::InProgress(_) => "in_progress",
            Self::RefusedOrBusy(_) => "refused_or_busy",
            Self::NoDialTone(_) => "no_dial_tone",
            Self::TimedOut(_) => "timed_out",
            Self::Cancelled(_) => "cancelled",
            Self::PluginFailure(_) => "plugin_failure",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Self::Unsupported(d)
            | Self::Unauthorized(d)
            | Self::InvalidArgs(d)
            | Self::NotFound(d)
            | Self::WrongState(d)
            | Self::InProgress(d)
            | Self::RefusedOrBusy(d)
            | Self::NoDialTone(d)
            | Self::TimedOut(d)
            | Self::Cancelled(d)
            | Self::PluginFailure(d) => d,
        }
    }

    /// Stable, parseable wire form: `"error: <category>: <detail>"`.
    pub fn to_wire_string(&self) -> String {
        format!("error: {}: {}", self.category(), self.detail())
    }
}
