//! Voice call subsystem for a cellular-modem management daemon.
//!
//! Owns the call-list registry, per-call state machine, DTMF engine,
//! call-list reconciler, in-call resource manager, multi-party
//! coordinator, and the dbus-facing `Voice`/`Call` interfaces described
//! in the module docs below. Raw modem protocol framing is pushed down
//! into an injected `VoicePlugin` implementation; this crate never talks
//! AT commands or QMI itself.
//!
//! This crate never installs a global `tracing` subscriber — that is
//! the embedding application's call (see `demos/cli.rs` for the demo
//! binary's own setup).

pub mod call;
pub mod config;
pub mod controller;
pub mod dbus;
pub mod emergency;
pub mod errors;
pub mod events;
pub mod incall;
pub mod multiparty;
pub mod plugin;
pub mod reconciler;
pub mod registry;
pub mod types;

pub use call::Call;
pub use config::VoiceConfig;
pub use controller::{AllowAll, AuthorizationHook, VoiceController};
pub use errors::{Result, VoiceError};
pub use events::{EventBus, VoiceEvent};
pub use plugin::{AudioChannel, PluginCall, VoiceCapability, VoicePlugin};
pub use registry::CallList;
pub use types::{AudioFormat, CallId, CallInfo, CallProperties, CallState, Direction, StateReason};
