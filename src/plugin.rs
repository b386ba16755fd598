//! The modem plugin capability surface.
//!
//! Raw protocol framing (AT command strings, QMI message IDs, URC regex
//! parsing) is the plugin's problem; the voice core only ever sees the
//! `CallInfo` / `AudioFormat` shapes of `types.rs` and the capability
//! methods below. Every operation is asynchronous and cancellable: each
//! method takes a `CancellationToken` that the caller drops/cancels to
//! request early abort.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::types::{AudioFormat, CallInfo, Direction};

/// Capabilities a plugin may or may not provide. `VoicePlugin::supports`
/// lets the controller answer `unsupported` before attempting an
/// operation, rather than only after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceCapability {
    HoldAndAccept,
    HangupAndAccept,
    HangupAll,
    Transfer,
    JoinMultiparty,
    LeaveMultiparty,
    CallWaitingSetup,
    CallWaitingQuery,
    LoadCallList,
    StopDtmf,
}

/// Audio port + format handed back by `setup_in_call_audio_channel` and
/// stored by the in-call resource manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChannel {
    pub port: String,
    pub format: AudioFormat,
}

/// The per-modem capability surface invoked by the voice core.
///
/// All methods are `async fn` via `#[async_trait]`, mirroring the
/// `dialog_manager`/`media_manager` injected-service pattern of
/// `rvoip_session_core::coordinator::SessionCoordinator`.
#[async_trait]
pub trait VoicePlugin: Send + Sync {
    /// Whether voice calling is supported at all by the current modem.
    async fn check_voice_support(&self) -> Result<bool>;

    /// Query whether an optional capability is implemented.
    fn supports(&self, capability: VoiceCapability) -> bool;

    /// Factory hook so plugins can return a specialised call
    /// implementation; the returned handle is the per-call operations
    /// surface (`PluginCall`).
    async fn create_call(
        &self,
        direction: Direction,
        number: &str,
    ) -> Result<Box<dyn PluginCall>>;

    /// Poll the full list of ongoing calls. Returns
    /// `VoiceError::unsupported` if the plugin has no concept of a full
    /// list, which disables the reconciler for this modem.
    async fn load_call_list(&self, cancel: CancellationToken) -> Result<Vec<CallInfo>>;

    async fn hold_and_accept(&self, cancel: CancellationToken) -> Result<()>;
    async fn hangup_and_accept(&self, cancel: CancellationToken) -> Result<()>;
    async fn hangup_all(&self, cancel: CancellationToken) -> Result<()>;
    async fn transfer(&self, cancel: CancellationToken) -> Result<()>;

    async fn join_multiparty(&self, cancel: CancellationToken) -> Result<()>;
    /// `call_index` identifies which call is leaving the multiparty.
    async fn leave_multiparty(&self, call_index: u32, cancel: CancellationToken) -> Result<()>;

    async fn call_waiting_setup(&self, enabled: bool, cancel: CancellationToken) -> Result<()>;
    async fn call_waiting_query(&self, cancel: CancellationToken) -> Result<bool>;

    async fn setup_in_call_unsolicited_events(&self, cancel: CancellationToken) -> Result<()>;
    async fn cleanup_in_call_unsolicited_events(&self, cancel: CancellationToken) -> Result<()>;
    async fn setup_in_call_audio_channel(
        &self,
        cancel: CancellationToken,
    ) -> Result<AudioChannel>;
    async fn cleanup_in_call_audio_channel(&self, cancel: CancellationToken) -> Result<()>;

    /// Maximum number of non-pause tone characters `send_dtmf` accepts
    /// in one call. Typically 1 for AT-command modems, N for
    /// binary-protocol modems.
    fn dtmf_accept_len(&self) -> usize;

    /// Default per-tone duration this plugin recommends, used unless a
    /// per-call override is supplied at `CreateCall` time.
    fn default_dtmf_tone_duration(&self) -> std::time::Duration;
}

/// Per-call operations. One instance per `Call`, created by
/// `VoicePlugin::create_call`.
#[async_trait]
pub trait PluginCall: Send + Sync {
    async fn start(&self, cancel: CancellationToken) -> Result<()>;
    async fn accept(&self, cancel: CancellationToken) -> Result<()>;
    async fn deflect(&self, number: &str, cancel: CancellationToken) -> Result<()>;
    async fn hangup(&self, cancel: CancellationToken) -> Result<()>;

    /// Send as many characters of `tones` as the plugin accepts in one
    /// call (bounded by `VoicePlugin::dtmf_accept_len`). Returns the
    /// number of characters actually accepted.
    async fn send_dtmf(&self, tones: &str, cancel: CancellationToken) -> Result<usize>;

    /// Present only when the plugin advertises `stop_dtmf` support
    /// (`VoicePlugin::supports(VoiceCapability::StopDtmf)`).
    async fn stop_dtmf(&self, cancel: CancellationToken) -> Result<()>;

    /// Capability flags the plugin declares for this call: whether
    /// the modem is expected to report the `dialling ->`
    /// ringing_out` and `ringing_out/dialling -> active` transitions
    /// itself, or whether the core must infer them.
    fn supports_dialling_to_ringing(&self) -> bool;
    fn supports_ringing_to_active(&self) -> bool;

    /// Whether the incoming-call validity timer should be disabled
    /// for this call because the plugin itself reports
    /// miss/hangup reliably.
    fn skip_incoming_timeout(&self) -> bool;
}
