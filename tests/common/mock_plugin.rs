//! In-memory `VoicePlugin`/`PluginCall` for cross-module integration
//! tests. No real modem, no real bus: every operation is a plain
//! in-process state change, scriptable per test via the public atomics
//! and the `unsupported`/`call_list` fields.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mm_voice_core::errors::{Result, VoiceError};
use mm_voice_core::plugin::{AudioChannel, PluginCall, VoiceCapability, VoicePlugin};
use mm_voice_core::types::{AudioFormat, CallInfo, Direction};

#[derive(Default)]
pub struct MockPlugin {
    pub dtmf_accept_len: usize,
    pub supports_stop_dtmf: bool,
    /// Capabilities this plugin should report as unsupported; empty by
    /// default (everything supported).
    pub unsupported: Mutex<HashSet<VoiceCapability>>,
    /// Queued response for the next `load_call_list` call.
    pub call_list: Mutex<Vec<CallInfo>>,
    pub voice_supported: AtomicBool,
    pub fail_start: AtomicBool,
    pub setups: AtomicUsize,
    pub cleanups: AtomicUsize,
    pub setup_failures: AtomicUsize,
    /// Carried onto every `PluginCall` this plugin creates.
    pub call_supports_dialling_to_ringing: AtomicBool,
    pub call_supports_ringing_to_active: AtomicBool,
}

impl MockPlugin {
    pub fn new() -> Self {
        Self {
            dtmf_accept_len: 1,
            supports_stop_dtmf: true,
            voice_supported: AtomicBool::new(true),
            call_supports_dialling_to_ringing: AtomicBool::new(true),
            call_supports_ringing_to_active: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn mark_unsupported(&self, capability: VoiceCapability) {
        self.unsupported.lock().unwrap().insert(capability);
    }

    pub fn queue_call_list(&self, infos: Vec<CallInfo>) {
        *self.call_list.lock().unwrap() = infos;
    }
}

#[async_trait]
impl VoicePlugin for MockPlugin {
    async fn check_voice_support(&self) -> Result<bool> {
        Ok(self.voice_supported.load(Ordering::SeqCst))
    }

    fn supports(&self, capability: VoiceCapability) -> bool {
        !self.unsupported.lock().unwrap().contains(&capability)
    }

    async fn create_call(&self, _direction: Direction, _number: &str) -> Result<Box<dyn PluginCall>> {
        Ok(Box::new(MockPluginCall {
            supports_dialling_to_ringing: self.call_supports_dialling_to_ringing.load(Ordering::SeqCst),
            supports_ringing_to_active: self.call_supports_ringing_to_active.load(Ordering::SeqCst),
            ..MockPluginCall::default()
        }))
    }

    async fn load_call_list(&self, _cancel: CancellationToken) -> Result<Vec<CallInfo>> {
        if !self.supports(VoiceCapability::LoadCallList) {
            return Err(VoiceError::unsupported("load_call_list not implemented"));
        }
        Ok(self.call_list.lock().unwrap().clone())
    }

    async fn hold_and_accept(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn hangup_and_accept(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn hangup_all(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn transfer(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn join_multiparty(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn leave_multiparty(&self, _call_index: u32, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn call_waiting_setup(&self, _enabled: bool, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn call_waiting_query(&self, _cancel: CancellationToken) -> Result<bool> {
        Ok(false)
    }

    async fn setup_in_call_unsolicited_events(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn cleanup_in_call_unsolicited_events(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn setup_in_call_audio_channel(&self, _cancel: CancellationToken) -> Result<AudioChannel> {
        if self.setup_failures.load(Ordering::SeqCst) > 0 {
            self.setup_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(VoiceError::plugin_failure("simulated audio setup failure"));
        }
        self.setups.fetch_add(1, Ordering::SeqCst);
        Ok(AudioChannel {
            port: "test-audio0".to_string(),
            format: AudioFormat { encoding: "pcm".to_string(), resolution: "s16le".to_string(), rate: 8000 },
        })
    }

    async fn cleanup_in_call_audio_channel(&self, _cancel: CancellationToken) -> Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dtmf_accept_len(&self) -> usize {
        self.dtmf_accept_len.max(1)
    }

    fn default_dtmf_tone_duration(&self) -> Duration {
        Duration::from_millis(20)
    }
}

/// Per-call plugin handle. `start` fails when `fail_start` is set,
/// mimicking a network-refused or no-dial-tone outcome.
pub struct MockPluginCall {
    pub fail_start: AtomicBool,
    pub supports_dialling_to_ringing: bool,
    pub supports_ringing_to_active: bool,
    pub skip_incoming_timeout: bool,
    pub dtmf_calls: Mutex<Vec<String>>,
    pub stop_dtmf_calls: AtomicUsize,
}

impl Default for MockPluginCall {
    fn default() -> Self {
        Self {
            fail_start: AtomicBool::new(false),
            supports_dialling_to_ringing: true,
            supports_ringing_to_active: true,
            skip_incoming_timeout: false,
            dtmf_calls: Mutex::new(Vec::new()),
            stop_dtmf_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PluginCall for MockPluginCall {
    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(VoiceError::RefusedOrBusy("simulated network refusal".to_string()));
        }
        Ok(())
    }

    async fn accept(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn deflect(&self, _number: &str, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn hangup(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn send_dtmf(&self, tones: &str, _cancel: CancellationToken) -> Result<usize> {
        self.dtmf_calls.lock().unwrap().push(tones.to_string());
        Ok(tones.chars().count())
    }

    async fn stop_dtmf(&self, _cancel: CancellationToken) -> Result<()> {
        self.stop_dtmf_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn supports_dialling_to_ringing(&self) -> bool {
        self.supports_dialling_to_ringing
    }

    fn supports_ringing_to_active(&self) -> bool {
        self.supports_ringing_to_active
    }

    fn skip_incoming_timeout(&self) -> bool {
        self.skip_incoming_timeout
    }
}
