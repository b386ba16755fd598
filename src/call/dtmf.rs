//! DTMF engine.
//!
//! Drives a possibly multi-character user request across the plugin's
//! one-tone-at-a-time or N-tones-at-a-time `send_dtmf` interface,
//! honouring the `,` pause character and, when the plugin advertises
//! it, a paired `stop_dtmf` call after each chunk's tone duration.
//!
//! Grounded on `rvoip_session_core::api::common::dtmf`'s `DtmfTone` /
//! `send_dtmf_sequence` char-at-a-time pacing loop, generalized here to
//! accept multi-character chunks (`dtmf_accept_len`) and the optional
//! `stop_dtmf` pairing SIP INFO-based DTMF never needed.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, VoiceError};
use crate::plugin::PluginCall;

/// Per-call DTMF engine. Serialises transmissions: a second `send`
/// while one is active is rejected with `in_progress` rather than
/// queued (see DESIGN.md's Open Question decisions).
#[derive(Default)]
pub struct DtmfEngine {
    busy: Mutex<bool>,
}

impl DtmfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the alphabet: `{'0'..'9', 'A'..'D', '*', '#', ','}`.
    pub fn validate_alphabet(tones: &str) -> Result<()> {
        for c in tones.chars() {
            if !matches!(c, '0'..='9' | 'A'..='D' | '*' | '#' | ',') {
                return Err(VoiceError::invalid_args(format!(
                    "invalid DTMF character {c:?}; allowed alphabet is 0-9, A-D, *, #, ,"
                )));
            }
        }
        Ok(())
    }

    pub fn count_non_pause(tones: &str) -> usize {
        tones.chars().filter(|c| *c != ',').count()
    }

    /// Run the chunking algorithm. The caller is responsible for the
    /// "call must be active" precondition and for serialising
    /// `Start`/`Accept`/`Deflect`/`Hangup` against this call's own op
    /// lock — this engine only serialises against concurrent `SendDtmf`
    /// calls on the same call.
    pub async fn send(
        &self,
        tones: &str,
        plugin_call: &dyn PluginCall,
        accept_len: usize,
        supports_stop_dtmf: bool,
        tone_duration: Duration,
        max_sequence_len: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        Self::validate_alphabet(tones)?;
        if Self::count_non_pause(tones) > max_sequence_len {
            return Err(VoiceError::invalid_args(format!(
                "DTMF sequence exceeds the {max_sequence_len}-character limit"
            )));
        }

        {
            let mut busy = self.busy.try_lock().map_err(|_| {
                VoiceError::in_progress("a DTMF transmission is already in flight on this call")
            })?;
            if *busy {
                return Err(VoiceError::in_progress(
                    "a DTMF transmission is already in flight on this call",
                ));
            }
            *busy = true;
        }
        let result = self
            .send_inner(tones, plugin_call, accept_len.max(1), supports_stop_dtmf, tone_duration, cancel)
            .await;
        *self.busy.lock().await = false;
        result
    }

    async fn send_inner(
        &self,
        tones: &str,
        plugin_call: &dyn PluginCall,
        accept_len: usize,
        supports_stop_dtmf: bool,
        tone_duration: Duration,
        cancel: CancellationToken,
    ) -> Result<()> {
        let chars: Vec<char> = tones.chars().collect();
        let mut i = 0usize;

        while i < chars.len() {
            if cancel.is_cancelled() {
                return Err(VoiceError::cancelled("call was hung up during DTMF transmission"));
            }

            if chars[i] == ',' {
                interruptible_sleep(tone_duration, &cancel).await?;
                i += 1;
                continue;
            }

            let mut j = i;
            while j < chars.len() && chars[j] != ',' && (j - i) < accept_len {
                j += 1;
            }
            let chunk: String = chars[i..j].iter().collect();

            let accepted = plugin_call.send_dtmf(&chunk, cancel.clone()).await?;
            if accepted == 0 {
                return Err(VoiceError::plugin_failure(
                    "plugin accepted zero characters of a non-empty DTMF chunk",
                ));
            }

            if supports_stop_dtmf {
                interruptible_sleep(tone_duration, &cancel).await?;
                if cancel.is_cancelled() {
                    // The call ended during the wait; don't stop-dtmf a call
                    // that no longer exists.
                    return Err(VoiceError::cancelled("call was hung up during DTMF transmission"));
                }
                plugin_call.stop_dtmf(cancel.clone()).await?;
            }

            i += accepted;
        }

        Ok(())
    }
}

async fn interruptible_sleep(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(VoiceError::cancelled("call was hung up during DTMF transmission")),
    }
}
