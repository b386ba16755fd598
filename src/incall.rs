//! In-call resource manager.
//!
//! Per-modem singleton that tracks whether any call is in the "in-call"
//! set and opens/closes the audio channel and URC handlers exactly once
//! around that set's lifetime. Grounded on the setup/cleanup
//! cancellation-handle pattern of
//! `rvoip_session_core::coordinator::coordinator`'s `CleanupTracker` /
//! `CleanupLayer`, generalized from a one-shot session teardown to a
//! level-triggered idle/setting_up/in_call/cleaning_up loop.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{EventBus, VoiceEvent};
use crate::plugin::{AudioChannel, VoicePlugin};
use crate::registry::CallList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    SettingUp,
    InCall,
    CleaningUp,
}

struct Inner {
    phase: Phase,
    audio: Option<AudioChannel>,
    setup_cancel: Option<CancellationToken>,
    cleanup_cancel: Option<CancellationToken>,
}

/// Owns the in-call audio/URC lifecycle for one modem. `notify` coalesces
/// any number of `state-changed` emissions between re-evaluations into a
/// single pending re-evaluation, scheduling one re-evaluation on the
/// next loop tick rather than one per emission.
pub struct InCallManager {
    inner: Mutex<Inner>,
    notify: Notify,
    calls: Arc<CallList>,
    plugin: Arc<dyn VoicePlugin>,
    events: EventBus,
}

impl InCallManager {
    pub fn new(calls: Arc<CallList>, plugin: Arc<dyn VoicePlugin>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                audio: None,
                setup_cancel: None,
                cleanup_cancel: None,
            }),
            notify: Notify::new(),
            calls,
            plugin,
            events,
        })
    }

    /// Request a re-evaluation. Multiple calls before the evaluation
    /// runs coalesce into one (`Notify::notify_one` is idempotent while
    /// a permit is already pending).
    pub fn schedule_reevaluation(&self) {
        self.notify.notify_one();
    }

    /// Runs until `cancel` fires; wakes on every `schedule_reevaluation`
    /// and re-evaluates the in-call set exactly once per wake, draining
    /// any additional requests that arrived meanwhile.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    self.reevaluate().await;
                }
                _ = cancel.cancelled() => {
                    debug!("in-call resource manager stopping");
                    return;
                }
            }
        }
    }

    async fn n_in_call(&self) -> usize {
        let mut n = 0;
        for call in self.calls.snapshot().await {
            if call.state().await.is_in_call() {
                n += 1;
            }
        }
        n
    }

    async fn reevaluate(&self) {
        let n_in_call = self.n_in_call().await;
        let mut inner = self.inner.lock().await;

        match (inner.phase, n_in_call) {
            (Phase::Idle, n) if n > 0 => {
                if let Some(token) = inner.cleanup_cancel.take() {
                    token.cancel();
                }
                let setup_token = CancellationToken::new();
                inner.setup_cancel = Some(setup_token.clone());
                inner.phase = Phase::SettingUp;
                drop(inner);
                self.run_setup(setup_token).await;
            }
            (Phase::InCall, 0) => {
                if let Some(token) = inner.setup_cancel.take() {
                    token.cancel();
                }
                let cleanup_token = CancellationToken::new();
                inner.cleanup_cancel = Some(cleanup_token.clone());
                inner.phase = Phase::CleaningUp;
                drop(inner);
                self.run_cleanup(cleanup_token).await;
            }
            _ => {
                // Already setting_up or cleaning_up, or already in the
                // state the count calls for: nothing to do here. The
                // ongoing operation's own completion re-evaluates.
            }
        }
    }

    async fn run_setup(&self, cancel: CancellationToken) {
        let result = async {
            self.plugin.setup_in_call_unsolicited_events(cancel.clone()).await?;
            self.plugin.setup_in_call_audio_channel(cancel.clone()).await
        }
        .await;

        match result {
            Ok(audio) => {
                info!(port = %audio.port, "in-call audio channel opened");
                {
                    let mut inner = self.inner.lock().await;
                    inner.audio = Some(audio.clone());
                    inner.phase = Phase::InCall;
                    inner.setup_cancel = None;
                }
                self.events.publish(VoiceEvent::AudioChannelOpened {
                    port: audio.port.clone(),
                    format: audio.format.clone(),
                });
                for call in self.calls.snapshot().await {
                    if !call.state().await.is_terminal() {
                        call.set_audio(Some(audio.clone())).await;
                    }
                }
            }
            Err(e) => {
                // Setup failures never propagate to the client; the
                // affected calls simply stay without an audio path.
                warn!(error = %e, "in-call resource setup failed");
                let mut inner = self.inner.lock().await;
                inner.phase = Phase::Idle;
                inner.setup_cancel = None;
            }
        }

        // Re-check: the in-call set may have changed while setup ran.
        self.notify.notify_one();
    }

    async fn run_cleanup(&self, cancel: CancellationToken) {
        let result = async {
            self.plugin.cleanup_in_call_audio_channel(cancel.clone()).await?;
            self.plugin.cleanup_in_call_unsolicited_events(cancel.clone()).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("in-call audio channel closed");
                {
                    let mut inner = self.inner.lock().await;
                    inner.audio = None;
                    inner.phase = Phase::Idle;
                    inner.cleanup_cancel = None;
                }
                self.events.publish(VoiceEvent::AudioChannelClosed);
                for call in self.calls.snapshot().await {
                    call.set_audio(None).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "in-call resource cleanup failed");
                let mut inner = self.inner.lock().await;
                inner.phase = Phase::Idle;
                inner.cleanup_cancel = None;
            }
        }

        self.notify.notify_one();
    }

    pub async fn current_audio(&self) -> Option<AudioChannel> {
        self.inner.lock().await.audio.clone()
    }

    #[cfg(test)]
    async fn phase(&self) -> Phase {
        self.inner.lock().await.phase
    }
}
