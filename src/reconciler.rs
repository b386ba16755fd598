//! Call-list reconciler.
//!
//! Bridges plugin event streams that can drop or re-order updates with
//! the authoritative `CallList`, by periodically polling the plugin for
//! a full snapshot while any call is in an "establishing" state.
//! Grounded on the periodic-refresh task pattern of
//! `rvoip_session_core::events::task_manager`'s `TrackedTaskManager`
//! (a named background task the coordinator can cancel as a unit).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::VoiceConfig;
use crate::controller::VoiceController;
use crate::plugin::VoicePlugin;

/// Per-modem reconciler state and driving loop. Holds only a `Weak`
/// back-reference to the controller: the controller owns this
/// reconciler's `Arc`, so a strong reference here would be a cycle.
pub struct Reconciler {
    controller: Weak<VoiceController>,
    plugin: Arc<dyn VoicePlugin>,
    config: Arc<VoiceConfig>,
    /// Set once `plugin.load_call_list` reports `unsupported`, permanently
    /// disabling the reconciler for this modem.
    disabled: AtomicBool,
    /// Woken whenever a call is added or a report may have changed the
    /// establishing count, so the loop re-checks without waiting a full
    /// period.
    wake: Notify,
}

impl Reconciler {
    pub fn new(controller: Weak<VoiceController>, plugin: Arc<dyn VoicePlugin>, config: Arc<VoiceConfig>) -> Arc<Self> {
        Arc::new(Self {
            controller,
            plugin,
            config,
            disabled: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    /// Called by the controller whenever the establishing-call count may
    /// have changed (a call added, or any state transition). Cheap: just
    /// a `Notify` permit.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if self.disabled.load(Ordering::SeqCst) {
                return;
            }

            let Some(controller) = self.controller.upgrade() else {
                debug!("controller dropped; stopping reconciler");
                return;
            };
            let establishing = controller.call_list().establishing_count().await;
            drop(controller);
            if establishing == 0 {
                // Not scheduled: wait for a nudge or cancellation, no
                // polling in between while nothing is establishing.
                tokio::select! {
                    _ = self.wake.notified() => continue,
                    _ = cancel.cancelled() => return,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(*self.config.reconciler_period) => {}
                _ = self.wake.notified() => continue,
                _ = cancel.cancelled() => return,
            }

            let Some(controller) = self.controller.upgrade() else { return };
            if controller.call_list().establishing_count().await == 0 {
                continue;
            }

            debug!("reconciler polling plugin for full call list");
            let poll_revisions: std::collections::HashMap<_, _> = controller
                .call_list()
                .snapshot()
                .await
                .iter()
                .map(|c| (c.id().clone(), c.revision()))
                .collect();
            match self.plugin.load_call_list(cancel.clone()).await {
                Ok(infos) => {
                    if let Err(e) = controller.report_all_calls(infos, poll_revisions).await {
                        warn!(error = %e, "reconciler's report_all_calls failed");
                    }
                }
                Err(e) if e.category() == "unsupported" => {
                    debug!("plugin has no call-list concept; disabling reconciler");
                    self.disabled.store(true, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "reconciler poll failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Exercised end-to-end in tests/reconciler_tests.rs against a
    // MockPlugin and a real VoiceController; unit-testing this loop in
    // isolation would mostly re-test tokio::select!, so the meaningful
    // coverage lives at the controller-integration level.
}
