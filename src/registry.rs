//! The `CallList` registry: a per-modem mapping from call
//! identifier to `Call`. Grounded on the `InternalSessionRegistry`
//! pattern referenced from `rvoip_session_core::coordinator::coordinator`
//! (a concurrent map owned exclusively by the root coordinator).

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexSet;
use tokio::sync::RwLock;

use crate::call::Call;
use crate::types::CallId;

/// Owns every `Call` for one modem. Insertion order is preserved (via
/// the side-band `IndexSet`) for diagnostic dumps; call order is not
/// semantically significant but still worth keeping deterministic for
/// `ListCalls`/debug output.
#[derive(Default)]
pub struct CallList {
    calls: DashMap<CallId, Arc<Call>>,
    order: RwLock<IndexSet<CallId>>,
}

impl CallList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, call: Arc<Call>) {
        let id = call.id().clone();
        self.calls.insert(id.clone(), call);
        self.order.write().await.insert(id);
    }

    pub fn get(&self, id: &CallId) -> Option<Arc<Call>> {
        self.calls.get(id).map(|entry| entry.value().clone())
    }

    pub async fn remove(&self, id: &CallId) -> Option<Arc<Call>> {
        self.order.write().await.shift_remove(id);
        self.calls.remove(id).map(|(_, call)| call)
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Snapshot of every call currently registered, in insertion order.
    pub async fn snapshot(&self) -> Vec<Arc<Call>> {
        let order = self.order.read().await;
        order.iter().filter_map(|id| self.get(id)).collect()
    }

    /// Snapshot restricted to calls that have not yet reached `terminated`.
    pub async fn snapshot_non_terminated(&self) -> Vec<Arc<Call>> {
        let mut out = Vec::new();
        for call in self.snapshot().await {
            if !call.state().await.is_terminal() {
                out.push(call);
            }
        }
        out
    }

    pub async fn object_paths(&self) -> Vec<String> {
        self.snapshot().await.iter().map(|c| c.id().object_path()).collect()
    }

    /// Number of calls in the "establishing" set — the gate the
    /// reconciler uses to decide whether polling should run at all.
    pub async fn establishing_count(&self) -> usize {
        let mut n = 0;
        for call in self.snapshot().await {
            if call.state().await.is_establishing() {
                n += 1;
            }
        }
        n
    }
}
