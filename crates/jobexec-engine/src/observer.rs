// SPDX-License-Identifier: Apache-2.0

//! A priority-ordered, panic-isolating fan-out registry for phase update
//! notifications.

use jobexec_types::PhaseUpdateEvent;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use crate::phase::PhaseDetail;

/// Receives [`PhaseUpdateEvent`]s for the `RUNNING` and `ENDED` edges of a
/// phase's lifecycle.
pub trait PhaseObserver: Send + Sync {
    /// Called once per lifecycle edge. Must not block for long: it runs on
    /// the thread driving the phase tree.
    fn on_phase_update(&self, event: &PhaseUpdateEvent<PhaseDetail>);
}

struct Entry {
    priority: i32,
    seq: u64,
    observer: Arc<dyn PhaseObserver>,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    entries: Vec<Entry>,
}

/// Holds the observers registered against a single phase. Delivery order is
/// by descending priority, then registration order; a panicking observer is
/// caught and logged rather than aborting the remaining deliveries.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Inner>,
}

impl ObserverRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer at the given priority (higher runs first).
    pub fn add(&self, observer: Arc<dyn PhaseObserver>, priority: i32) {
        let mut inner = self.inner.lock().expect("observer registry poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.push(Entry { priority, seq, observer });
        inner.entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Removes every registration for the given observer (by pointer identity).
    pub fn remove(&self, observer: &Arc<dyn PhaseObserver>) {
        let mut inner = self.inner.lock().expect("observer registry poisoned");
        inner.entries.retain(|e| !Arc::ptr_eq(&e.observer, observer));
    }

    /// Delivers `event` to every registered observer in priority order.
    pub fn dispatch(&self, event: &PhaseUpdateEvent<PhaseDetail>) {
        let snapshot: Vec<Arc<dyn PhaseObserver>> = {
            let inner = self.inner.lock().expect("observer registry poisoned");
            inner.entries.iter().map(|e| e.observer.clone()).collect()
        };
        for observer in snapshot {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| observer.on_phase_update(event)));
            if let Err(payload) = result {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                tracing::warn!(panic = %message, "phase observer panicked; continuing dispatch");
            }
        }
    }
}
