//! Import lifecycle state machine
//!
//! Per document key: `Unknown → Requested → Processing → Ready`, with a
//! terminal `Failed` reachable while an import is active. Invalid transitions
//! are no-ops rather than errors, which is what makes re-entrant import
//! requests and duplicate server frames safe.

use folio_common::{DocumentKey, RemoteStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Lifecycle state of one document's server-side import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImportState {
    /// No prior activity for this key
    Unknown,
    /// Import requested, backend has not started processing yet
    Requested,
    /// Backend is fetching/parsing/enriching the document
    Processing,
    /// Terminal: canonical document available
    Ready,
    /// Terminal: import failed, detail is suitable for display
    Failed { detail: String },
}

impl ImportState {
    /// Terminal states are only left by a fresh import request
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportState::Ready | ImportState::Failed { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self, ImportState::Requested | ImportState::Processing)
    }

    /// Apply one event to this state.
    pub fn apply(&self, event: &StateEvent) -> Transition {
        use ImportState::*;

        match event {
            StateEvent::ImportRequested => match self {
                Unknown | Ready | Failed { .. } => Transition::Changed(Requested),
                // Idempotent re-request: the import is already in flight
                Requested | Processing => Transition::Ignored,
            },

            StateEvent::DataReceived => match self {
                Unknown | Requested | Processing => Transition::Changed(Ready),
                Ready | Failed { .. } => Transition::Ignored,
            },

            StateEvent::TransportFailed { detail } => match self {
                // Only an active import is poisoned by losing its channel
                Requested | Processing => Transition::Changed(Failed {
                    detail: detail.clone(),
                }),
                _ => Transition::Ignored,
            },

            StateEvent::Status { status, error } => {
                if let Some(detail) = error {
                    return match self {
                        Ready | Failed { .. } => Transition::Ignored,
                        _ => Transition::Changed(Failed {
                            detail: detail.clone(),
                        }),
                    };
                }
                match status {
                    Some(RemoteStatus::Waiting) => match self {
                        // The server may already know about an import this
                        // client never requested
                        Unknown => Transition::Changed(Requested),
                        _ => Transition::Ignored,
                    },
                    Some(RemoteStatus::Processing) | Some(RemoteStatus::Summarizing) => {
                        match self {
                            Unknown | Requested => Transition::Changed(Processing),
                            _ => Transition::Ignored,
                        }
                    }
                    Some(RemoteStatus::Ready) => match self {
                        Unknown | Requested | Processing => Transition::Changed(Ready),
                        _ => Transition::Ignored,
                    },
                    Some(RemoteStatus::Failed) => match self {
                        Ready | Failed { .. } => Transition::Ignored,
                        _ => Transition::Changed(Failed {
                            detail: "import failed".to_string(),
                        }),
                    },
                    Some(RemoteStatus::Timeout) => match self {
                        Ready | Failed { .. } => Transition::Ignored,
                        _ => Transition::Changed(Failed {
                            detail: "import timed out (time limit exceeded)".to_string(),
                        }),
                    },
                    None => Transition::Ignored,
                }
            }
        }
    }
}

/// Events that drive the state machine
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// Explicit import request from the consumer
    ImportRequested,

    /// Status frame or status-poll snapshot from the backend
    Status {
        status: Option<RemoteStatus>,
        error: Option<String>,
    },

    /// Canonical document payload arrived
    DataReceived,

    /// The channel dropped and reconnects were exhausted
    TransportFailed { detail: String },
}

/// Outcome of applying an event
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Changed(ImportState),
    /// Invalid or redundant for the current state; a no-op, not a failure
    Ignored,
}

/// Callback notified on every applied transition for an observed key
pub type StateObserver = Arc<dyn Fn(&DocumentKey, &ImportState) + Send + Sync>;

/// Handle for removing a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

/// Tracks the import state of every known key and its observers.
///
/// Plain single-owner form; [`SharedTracker`] wraps it for use from channel
/// tasks and the facade.
#[derive(Default)]
pub struct ImportTracker {
    states: HashMap<DocumentKey, ImportState>,
    observers: HashMap<DocumentKey, Vec<(ObserverId, StateObserver)>>,
    next_observer: u64,
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for the key; `Unknown` when never seen
    pub fn state(&self, key: &DocumentKey) -> ImportState {
        self.states.get(key).cloned().unwrap_or(ImportState::Unknown)
    }

    /// Key with an active (non-terminal, non-unknown) import for this paper,
    /// across versions. Used for import-request idempotence.
    pub fn active_for(&self, paper_id: &str) -> Option<DocumentKey> {
        self.states
            .iter()
            .find(|(k, s)| k.paper_id == paper_id && s.is_active())
            .map(|(k, _)| k.clone())
    }

    /// Apply an event; returns the new state when a transition happened.
    ///
    /// Does not notify observers so it can run behind a lock; callers that
    /// need notification use [`SharedTracker::apply`] or pair this with
    /// [`ImportTracker::observers_for`].
    pub fn apply(&mut self, key: &DocumentKey, event: &StateEvent) -> Option<ImportState> {
        let current = self.state(key);
        match current.apply(event) {
            Transition::Changed(next) => {
                tracing::debug!("{key}: {current:?} -> {next:?}");
                self.states.insert(key.clone(), next.clone());
                Some(next)
            }
            Transition::Ignored => {
                tracing::trace!("{key}: {event:?} ignored in {current:?}");
                None
            }
        }
    }

    pub fn observe(&mut self, key: &DocumentKey, observer: StateObserver) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers
            .entry(key.clone())
            .or_default()
            .push((id, observer));
        id
    }

    pub fn unobserve(&mut self, key: &DocumentKey, id: ObserverId) {
        if let Some(list) = self.observers.get_mut(key) {
            list.retain(|(oid, _)| *oid != id);
            if list.is_empty() {
                self.observers.remove(key);
            }
        }
    }

    /// Snapshot of the observers registered for a key
    pub fn observers_for(&self, key: &DocumentKey) -> Vec<StateObserver> {
        self.observers
            .get(key)
            .map(|list| list.iter().map(|(_, o)| o.clone()).collect())
            .unwrap_or_default()
    }
}

/// Thread-safe tracker handle shared between channel tasks and the facade.
///
/// Observer callbacks run after the internal lock is released, so an observer
/// may call back into the tracker without deadlocking.
#[derive(Clone, Default)]
pub struct SharedTracker {
    inner: Arc<Mutex<ImportTracker>>,
}

impl SharedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &DocumentKey) -> ImportState {
        self.lock().state(key)
    }

    pub fn active_for(&self, paper_id: &str) -> Option<DocumentKey> {
        self.lock().active_for(paper_id)
    }

    pub fn observe(&self, key: &DocumentKey, observer: StateObserver) -> ObserverId {
        self.lock().observe(key, observer)
    }

    pub fn unobserve(&self, key: &DocumentKey, id: ObserverId) {
        self.lock().unobserve(key, id)
    }

    /// Apply an event and notify every observer of the key on a transition.
    pub fn apply(&self, key: &DocumentKey, event: &StateEvent) -> Option<ImportState> {
        let (changed, observers) = {
            let mut tracker = self.lock();
            let changed = tracker.apply(key, event);
            let observers = if changed.is_some() {
                tracker.observers_for(key)
            } else {
                Vec::new()
            };
            (changed, observers)
        };

        if let Some(state) = &changed {
            for observer in observers {
                observer(key, state);
            }
        }
        changed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ImportTracker> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
