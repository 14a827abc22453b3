//! Process-wide registry of known bridges.
//!
//! Structured after `rvoip-session-core::conference::manager::ConferenceManager`:
//! a `DashMap` for the entity table, an `EventPublisher` for fan-out
//! notification, and async methods that take the write path through the map
//! directly (the corpus favors `DashMap`'s per-entry locking over a single
//! outer `RwLock` for this kind of registry).

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::bridge::{Bridge, BridgeStateChange, BridgeStats, Jid};
use crate::events::{ColibriEvent, ColibriEventHandler, EventPublisher};

/// Process-wide map of known bridges. The sole mutation owner of `Bridge`
/// state — `SessionManager`s read snapshots and never mutate a `Bridge`
/// directly ("Shared resource policy").
#[derive(Default)]
pub struct BridgeRegistry {
    bridges: DashMap<Jid, Bridge>,
    events: EventPublisher,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_event_handler(&self, name: impl Into<String>, handler: Arc<dyn ColibriEventHandler>) {
        self.events.add_handler(name, handler).await;
    }

    pub async fn remove_event_handler(&self, name: &str) -> bool {
        self.events.remove_handler(name).await
    }

    /// Insert a newly-discovered bridge, or refresh an existing one's
    /// stats. Emits `BridgeAdded` only for a genuinely new bridge, and
    /// `BridgeShuttingDown` if this report is the false→true transition.
    pub async fn add(&self, jid: Jid, stats: Option<BridgeStats>) {
        let mut newly_added = false;
        let mut changes = Vec::new();

        {
            let mut entry = self.bridges.entry(jid.clone()).or_insert_with(|| {
                newly_added = true;
                Bridge::new(jid.clone())
            });
            if let Some(stats) = &stats {
                changes.extend(entry.update_stats(stats));
            }
        }

        if newly_added {
            tracing::info!(bridge = %jid, "bridge discovered");
            self.events
                .publish(ColibriEvent::BridgeAdded { jid: jid.clone(), at: Instant::now() })
                .await;
        }

        for change in changes {
            if change == BridgeStateChange::EnteredShuttingDown {
                self.events
                    .publish(ColibriEvent::BridgeShuttingDown { jid: jid.clone(), at: Instant::now() })
                    .await;
            }
        }
    }

    /// Mark a bridge as shutting down (one-way latch on `Bridge`).
    /// Emits `BridgeShuttingDown` on the false→true transition.
    pub async fn mark_shutting_down(&self, jid: &Jid) {
        let changed = self
            .bridges
            .get_mut(jid)
            .and_then(|mut b| b.set_shutting_down());

        if changed.is_some() {
            self.events
                .publish(ColibriEvent::BridgeShuttingDown { jid: jid.clone(), at: Instant::now() })
                .await;
        }
    }

    /// Remove a bridge entirely (discovery loss or explicit teardown).
    pub async fn remove(&self, jid: &Jid) {
        if self.bridges.remove(jid).is_some() {
            tracing::info!(bridge = %jid, "bridge removed from registry");
            self.events
                .publish(ColibriEvent::BridgeRemoved {
                    jid: jid.clone(),
                    evicted_participants: Vec::new(),
                    at: Instant::now(),
                })
                .await;
        }
    }

    /// A health check against this bridge succeeded: `operational = true`.
    pub async fn health_check_passed(&self, jid: &Jid) {
        if let Some(mut b) = self.bridges.get_mut(jid) {
            b.set_operational(true);
        }
    }

    /// A health check against this bridge failed outright: `operational =
    /// false`, and — unlike a timeout — an alarm-worthy event is emitted.
    pub async fn health_check_failed(&self, jid: &Jid) {
        let changed = self.bridges.get_mut(jid).and_then(|mut b| b.set_operational(false));
        if changed.is_some() {
            self.events
                .publish(ColibriEvent::BridgeFailedHealthCheck { jid: jid.clone(), at: Instant::now() })
                .await;
        }
    }

    /// A health check against this bridge timed out: `operational =
    /// false`, but no alarm event — timeouts are treated as less severe
    /// than an explicit failure.
    pub async fn health_check_timed_out(&self, jid: &Jid) {
        if let Some(mut b) = self.bridges.get_mut(jid) {
            b.set_operational(false);
        }
    }

    /// An RPC against this bridge timed out or was rejected as unavailable
    /// — driven by `SessionManager`'s error classification rather than the
    /// health-check subsystem, but the same effect on the bridge record.
    pub async fn mark_unavailable(&self, jid: &Jid) {
        if let Some(mut b) = self.bridges.get_mut(jid) {
            b.set_operational(false);
        }
    }

    /// An RPC against this bridge reported `graceful-shutdown`.
    pub async fn mark_graceful_shutdown(&self, jid: &Jid) {
        if let Some(mut b) = self.bridges.get_mut(jid) {
            b.set_graceful_shutdown();
        }
    }

    /// A value snapshot of a bridge, if known. Never a live reference —
    /// callers must route mutation through the registry.
    pub fn get(&self, jid: &Jid) -> Option<Bridge> {
        self.bridges.get(jid).map(|b| b.clone())
    }

    /// Selectable bridges, optionally filtered to an exact version match,
    /// for consumption by a `SelectionStrategy`.
    pub fn candidates(&self, version: Option<&str>) -> Vec<Bridge> {
        self.bridges
            .iter()
            .map(|e| e.value().clone())
            .filter(|b| b.selectable())
            .filter(|b| match version {
                Some(v) => b.version() == Some(v),
                None => true,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}
