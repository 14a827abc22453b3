//! Observed events emitted by the registry and session managers.
//!
//! Shaped after `rvoip-session-core::conference::events::ConferenceEvent`:
//! a plain enum, an `async_trait` handler, and a logging default handler
//! callers can register while they build their own.

use std::time::Instant;

use async_trait::async_trait;

use crate::bridge::Jid;

/// Events observed from the bridge registry and per-conference session
/// managers ("Observed events").
#[derive(Debug, Clone)]
pub enum ColibriEvent {
    /// A new bridge was added to the registry.
    BridgeAdded { jid: Jid, at: Instant },

    /// A bridge was removed from a conference's session set, with the
    /// participant ids evicted as a consequence.
    BridgeRemoved {
        jid: Jid,
        evicted_participants: Vec<String>,
        at: Instant,
    },

    /// A bridge transitioned into shutting-down state.
    BridgeShuttingDown { jid: Jid, at: Instant },

    /// A health check against a bridge failed outright (distinct from a
    /// timeout — see the design note on health-check severity).
    BridgeFailedHealthCheck { jid: Jid, at: Instant },

    /// Selection found no usable candidate for a participant.
    BridgeSelectionFailed { conference: String, participant: String, at: Instant },

    /// Selection chose a bridge for a participant.
    BridgeSelectionSucceeded { conference: String, participant: String, bridge: Jid, at: Instant },

    /// The number of bridges in use by a conference changed.
    BridgeCountChanged { conference: String, count: usize, at: Instant },

    /// A participant's endpoint was removed from its bridge.
    EndpointRemoved { conference: String, participant: String, at: Instant },
}

/// Handles events published by the registry or a session manager.
#[async_trait]
pub trait ColibriEventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: ColibriEvent);
}

/// Default handler that logs every event at an appropriate level.
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

#[async_trait]
impl ColibriEventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: ColibriEvent) {
        match &event {
            ColibriEvent::BridgeAdded { jid, .. } => {
                tracing::info!(bridge = %jid, "bridge added to registry");
            }
            ColibriEvent::BridgeRemoved { jid, evicted_participants, .. } => {
                tracing::warn!(
                    bridge = %jid,
                    evicted = evicted_participants.len(),
                    "bridge removed from conference"
                );
            }
            ColibriEvent::BridgeShuttingDown { jid, .. } => {
                tracing::info!(bridge = %jid, "bridge entered graceful shutdown");
            }
            ColibriEvent::BridgeFailedHealthCheck { jid, .. } => {
                tracing::warn!(bridge = %jid, "bridge failed health check");
            }
            ColibriEvent::BridgeSelectionFailed { conference, participant, .. } => {
                tracing::warn!(
                    conference = %conference,
                    participant = %participant,
                    "bridge selection failed"
                );
            }
            ColibriEvent::BridgeSelectionSucceeded { conference, participant, bridge, .. } => {
                tracing::debug!(
                    conference = %conference,
                    participant = %participant,
                    bridge = %bridge,
                    "bridge selected"
                );
            }
            ColibriEvent::BridgeCountChanged { conference, count, .. } => {
                tracing::debug!(conference = %conference, count, "bridge count changed");
            }
            ColibriEvent::EndpointRemoved { conference, participant, .. } => {
                tracing::debug!(
                    conference = %conference,
                    participant = %participant,
                    "endpoint removed"
                );
            }
        }
    }
}

/// Holds registered handlers and fan-out publishes events to them, matching
/// `ConferenceManager::event_handlers` / `publish_event`.
#[derive(Default)]
pub struct EventPublisher {
    handlers: tokio::sync::RwLock<Vec<(String, std::sync::Arc<dyn ColibriEventHandler>)>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_handler(&self, name: impl Into<String>, handler: std::sync::Arc<dyn ColibriEventHandler>) {
        self.handlers.write().await.push((name.into(), handler));
    }

    pub async fn remove_handler(&self, name: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        if let Some(pos) = handlers.iter().position(|(n, _)| n == name) {
            handlers.remove(pos);
            true
        } else {
            false
        }
    }

    pub async fn publish(&self, event: ColibriEvent) {
        let handlers = self.handlers.read().await;
        for (_, handler) in handlers.iter() {
            handler.handle_event(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}
