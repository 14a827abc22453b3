//! Per-conference `SessionManager`.
//!
//! Owns the sessions, participants, and Octo relay mesh for one conference.
//! Structured after `rvoip-session-core::conference::manager::ConferenceManager`:
//! a single struct wrapping its mutable state behind one lock plus
//! `Arc`-shared collaborators (`BridgeRegistry`, `ControlChannel`), with
//! async methods that are the conference's only entry points.
//!
//! The lock is never held across an RPC await (other conference
//! operations may proceed while an allocate is in flight). Every method that
//! talks to a bridge follows the same split: acquire the lock, read/mutate
//! bookkeeping and build the outgoing request, release the lock, await the
//! RPC, reacquire the lock to apply the response with a staleness check.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::bridge::{Bridge, Jid, RelayId};
use crate::colibri::protocol::ConferenceModifyResponse;
use crate::colibri::ControlChannel;
use crate::config::BridgeSelectionConfig;
use crate::error::ColibriError;
use crate::events::{ColibriEvent, ColibriEventHandler, EventPublisher};
use crate::participant::{AllocationParams, ColibriAllocation, ConferenceBridgeProperties, MediaType, ParticipantInfo};
use crate::registry::BridgeRegistry;
use crate::selection::{prefilter, ConferenceBridge, SelectionParticipantProps, SelectionStrategy, Strategy};
use crate::session::{classify_error, map_channel_result, transport_from_wire, Session};

/// The session-map key for a bridge: its relay id, or its jid when no relay
/// id has been announced yet (notes `relayId` "may appear or change
/// once"; keying degenerates to jid identity in its absence without
/// breaking the "no two sessions share a key" invariant).
pub fn session_key(bridge: &Bridge) -> String {
    bridge.relay_id().map(|r| r.0.clone()).unwrap_or_else(|| bridge.jid().0.clone())
}

/// Decides which already-established session keys a newly-created session
/// should wire Octo relays to. Pluggable so a
/// future partitioned scheme can replace `FullMesh` without touching
/// `SessionManager`.
pub trait MeshTopology: Send + Sync {
    fn peers_for(&self, new_key: &str, existing_keys: &[String]) -> Vec<String>;
}

/// The only topology this crate ships (Open Question: meshId
/// partitioning above N bridges is not implemented).
#[derive(Debug, Default, Clone, Copy)]
pub struct FullMesh;

impl MeshTopology for FullMesh {
    fn peers_for(&self, new_key: &str, existing_keys: &[String]) -> Vec<String> {
        existing_keys.iter().filter(|k| k.as_str() != new_key).cloned().collect()
    }
}

#[derive(Default)]
struct ManagerState {
    sessions: HashMap<String, Session>,
    participants: HashMap<String, ParticipantInfo>,
    participants_by_session: HashMap<String, HashSet<String>>,
}

/// Owns everything one conference needs to place, update, and tear down
/// participants across one or more bridges.
pub struct SessionManager {
    conference_id: String,
    local_address: String,
    registry: Arc<BridgeRegistry>,
    channel: Arc<dyn ControlChannel>,
    strategy: Strategy,
    config: BridgeSelectionConfig,
    allow_multi_bridge: bool,
    rpc_deadline: Duration,
    mesh: Box<dyn MeshTopology>,
    events: EventPublisher,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn new(
        conference_id: impl Into<String>,
        local_address: impl Into<String>,
        registry: Arc<BridgeRegistry>,
        channel: Arc<dyn ControlChannel>,
        strategy: Strategy,
        config: BridgeSelectionConfig,
        allow_multi_bridge: bool,
        rpc_deadline: Duration,
    ) -> Self {
        Self {
            conference_id: conference_id.into(),
            local_address: local_address.into(),
            registry,
            channel,
            strategy,
            config,
            allow_multi_bridge,
            rpc_deadline,
            mesh: Box::new(FullMesh),
            events: EventPublisher::new(),
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn with_mesh_topology(mut self, mesh: Box<dyn MeshTopology>) -> Self {
        self.mesh = mesh;
        self
    }

    pub async fn add_event_handler(&self, name: impl Into<String>, handler: Arc<dyn ColibriEventHandler>) {
        self.events.add_handler(name, handler).await;
    }

    pub async fn remove_event_handler(&self, name: &str) -> bool {
        self.events.remove_handler(name).await
    }

    pub fn conference_id(&self) -> &str {
        &self.conference_id
    }

    /// The conference's current bridges and their conference-local
    /// properties, as consumed by `SelectionStrategy`.
    pub async fn get_bridges(&self) -> Vec<ConferenceBridge> {
        let state = self.state.lock().await;
        state
            .sessions
            .iter()
            .filter_map(|(key, session)| {
                let bridge = self.registry.get(session.bridge_jid())?;
                let participant_count = state.participants_by_session.get(key).map(|s| s.len()).unwrap_or(0);
                Some(ConferenceBridge {
                    properties: ConferenceBridgeProperties {
                        participant_count,
                        visitor: session.visitor(),
                        stress: Some(bridge.stress()),
                        region: bridge.region().map(|r| r.to_string()),
                        version: bridge.version().map(|v| v.to_string()),
                    },
                    bridge,
                })
            })
            .collect()
    }

    /// Places a new participant on a bridge chosen by `self.strategy`.
    /// Rejects a duplicate id outright; on selection failure or RPC
    /// failure, no partial state survives past this call (the participant
    /// and, if this was its session's only participant, the session itself
    /// are rolled back).
    pub async fn allocate(&self, params: AllocationParams) -> Result<ColibriAllocation, ColibriError> {
        {
            let state = self.state.lock().await;
            if state.participants.contains_key(&params.id) {
                return Err(ColibriError::ParticipantAlreadyExists(params.id.clone()));
            }
        }

        let conference_bridges = self.get_bridges().await;
        let candidates = prefilter(
            self.registry.candidates(params.pinned_version.as_deref()),
            params.pinned_version.as_deref(),
            self.config.allow_selection_if_no_pinned_match,
        );
        let candidates: Vec<Bridge> = candidates
            .into_iter()
            .filter(|b| b.stress() <= self.config.max_bridge_stress)
            .collect();

        let selection_props = SelectionParticipantProps { region: params.region.clone(), visitor: params.visitor };
        let chosen = self.strategy.select(
            &candidates,
            &conference_bridges,
            &selection_props,
            self.allow_multi_bridge,
            self.config.max_stress_level,
        );

        let Some(bridge) = chosen else {
            self.events
                .publish(ColibriEvent::BridgeSelectionFailed {
                    conference: self.conference_id.clone(),
                    participant: params.id.clone(),
                    at: Instant::now(),
                })
                .await;
            return Err(ColibriError::BridgeSelectionFailed);
        };

        self.events
            .publish(ColibriEvent::BridgeSelectionSucceeded {
                conference: self.conference_id.clone(),
                participant: params.id.clone(),
                bridge: bridge.jid().clone(),
                at: Instant::now(),
            })
            .await;

        let key = session_key(&bridge);
        let mut session_is_new = false;
        let mut peers = Vec::new();

        {
            let mut state = self.state.lock().await;
            if !state.sessions.contains_key(&key) {
                peers = self.mesh.peers_for(&key, &state.sessions.keys().cloned().collect::<Vec<_>>());
                let session = Session::new(bridge.jid().clone(), bridge.relay_id().cloned(), self.local_address.clone(), params.visitor);
                state.sessions.insert(key.clone(), session);
                state.participants_by_session.insert(key.clone(), HashSet::new());
                session_is_new = true;
            }

            let mut participant = ParticipantInfo::new(params.id.clone(), params.visitor, params.region.clone());
            participant.use_sctp = params.use_sctp;
            participant.sources = params.sources.clone();
            participant.display_name = params.display_name.clone();
            participant.session_key = Some(key.clone());
            state.participants.insert(params.id.clone(), participant);
            state.participants_by_session.entry(key.clone()).or_default().insert(params.id.clone());
        }

        if session_is_new {
            let count = self.state.lock().await.sessions.len();
            self.events
                .publish(ColibriEvent::BridgeCountChanged { conference: self.conference_id.clone(), count, at: Instant::now() })
                .await;
            self.wire_relays(&key, &peers).await;
        }

        let request = {
            let state = self.state.lock().await;
            let session = state
                .sessions
                .get(&key)
                .ok_or_else(|| ColibriError::Internal("session disappeared mid-allocate".into()))?;
            let participant = state
                .participants
                .get(&params.id)
                .ok_or_else(|| ColibriError::Internal("participant disappeared mid-allocate".into()))?;
            session.build_allocate_request(participant)
        };

        let raw = self.channel.send_conference_modify(bridge.jid(), request, self.rpc_deadline).await;

        let mut state = self.state.lock().await;
        let still_current = state
            .participants
            .get(&params.id)
            .map(|p| p.session_key.as_deref() == Some(key.as_str()))
            .unwrap_or(false);

        if !still_current {
            return Err(ColibriError::SessionReplacedDuringAwait);
        }

        match map_channel_result(raw) {
            Ok(success) => {
                let region = bridge.region().map(|r| r.to_string());
                let transport = success
                    .endpoint_transports
                    .iter()
                    .find(|(id, _)| id == &params.id)
                    .map(|(_, t)| transport_from_wire(t.clone()));

                let conference_id_result = match state.sessions.get_mut(&key) {
                    Some(session) => match &success.conference_id {
                        Some(conference_id) => session.record_conference_id(conference_id),
                        None => Ok(()),
                    },
                    None => Err(ColibriError::Internal("session disappeared mid-allocate".into())),
                };

                if let Err(err) = conference_id_result {
                    self.rollback_failed_allocate(&mut state, &key, &params.id, &err).await;
                    return Err(err);
                }

                if let Some(session) = state.sessions.get_mut(&key) {
                    session.set_feedback_sources(success.feedback_sources.clone());
                }
                let feedback_sources = state.sessions.get(&key).and_then(|s| s.feedback_sources().cloned());
                let bridge_session_id = key.clone();

                if let Some(participant) = state.participants.get_mut(&params.id) {
                    participant.transport = transport.clone();
                }

                Ok(ColibriAllocation { feedback_sources, transport, region, bridge_session_id, sctp_port: success.sctp_port })
            }
            Err(err) => {
                self.rollback_failed_allocate(&mut state, &key, &params.id, &err).await;
                Err(err)
            }
        }
    }

    /// Reflects an RPC failure's error kind onto the bridge's shared
    /// registry record: `Timeout`/`BridgeUnavailable` mark it
    /// non-operational, `BridgeGracefulShutdown` latches it into graceful
    /// shutdown. Other error kinds (e.g. `ConferenceNotFound`,
    /// `StateMismatch`) say nothing about the bridge itself and are left
    /// alone.
    async fn reflect_bridge_error(&self, jid: &Jid, err: &ColibriError) {
        match err {
            ColibriError::Timeout | ColibriError::BridgeUnavailable => {
                self.registry.mark_unavailable(jid).await;
            }
            ColibriError::BridgeGracefulShutdown => {
                self.registry.mark_graceful_shutdown(jid).await;
            }
            _ => {}
        }
    }

    /// On an allocate failure, always evict the participant that never
    /// succeeded; additionally tear down the whole session if the error
    /// kind implies the bridge itself must be removed.
    async fn rollback_failed_allocate(&self, state: &mut ManagerState, key: &str, participant_id: &str, err: &ColibriError) {
        state.participants.remove(participant_id);
        if let Some(members) = state.participants_by_session.get_mut(key) {
            members.remove(participant_id);
        }

        if err.removes_bridge() {
            if let Some(jid) = state.sessions.get(key).map(|s| s.bridge_jid().clone()) {
                self.reflect_bridge_error(&jid, err).await;
            }
            self.teardown_session_locked(state, key).await;
        }
    }

    /// Drops a session and evicts every participant it held, emitting
    /// `BridgeRemoved` with the evicted ids.
    async fn teardown_session_locked(&self, state: &mut ManagerState, key: &str) {
        let Some(session) = state.sessions.remove(key) else { return };
        let evicted: Vec<String> = state.participants_by_session.remove(key).map(|s| s.into_iter().collect()).unwrap_or_default();
        for id in &evicted {
            state.participants.remove(id);
        }

        if let Some(relay_id) = session.relay_id().cloned() {
            for other in state.sessions.values_mut() {
                other.expire_relay(&relay_id);
            }
        }

        self.events
            .publish(ColibriEvent::BridgeRemoved {
                jid: session.bridge_jid().clone(),
                evicted_participants: evicted,
                at: Instant::now(),
            })
            .await;
        self.events
            .publish(ColibriEvent::BridgeCountChanged {
                conference: self.conference_id.clone(),
                count: state.sessions.len(),
                at: Instant::now(),
            })
            .await;
    }

    /// Updates transport/sources/initial-last-n for a participant already
    /// allocated.
    pub async fn update_participant(
        &self,
        participant_id: &str,
        transport: Option<crate::colibri::protocol::TransportElement>,
        sources: Option<serde_json::Value>,
        initial_last_n: Option<i32>,
    ) -> Result<(), ColibriError> {
        if transport.is_none() && sources.is_none() && initial_last_n.is_none() {
            return Ok(());
        }

        let (bridge_jid, key, built) = {
            let state = self.state.lock().await;
            let participant = state
                .participants
                .get(participant_id)
                .ok_or_else(|| ColibriError::Internal(format!("unknown participant {participant_id}")))?;
            let key = participant
                .session_key
                .clone()
                .ok_or_else(|| ColibriError::Internal(format!("participant {participant_id} has no session")))?;
            let session = state
                .sessions
                .get(&key)
                .ok_or_else(|| ColibriError::Internal(format!("session {key} missing for participant {participant_id}")))?;
            let bridge_jid = session.bridge_jid().clone();

            let mut req = crate::colibri::protocol::ConferenceModifyRequest::new(
                bridge_jid.to_string(),
                self.local_address.clone(),
                session.id().map(|s| s.to_string()),
            );
            req.endpoints.push(crate::colibri::protocol::EndpointElement {
                id: participant_id.to_string(),
                transport,
                sources,
                initial_last_n,
                ..Default::default()
            });
            (bridge_jid, key, req)
        };

        let raw = self.channel.send_conference_modify(&bridge_jid, built, self.rpc_deadline).await;

        let mut state = self.state.lock().await;
        let still_current = state.participants.get(participant_id).map(|p| p.session_key.as_deref() == Some(key.as_str())).unwrap_or(false);
        if !still_current {
            return Err(ColibriError::SessionReplacedDuringAwait);
        }

        match map_channel_result(raw) {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.removes_bridge() {
                    self.reflect_bridge_error(&bridge_jid, &err).await;
                    self.teardown_session_locked(&mut state, &key).await;
                }
                Err(err)
            }
        }
    }

    /// Sets each listed participant's mute flag and, for every session that
    /// ends up with at least one changed participant, sends exactly one
    /// force-mute update covering every current sibling on that session
    /// (batched across the whole input list, not per-id: N ids sharing a
    /// session cost one RPC, not N). Each id's result is returned
    /// independently — an unknown id or a per-session RPC failure only
    /// affects the ids on that session, not the rest of the batch.
    pub async fn mute<S: AsRef<str>>(
        &self,
        participant_ids: &[S],
        media: MediaType,
        muted: bool,
    ) -> Vec<(String, Result<bool, ColibriError>)> {
        let mut results: HashMap<String, Result<bool, ColibriError>> = HashMap::new();
        let mut changed_by_session: HashMap<String, Vec<String>> = HashMap::new();

        {
            let mut state = self.state.lock().await;
            for id in participant_ids {
                let id = id.as_ref();
                let Some(participant) = state.participants.get_mut(id) else {
                    results.insert(id.to_string(), Err(ColibriError::Internal(format!("unknown participant {id}"))));
                    continue;
                };
                if participant.mute_flag(media) == muted {
                    results.insert(id.to_string(), Ok(false));
                    continue;
                }
                participant.set_mute_flag(media, muted);
                let Some(key) = participant.session_key.clone() else {
                    results.insert(id.to_string(), Err(ColibriError::Internal(format!("participant {id} has no session"))));
                    continue;
                };
                changed_by_session.entry(key).or_default().push(id.to_string());
            }
        }

        for (key, changed_ids) in changed_by_session {
            let (bridge_jid, request) = {
                let state = self.state.lock().await;
                let Some(session) = state.sessions.get(&key) else {
                    for id in &changed_ids {
                        results.insert(id.clone(), Ok(true));
                    }
                    continue;
                };
                let bridge_jid = session.bridge_jid().clone();
                let Some(conference_id) = session.id() else {
                    for id in &changed_ids {
                        results.insert(id.clone(), Ok(true));
                    }
                    continue;
                };

                let siblings: Vec<ParticipantInfo> = state
                    .participants_by_session
                    .get(&key)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| state.participants.get(id).cloned())
                    .collect();

                let mut req = crate::colibri::protocol::ConferenceModifyRequest::new(
                    bridge_jid.to_string(),
                    self.local_address.clone(),
                    Some(conference_id.to_string()),
                );
                for p in &siblings {
                    req.endpoints.push(crate::colibri::protocol::EndpointElement {
                        id: p.id.clone(),
                        audio: Some(crate::colibri::protocol::MediaElement { requested: true, force_mute: Some(p.mute_flag(MediaType::Audio)) }),
                        video: Some(crate::colibri::protocol::MediaElement { requested: true, force_mute: Some(p.mute_flag(MediaType::Video)) }),
                        ..Default::default()
                    });
                }
                (bridge_jid, req)
            };

            let raw = self.channel.send_conference_modify(&bridge_jid, request, self.rpc_deadline).await;
            let mut state = self.state.lock().await;
            match map_channel_result(raw) {
                Ok(_) => {
                    for id in &changed_ids {
                        results.insert(id.clone(), Ok(true));
                    }
                }
                Err(err) => {
                    if err.removes_bridge() {
                        self.reflect_bridge_error(&bridge_jid, &err).await;
                        self.teardown_session_locked(&mut state, &key).await;
                    }
                    for id in &changed_ids {
                        results.insert(id.clone(), Err(err.clone()));
                    }
                }
            }
        }

        participant_ids
            .iter()
            .map(|id| {
                let id = id.as_ref().to_string();
                let result = results.remove(&id).unwrap_or_else(|| Err(ColibriError::Internal(format!("unknown participant {id}"))));
                (id, result)
            })
            .collect()
    }

    /// Removes one participant from its session, sending a per-endpoint
    /// expire. Idempotent (R3): a second call for an
    /// already-removed id is a no-op `Ok(())`.
    pub async fn remove_participant(&self, participant_id: &str) -> Result<(), ColibriError> {
        let (bridge_jid, key) = {
            let mut state = self.state.lock().await;
            let Some(participant) = state.participants.remove(participant_id) else {
                return Ok(());
            };
            let key = participant.session_key.clone();
            if let Some(key) = &key {
                if let Some(members) = state.participants_by_session.get_mut(key) {
                    members.remove(participant_id);
                }
            }
            match key {
                Some(key) => {
                    let bridge_jid = state.sessions.get(&key).map(|s| s.bridge_jid().clone());
                    (bridge_jid, key)
                }
                None => return Ok(()),
            }
        };

        let Some(bridge_jid) = bridge_jid else { return Ok(()) };

        let request = {
            let state = self.state.lock().await;
            let Some(session) = state.sessions.get(&key) else { return Ok(()) };
            let Some(conference_id) = session.id() else { return Ok(()) };
            let mut req = crate::colibri::protocol::ConferenceModifyRequest::new(
                bridge_jid.to_string(),
                self.local_address.clone(),
                Some(conference_id.to_string()),
            );
            req.endpoints.push(crate::colibri::protocol::EndpointElement {
                id: participant_id.to_string(),
                expire: true,
                ..Default::default()
            });
            req
        };

        let raw = self.channel.send_conference_modify(&bridge_jid, request, self.rpc_deadline).await;
        let mut state = self.state.lock().await;
        let result = match map_channel_result(raw) {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.removes_bridge() {
                    self.reflect_bridge_error(&bridge_jid, &err).await;
                    self.teardown_session_locked(&mut state, &key).await;
                }
                Err(err)
            }
        };

        self.events
            .publish(ColibriEvent::EndpointRemoved {
                conference: self.conference_id.clone(),
                participant: participant_id.to_string(),
                at: Instant::now(),
            })
            .await;

        result
    }

    /// Forcibly tears down one bridge's session, as if the bridge reported
    /// an unrecoverable error (an external caller — e.g. the
    /// registry on discovery loss — triggers this directly rather than
    /// through a failed RPC).
    pub async fn remove_bridge(&self, jid: &Jid) {
        let mut state = self.state.lock().await;
        let key = state
            .sessions
            .iter()
            .find(|(_, session)| session.bridge_jid() == jid)
            .map(|(key, _)| key.clone());
        if let Some(key) = key {
            self.teardown_session_locked(&mut state, &key).await;
        }
    }

    /// Expires the whole conference across every bridge it currently uses
    ///. Idempotent (R1): sessions already torn down are
    /// skipped.
    pub async fn expire(&self) {
        let keys: Vec<String> = {
            let state = self.state.lock().await;
            state.sessions.keys().cloned().collect()
        };

        for key in keys {
            let (bridge_jid, request) = {
                let mut state = self.state.lock().await;
                let Some(session) = state.sessions.get_mut(&key) else { continue };
                if session.expired() {
                    continue;
                }
                let bridge_jid = session.bridge_jid().clone();
                let request = match session.id() {
                    Some(conference_id) => {
                        let mut req = crate::colibri::protocol::ConferenceModifyRequest::new(
                            bridge_jid.to_string(),
                            self.local_address.clone(),
                            Some(conference_id.to_string()),
                        );
                        req.expire = true;
                        Some(req)
                    }
                    None => None,
                };
                session.set_feedback_sources(None);
                (bridge_jid, request)
            };

            if let Some(request) = request {
                let _ = self.channel.send_conference_modify(&bridge_jid, request, self.rpc_deadline).await;
            }

            let mut state = self.state.lock().await;
            self.teardown_session_locked(&mut state, &key).await;
        }
    }

    /// A bridge's session could not be recovered out-of-band (e.g. a health
    /// check reported it non-operational while holding participants); tears
    /// the session down the same way a `removes_bridge()` RPC error would.
    pub async fn session_failed(&self, key: &str) {
        let mut state = self.state.lock().await;
        self.teardown_session_locked(&mut state, key).await;
    }

    /// One endpoint on a bridge is known to have failed independent of any
    /// RPC this manager issued (the out-of-band eviction path).
    pub async fn endpoint_failed(&self, participant_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(participant) = state.participants.remove(participant_id) {
            if let Some(key) = &participant.session_key {
                if let Some(members) = state.participants_by_session.get_mut(key) {
                    members.remove(participant_id);
                }
            }
        }
        drop(state);

        self.events
            .publish(ColibriEvent::EndpointRemoved {
                conference: self.conference_id.clone(),
                participant: participant_id.to_string(),
                at: Instant::now(),
            })
            .await;
    }

    /// Wires Octo relays between a newly-created session and every peer
    /// session the mesh topology names. Each side issues one `createRelay`
    /// RPC whose endpoints fold in the participants already present on the
    /// *other* side, so each bridge learns about the far side's existing
    /// participants in the same RPC that establishes the relay ("vice
    /// versa": the new session pushes the peer's existing participants to
    /// itself, and the peer pushes the new session's participants to
    /// itself — no separate `updateRemoteParticipant` round trip for the
    /// initial set). Sent outside any held lock, like every other RPC this
    /// manager issues; a failed wiring RPC reflects onto the registry and
    /// is logged, but does not fail the allocate that triggered it — relay
    /// wiring is best-effort.
    async fn wire_relays(&self, new_key: &str, peers: &[String]) {
        if peers.is_empty() {
            return;
        }

        for peer_key in peers {
            let built = {
                let state = self.state.lock().await;
                let Some(new_relay_id) = state.sessions.get(new_key).and_then(|s| s.relay_id()).cloned() else {
                    return;
                };
                let Some(peer_relay_id) = state.sessions.get(peer_key).and_then(|s| s.relay_id()).cloned() else {
                    continue;
                };

                let new_participants: Vec<ParticipantInfo> = state
                    .participants_by_session
                    .get(new_key)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| state.participants.get(id).cloned())
                    .collect();
                let peer_participants: Vec<ParticipantInfo> = state
                    .participants_by_session
                    .get(peer_key)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| state.participants.get(id).cloned())
                    .collect();

                // To the new bridge: create a relay to the peer, with the peer's
                // existing participants as remote endpoints.
                let to_new = state
                    .sessions
                    .get(new_key)
                    .map(|s| (s.bridge_jid().clone(), s.build_create_relay_request(&peer_relay_id, &peer_participants)));
                // To the peer bridge: create a relay to the new session, with
                // the new session's existing participants as remote endpoints.
                let to_peer = state
                    .sessions
                    .get(peer_key)
                    .map(|s| (s.bridge_jid().clone(), s.build_create_relay_request(&new_relay_id, &new_participants)));

                let (Some(to_new), Some(to_peer)) = (to_new, to_peer) else { continue };
                (new_relay_id, peer_relay_id, to_new, to_peer)
            };

            let (new_relay_id, peer_relay_id, (new_jid, new_request), (peer_jid, peer_request)) = built;

            let new_result = self.channel.send_conference_modify(&new_jid, new_request, self.rpc_deadline).await;
            let peer_result = self.channel.send_conference_modify(&peer_jid, peer_request, self.rpc_deadline).await;

            let mut state = self.state.lock().await;

            match map_channel_result(new_result) {
                Ok(_) => {
                    if let Some(session) = state.sessions.get_mut(new_key) {
                        let _ = session.create_relay(peer_relay_id.clone(), true, None);
                        session.mark_relay_established(&peer_relay_id);
                    }
                }
                Err(err) => {
                    tracing::warn!(bridge = %new_jid, relay = %peer_relay_id, error = ?err, "createRelay failed");
                    self.reflect_bridge_error(&new_jid, &err).await;
                }
            }

            match map_channel_result(peer_result) {
                Ok(_) => {
                    if let Some(session) = state.sessions.get_mut(peer_key) {
                        let _ = session.create_relay(new_relay_id.clone(), false, None);
                        session.mark_relay_established(&new_relay_id);
                    }
                }
                Err(err) => {
                    tracing::warn!(bridge = %peer_jid, relay = %new_relay_id, error = ?err, "createRelay failed");
                    self.reflect_bridge_error(&peer_jid, &err).await;
                }
            }
        }
    }
}

/// Used by callers that already have a raw `ConferenceModifyResponse` (e.g.
/// test doubles) and want the error classification without going through
/// `Session`.
pub fn classify_response(response: ConferenceModifyResponse) -> Result<(), ColibriError> {
    match response {
        ConferenceModifyResponse::Success(_) => Ok(()),
        ConferenceModifyResponse::Error(condition) => Err(classify_error(&condition)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeStats;
    use crate::colibri::protocol::{ColibriErrorCondition, ConferenceModifySuccess};
    use crate::config::BridgeSelectionConfig;
    use crate::error::ControlChannelError;
    use crate::selection::RegionBased;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubChannel {
        responses: Mutex<std::collections::VecDeque<Result<ConferenceModifyResponse, ControlChannelError>>>,
        calls: AtomicUsize,
    }

    impl StubChannel {
        fn new(responses: Vec<Result<ConferenceModifyResponse, ControlChannelError>>) -> Self {
            Self { responses: Mutex::new(responses.into()), calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ControlChannel for StubChannel {
        async fn send_conference_modify(
            &self,
            _bridge: &Jid,
            _request: crate::colibri::protocol::ConferenceModifyRequest,
            _deadline: Duration,
        ) -> Result<ConferenceModifyResponse, ControlChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().await.pop_front().unwrap_or(Err(ControlChannelError::Transport("exhausted".into())))
        }
    }

    fn success(conference_id: &str) -> ConferenceModifyResponse {
        ConferenceModifyResponse::Success(ConferenceModifySuccess {
            conference_id: Some(conference_id.to_string()),
            endpoint_transports: Vec::new(),
            feedback_sources: None,
            sctp_port: None,
        })
    }

    async fn manager_with(channel: StubChannel) -> (SessionManager, Arc<BridgeRegistry>) {
        let registry = Arc::new(BridgeRegistry::new());
        registry.add(Jid::from("bridge-1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), ..Default::default() })).await;
        let manager = SessionManager::new(
            "conf-1",
            "focus@local",
            registry.clone(),
            Arc::new(channel),
            Strategy::Region(RegionBased),
            BridgeSelectionConfig::default(),
            false,
            Duration::from_secs(1),
        );
        (manager, registry)
    }

    #[tokio::test]
    async fn allocate_places_participant_and_records_conference_id() {
        let (manager, _registry) = manager_with(StubChannel::new(vec![Ok(success("conf-xyz"))])).await;
        let allocation = manager
            .allocate(AllocationParams {
                id: "p1".into(),
                visitor: false,
                use_sctp: false,
                region: Some("us".into()),
                sources: None,
                display_name: None,
                pinned_version: None,
            })
            .await
            .unwrap();
        assert_eq!(allocation.bridge_session_id, "bridge-1");
        assert_eq!(manager.get_bridges().await.len(), 1);
    }

    #[tokio::test]
    async fn allocate_rejects_duplicate_participant_id() {
        let (manager, _registry) = manager_with(StubChannel::new(vec![Ok(success("conf-xyz")), Ok(success("conf-xyz"))])).await;
        let params = AllocationParams {
            id: "p1".into(),
            visitor: false,
            use_sctp: false,
            region: None,
            sources: None,
            display_name: None,
            pinned_version: None,
        };
        manager.allocate(params.clone()).await.unwrap();
        let err = manager.allocate(params).await.unwrap_err();
        assert!(matches!(err, ColibriError::ParticipantAlreadyExists(_)));
    }

    #[tokio::test]
    async fn allocate_failure_with_graceful_shutdown_tears_down_session_and_evicts() {
        let (manager, registry) = manager_with(StubChannel::new(vec![
            Ok(success("conf-1")),
            Ok(ConferenceModifyResponse::Error(ColibriErrorCondition::new("service-unavailable", Some("graceful-shutdown")))),
        ]))
        .await;

        manager
            .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();

        let err = manager
            .allocate(AllocationParams { id: "p2".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ColibriError::BridgeGracefulShutdown));

        // p2 never succeeded and the whole session (including p1) is gone.
        let state = manager.state.lock().await;
        assert!(state.sessions.is_empty());
        assert!(state.participants.is_empty());
        drop(state);

        assert!(registry.get(&Jid::from("bridge-1")).unwrap().in_graceful_shutdown());
    }

    #[tokio::test]
    async fn mute_is_idempotent_and_skips_rpc_when_unchanged() {
        let (manager, _registry) = manager_with(StubChannel::new(vec![Ok(success("conf-1")), Ok(success("conf-1"))])).await;
        manager
            .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();

        let results = manager.mute(&["p1"], MediaType::Audio, true).await;
        assert_eq!(results, vec![("p1".to_string(), Ok(true))]);

        let results = manager.mute(&["p1"], MediaType::Audio, true).await;
        assert_eq!(results, vec![("p1".to_string(), Ok(false))], "already muted, must be a no-op");
    }

    #[tokio::test]
    async fn mute_batches_one_rpc_per_session_across_a_multi_id_call() {
        let (manager, _registry) =
            manager_with(StubChannel::new(vec![Ok(success("conf-1")), Ok(success("conf-1")), Ok(success("conf-1"))])).await;
        manager
            .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();
        manager
            .allocate(AllocationParams { id: "p2".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();

        let results = manager.mute(&["p1", "p2"], MediaType::Audio, true).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(true))));
    }

    #[tokio::test]
    async fn remove_participant_is_idempotent() {
        let (manager, _registry) = manager_with(StubChannel::new(vec![Ok(success("conf-1")), Ok(success("conf-1"))])).await;
        manager
            .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: None, sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();

        manager.remove_participant("p1").await.unwrap();
        manager.remove_participant("p1").await.unwrap();
    }

    #[tokio::test]
    async fn full_mesh_wires_relays_between_two_bridge_sessions() {
        let registry = Arc::new(BridgeRegistry::new());
        registry
            .add(Jid::from("b1"), Some(BridgeStats { stress: Some(0.1), region: Some("us".into()), relay_id: Some(RelayId("r1".into())), ..Default::default() }))
            .await;
        registry
            .add(Jid::from("b2"), Some(BridgeStats { stress: Some(0.1), region: Some("eu".into()), relay_id: Some(RelayId("r2".into())), ..Default::default() }))
            .await;

        let manager = SessionManager::new(
            "conf-1",
            "focus@local",
            registry,
            Arc::new(StubChannel::new(vec![
                Ok(success("conf-1")),
                Ok(success("conf-1")),
                Ok(success("conf-1")),
                Ok(success("conf-1")),
            ])),
            Strategy::Split(crate::selection::Split),
            BridgeSelectionConfig::default(),
            true,
            Duration::from_secs(1),
        );

        manager
            .allocate(AllocationParams { id: "p1".into(), visitor: false, use_sctp: false, region: Some("us".into()), sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();
        manager
            .allocate(AllocationParams { id: "p2".into(), visitor: false, use_sctp: false, region: Some("eu".into()), sources: None, display_name: None, pinned_version: None })
            .await
            .unwrap();

        let state = manager.state.lock().await;
        assert_eq!(state.sessions.len(), 2);
        for session in state.sessions.values() {
            assert_eq!(session.relays().count(), 1, "each of the two sessions should have exactly one relay to the other");
        }
    }
}
