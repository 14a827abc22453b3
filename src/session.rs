//! One `Session` per (conference, bridge) pair.
//!
//! A `Session` only builds requests and tracks the state a response
//! mutates; it holds no back-pointer to its owning `SessionManager` — ownership
//! is tree-shaped. Failures it cannot handle itself are returned to the
//! caller, which is always the owning
//! `SessionManager` in this crate's usage.

use std::collections::HashMap;
use std::time::Duration;

use crate::bridge::{Jid, RelayId};
use crate::colibri::protocol::{
    ConferenceModifyRequest, ConferenceModifyResponse, ConferenceModifySuccess, EndpointElement,
    MediaElement, RelayElement, SctpElement, TransportElement,
};
use crate::colibri::ControlChannel;
use crate::error::{ColibriError, ControlChannelError};
use crate::participant::{MediaType, ParticipantInfo, ParticipantTransport};

/// Bookkeeping for one Octo relay link to a remote bridge.
#[derive(Debug, Clone)]
pub struct OctoRelay {
    pub remote_relay_id: RelayId,
    pub initiator: bool,
    pub mesh_id: Option<String>,
    pub established: bool,
}

/// A (conference, bridge) pair and its Colibri/Octo state.
pub struct Session {
    bridge_jid: Jid,
    relay_id: Option<RelayId>,
    local_address: String,
    visitor: bool,
    id: Option<String>,
    expired: bool,
    feedback_sources: Option<serde_json::Value>,
    relays: HashMap<RelayId, OctoRelay>,
}

impl Session {
    pub fn new(bridge_jid: Jid, relay_id: Option<RelayId>, local_address: String, visitor: bool) -> Self {
        Self {
            bridge_jid,
            relay_id,
            local_address,
            visitor,
            id: None,
            expired: false,
            feedback_sources: None,
            relays: HashMap::new(),
        }
    }

    pub fn bridge_jid(&self) -> &Jid {
        &self.bridge_jid
    }

    pub fn relay_id(&self) -> Option<&RelayId> {
        self.relay_id.as_ref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn visitor(&self) -> bool {
        self.visitor
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn feedback_sources(&self) -> Option<&serde_json::Value> {
        self.feedback_sources.as_ref()
    }

    /// Record the bridge-assigned conference id from a successful
    /// response. Write-once invariant: written at most once from a
    /// non-null value; a later response carrying a *different* non-null
    /// id is a fatal `StateMismatch`.
    pub fn record_conference_id(&mut self, id: &str) -> Result<(), ColibriError> {
        match &self.id {
            None => {
                self.id = Some(id.to_string());
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(existing) => Err(ColibriError::StateMismatch {
                established: existing.clone(),
                received: id.to_string(),
            }),
        }
    }

    pub fn set_feedback_sources(&mut self, sources: Option<serde_json::Value>) {
        self.feedback_sources = sources;
    }

    /// Builds the allocate ("conference-modify", `create` set iff this is
    /// the session's first request) request for one participant, without
    /// sending it. Split out so `SessionManager` can build the request
    /// while holding its state lock, then release the lock before
    /// awaiting the RPC (other conference operations may proceed
    /// while an allocate is in flight).
    pub fn build_allocate_request(&self, participant: &ParticipantInfo) -> ConferenceModifyRequest {
        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            self.id.clone(),
        );
        request.create = self.id.is_none();
        request.endpoints.push(EndpointElement {
            id: participant.id.clone(),
            stats_id: Some(participant.id.clone()),
            display_name: participant.display_name.clone(),
            create: true,
            audio: Some(MediaElement { requested: true, force_mute: None }),
            video: Some(MediaElement { requested: true, force_mute: None }),
            sctp: if participant.use_sctp { Some(SctpElement { requested: true }) } else { None },
            sources: participant.sources.clone(),
            ..Default::default()
        });
        request
    }

    /// Builds and sends an allocate request for one participant in one
    /// call; convenience used outside `SessionManager`'s split-lock flow
    /// (e.g. direct `Session` unit tests).
    pub async fn allocate(
        &self,
        channel: &dyn ControlChannel,
        participant: &ParticipantInfo,
        deadline: Duration,
    ) -> Result<ConferenceModifySuccess, ColibriError> {
        let request = self.build_allocate_request(participant);
        self.send(channel, request, deadline).await
    }

    /// Fire-and-forget update: only sub-elements the caller actually
    /// supplied are sent; a no-op if none are. Requires `id` to be set
    ///.
    pub async fn update(
        &self,
        channel: &dyn ControlChannel,
        participant_id: &str,
        transport: Option<TransportElement>,
        sources: Option<serde_json::Value>,
        initial_last_n: Option<i32>,
        deadline: Duration,
    ) -> Result<(), ColibriError> {
        let Some(conference_id) = &self.id else {
            return Err(ColibriError::Internal("update called before session established".into()));
        };

        if transport.is_none() && sources.is_none() && initial_last_n.is_none() {
            return Ok(());
        }

        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            Some(conference_id.clone()),
        );
        request.endpoints.push(EndpointElement {
            id: participant_id.to_string(),
            transport,
            sources,
            initial_last_n,
            ..Default::default()
        });

        self.send(channel, request, deadline).await.map(|_| ())
    }

    /// One endpoint element per participant carrying force-mute children
    /// reflecting their current mute flags.
    pub async fn update_force_mute(
        &self,
        channel: &dyn ControlChannel,
        participants: &[&ParticipantInfo],
        deadline: Duration,
    ) -> Result<(), ColibriError> {
        let Some(conference_id) = &self.id else {
            return Err(ColibriError::Internal("force-mute called before session established".into()));
        };

        if participants.is_empty() {
            return Ok(());
        }

        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            Some(conference_id.clone()),
        );
        for p in participants {
            request.endpoints.push(EndpointElement {
                id: p.id.clone(),
                audio: Some(MediaElement { requested: true, force_mute: Some(p.mute_flag(MediaType::Audio)) }),
                video: Some(MediaElement { requested: true, force_mute: Some(p.mute_flag(MediaType::Video)) }),
                ..Default::default()
            });
        }

        self.send(channel, request, deadline).await.map(|_| ())
    }

    /// Expire the whole conference on this bridge (`participants` empty)
    /// or specific endpoints. See this for the unset-id special
    /// cases this method's caller (`SessionManager`) must apply.
    pub async fn expire(
        &mut self,
        channel: &dyn ControlChannel,
        participant_ids: &[String],
        deadline: Duration,
    ) -> Result<(), ColibriError> {
        if participant_ids.is_empty() {
            let Some(conference_id) = self.id.clone() else {
                // No RPC: the bridge never learned of this conference.
                self.expired = true;
                return Ok(());
            };

            let mut request = ConferenceModifyRequest::new(
                self.bridge_jid.to_string(),
                self.local_address.clone(),
                Some(conference_id),
            );
            request.expire = true;
            self.expired = true;
            self.send(channel, request, deadline).await.map(|_| ())
        } else {
            let Some(conference_id) = self.id.clone() else {
                // Bridge never learned of these endpoints; nothing to send.
                return Ok(());
            };

            let mut request = ConferenceModifyRequest::new(
                self.bridge_jid.to_string(),
                self.local_address.clone(),
                Some(conference_id),
            );
            for id in participant_ids {
                request.endpoints.push(EndpointElement { id: id.clone(), expire: true, ..Default::default() });
            }
            self.send(channel, request, deadline).await.map(|_| ())
        }
    }

    /// Builds a `createRelay` request: the relay element carries the
    /// remote relay id and one endpoint per participant already present
    /// on this session, so the peer bridge learns about them in the same
    /// RPC that establishes the relay (no separate
    /// `updateRemoteParticipant` round trip is needed for the initial
    /// set).
    pub fn build_create_relay_request(
        &self,
        remote_relay_id: &RelayId,
        participants: &[ParticipantInfo],
    ) -> ConferenceModifyRequest {
        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            self.id.clone(),
        );
        request.relays.push(RelayElement {
            id: remote_relay_id.to_string(),
            endpoints: participants.iter().map(remote_endpoint).collect(),
            ..Default::default()
        });
        request
    }

    /// Builds an `expireRelay` request, tearing down a relay this session
    /// previously established.
    pub fn build_expire_relay_request(&self, remote_relay_id: &RelayId) -> ConferenceModifyRequest {
        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            self.id.clone(),
        );
        request.relays.push(RelayElement { id: remote_relay_id.to_string(), expire: true, ..Default::default() });
        request
    }

    /// Builds a `setRelayTransport` request carrying a new transport
    /// description for an already-established relay.
    pub fn build_set_relay_transport_request(
        &self,
        remote_relay_id: &RelayId,
        transport: TransportElement,
    ) -> ConferenceModifyRequest {
        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            self.id.clone(),
        );
        request.relays.push(RelayElement {
            id: remote_relay_id.to_string(),
            transport: Some(transport),
            ..Default::default()
        });
        request
    }

    /// Builds an `updateRemoteParticipant` request pushing participants
    /// newly added to this session onto an already-established relay.
    pub fn build_update_remote_participants_request(
        &self,
        remote_relay_id: &RelayId,
        participants: &[ParticipantInfo],
    ) -> ConferenceModifyRequest {
        self.build_create_relay_request(remote_relay_id, participants)
    }

    /// Builds an `expireRemoteParticipants` request removing participants
    /// that left this session from an already-established relay.
    pub fn build_expire_remote_participants_request(
        &self,
        remote_relay_id: &RelayId,
        participant_ids: &[String],
    ) -> ConferenceModifyRequest {
        let mut request = ConferenceModifyRequest::new(
            self.bridge_jid.to_string(),
            self.local_address.clone(),
            self.id.clone(),
        );
        request.relays.push(RelayElement {
            id: remote_relay_id.to_string(),
            endpoints: participant_ids
                .iter()
                .map(|id| EndpointElement { id: id.clone(), expire: true, ..Default::default() })
                .collect(),
            ..Default::default()
        });
        request
    }

    pub fn create_relay(&mut self, remote_relay_id: RelayId, initiator: bool, mesh_id: Option<String>) -> Result<(), ColibriError> {
        if self.relays.contains_key(&remote_relay_id) {
            return Err(ColibriError::Internal(format!("relay to {remote_relay_id} already exists")));
        }
        self.relays.insert(
            remote_relay_id.clone(),
            OctoRelay { remote_relay_id, initiator, mesh_id, established: false },
        );
        Ok(())
    }

    pub fn expire_relay(&mut self, remote_relay_id: &RelayId) {
        self.relays.remove(remote_relay_id);
    }

    pub fn mark_relay_established(&mut self, remote_relay_id: &RelayId) {
        if let Some(relay) = self.relays.get_mut(remote_relay_id) {
            relay.established = true;
        }
    }

    pub fn relays(&self) -> impl Iterator<Item = &OctoRelay> {
        self.relays.values()
    }

    pub(crate) async fn send(
        &self,
        channel: &dyn ControlChannel,
        request: ConferenceModifyRequest,
        deadline: Duration,
    ) -> Result<ConferenceModifySuccess, ColibriError> {
        let result = channel.send_conference_modify(&self.bridge_jid, request, deadline).await;
        map_channel_result(result)
    }
}

/// Maps a raw `ControlChannel` result onto the error classification,
/// collapsing both places a protocol error can arrive — the channel's own
/// `Err(ErrorResponse(..))` and an embedded `Ok(Response::Error(..))` — onto
/// the same `ColibriError`. Shared by `Session::send` and `SessionManager`,
/// which sends the raw RPC itself (outside any held lock) and only
/// reacquires `Session` state afterward to apply the result.
pub fn map_channel_result(
    result: Result<ConferenceModifyResponse, ControlChannelError>,
) -> Result<ConferenceModifySuccess, ColibriError> {
    match result {
        Ok(ConferenceModifyResponse::Success(success)) => Ok(success),
        Ok(ConferenceModifyResponse::Error(condition)) => Err(classify_error(&condition)),
        Err(ControlChannelError::Timeout) => Err(ColibriError::Timeout),
        Err(ControlChannelError::Transport(msg)) => Err(ColibriError::ParseError(msg)),
        Err(ControlChannelError::ErrorResponse(condition)) => Err(classify_error(&condition)),
    }
}

/// Error classification table.
pub fn classify_error(condition: &crate::colibri::protocol::ColibriErrorCondition) -> ColibriError {
    match (condition.condition.as_str(), condition.reason.as_deref()) {
        ("item-not-found", Some("conference-not-found")) => ColibriError::ConferenceNotFound,
        ("conflict", Some("conference-already-exists")) => ColibriError::ConferenceAlreadyExists,
        ("service-unavailable", Some("graceful-shutdown")) => ColibriError::BridgeGracefulShutdown,
        ("service-unavailable", Some("internal-server-error")) => ColibriError::BridgeUnavailable,
        _ => ColibriError::ProtocolError(condition.clone()),
    }
}

/// The endpoint view of one local participant as pushed to a remote
/// relay: id and display name only, no media negotiation (the peer
/// bridge forwards media, it doesn't offer it).
fn remote_endpoint(participant: &ParticipantInfo) -> EndpointElement {
    EndpointElement {
        id: participant.id.clone(),
        stats_id: Some(participant.id.clone()),
        display_name: participant.display_name.clone(),
        create: true,
        ..Default::default()
    }
}

/// Participants may not hold a borrow of `ParticipantTransport`
/// end-to-end; this converts a wire `TransportElement` into the local
/// record stored on `ParticipantInfo`.
pub fn transport_from_wire(wire: TransportElement) -> ParticipantTransport {
    ParticipantTransport {
        ice_ufrag: wire.ice_ufrag,
        ice_pwd: wire.ice_pwd,
        candidates: wire.candidates,
        fingerprint: wire.fingerprint,
    }
}
