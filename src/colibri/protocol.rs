//! Wire shapes for the "conference-modify" control-channel contract
//!. The crate never encodes these to XMPP stanzas itself — that
//! remains the signaling layer's job — but the shapes are concrete so the
//! Session/SessionManager error classifier has real types to match on.

use serde::{Deserialize, Serialize};

/// A request to allocate, update, or expire endpoints on one bridge for
/// one conference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceModifyRequest {
    /// Target bridge address.
    pub to: String,
    /// Sender address.
    pub from: String,
    /// Meeting id (new session) or the bridge-assigned conference id
    /// (existing session).
    pub conference_id: Option<String>,
    /// `true` on the first request of a session.
    pub create: bool,
    /// `true` to request whole-conference expiry.
    pub expire: bool,
    pub endpoints: Vec<EndpointElement>,
    /// Octo relay operations carried alongside the endpoint elements above
    /// (createRelay/expireRelay/setRelayTransport/updateRemoteParticipant/
    /// expireRemoteParticipants all ride the same conference-modify RPC).
    pub relays: Vec<RelayElement>,
}

impl ConferenceModifyRequest {
    pub fn new(to: String, from: String, conference_id: Option<String>) -> Self {
        Self {
            to,
            from,
            conference_id,
            create: false,
            expire: false,
            endpoints: Vec::new(),
            relays: Vec::new(),
        }
    }
}

/// Per-endpoint media/transport description within a request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointElement {
    pub id: String,
    pub stats_id: Option<String>,
    pub display_name: Option<String>,
    pub create: bool,
    pub expire: bool,
    pub audio: Option<MediaElement>,
    pub video: Option<MediaElement>,
    pub sctp: Option<SctpElement>,
    pub transport: Option<TransportElement>,
    pub sources: Option<serde_json::Value>,
    pub initial_last_n: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaElement {
    pub requested: bool,
    pub force_mute: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SctpElement {
    pub requested: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportElement {
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub candidates: Vec<String>,
    pub fingerprint: Option<String>,
}

/// One Octo relay's requested state within a `ConferenceModifyRequest`:
/// `endpoints` carries the remote-participant views to create or expire on
/// this relay, `transport` carries a `setRelayTransport` update, and
/// `expire` requests the relay itself be torn down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayElement {
    pub id: String,
    pub transport: Option<TransportElement>,
    pub endpoints: Vec<EndpointElement>,
    pub expire: bool,
}

/// The response to a `conference-modify` request: success or a
/// classified error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConferenceModifyResponse {
    Success(ConferenceModifySuccess),
    Error(ColibriErrorCondition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConferenceModifySuccess {
    /// Only present on the first `create` response.
    pub conference_id: Option<String>,
    pub endpoint_transports: Vec<(String, TransportElement)>,
    pub feedback_sources: Option<serde_json::Value>,
    pub sctp_port: Option<u16>,
}

/// `condition`/`reason` pair from an error response (the error
/// table is keyed on exactly this pair).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColibriErrorCondition {
    pub condition: String,
    pub reason: Option<String>,
}

impl ColibriErrorCondition {
    pub fn new(condition: impl Into<String>, reason: Option<&str>) -> Self {
        Self {
            condition: condition.into(),
            reason: reason.map(|r| r.to_string()),
        }
    }
}
