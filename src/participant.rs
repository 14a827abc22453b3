//! Per-participant and per-(conference, bridge) records.
//!
//! `ParticipantInfo` is shaped after
//! `rvoip-session-core::conference::participant::ConferenceParticipant`:
//! a plain struct the session manager owns and mutates directly, rather
//! than an opaque handle.

/// Media/transport properties recorded for a participant once allocation
/// succeeds.
#[derive(Debug, Clone, Default)]
pub struct ParticipantTransport {
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
    pub candidates: Vec<String>,
    pub fingerprint: Option<String>,
}

/// The per-(conference, bridge) record kept inside a `SessionManager`.
#[derive(Debug, Clone, Default)]
pub struct ConferenceBridgeProperties {
    pub participant_count: usize,
    pub visitor: bool,
    pub stress: Option<f64>,
    pub region: Option<String>,
    pub version: Option<String>,
}

/// Opaque-to-the-core participant record. Fields beyond `id`,
/// `visitor`, `use_sctp`, and `region` are bookkeeping the core needs to
/// drive allocation and mute batching, not interpret.
#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub id: String,
    pub visitor: bool,
    pub use_sctp: bool,
    pub region: Option<String>,
    pub sources: Option<serde_json::Value>,
    pub transport: Option<ParticipantTransport>,
    pub audio_muted: bool,
    pub video_muted: bool,
    /// The `SessionManager` session-map key (see `crate::manager::session_key`)
    /// of the session this participant currently belongs to. A participant
    /// belongs to exactly one session at a time (invariant); moving
    /// sessions means removing then re-adding. Used to detect whether a
    /// participant has been replaced or moved while an RPC was in flight.
    pub session_key: Option<String>,
    pub display_name: Option<String>,
}

impl ParticipantInfo {
    pub fn new(id: impl Into<String>, visitor: bool, region: Option<String>) -> Self {
        Self {
            id: id.into(),
            visitor,
            use_sctp: false,
            region,
            sources: None,
            transport: None,
            audio_muted: false,
            video_muted: false,
            session_key: None,
            display_name: None,
        }
    }

    pub fn mute_flag(&self, media: MediaType) -> bool {
        match media {
            MediaType::Audio => self.audio_muted,
            MediaType::Video => self.video_muted,
        }
    }

    pub fn set_mute_flag(&mut self, media: MediaType, muted: bool) {
        match media {
            MediaType::Audio => self.audio_muted = muted,
            MediaType::Video => self.video_muted = muted,
        }
    }
}

/// Parameters supplied by the caller when allocating a participant.
#[derive(Debug, Clone)]
pub struct AllocationParams {
    pub id: String,
    pub visitor: bool,
    pub use_sctp: bool,
    pub region: Option<String>,
    pub sources: Option<serde_json::Value>,
    pub display_name: Option<String>,
    /// When set, the conference must place this participant only on a
    /// bridge of this exact version (subject to
    /// `allow_selection_if_no_pinned_match`).
    pub pinned_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
}

/// The result of a successful `SessionManager::allocate` call.
#[derive(Debug, Clone)]
pub struct ColibriAllocation {
    pub feedback_sources: Option<serde_json::Value>,
    pub transport: Option<ParticipantTransport>,
    pub region: Option<String>,
    pub bridge_session_id: String,
    pub sctp_port: Option<u16>,
}
