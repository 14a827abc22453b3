//! Error taxonomy for the bridge selection / Colibri session core.
//!
//! One flat enum rather than nested per-module errors: the caller of
//! `SessionManager::allocate` needs to see the whole classification at once
//! to decide whether to re-invite elsewhere, and the recovery policy (which
//! errors evict a single participant versus tear down the whole session)
//! is a property of the variant, not of where it was raised.

use thiserror::Error;

use crate::colibri::protocol::ColibriErrorCondition;

/// Errors surfaced from `SessionManager` operations and `Session` RPCs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColibriError {
    /// No candidate bridge survived selection filtering.
    #[error("no bridge available for selection")]
    BridgeSelectionFailed,

    /// The control-channel RPC deadline elapsed before a response arrived.
    #[error("request to bridge timed out")]
    Timeout,

    /// Bridge reported `item-not-found` / `conference-not-found`.
    #[error("bridge no longer has this conference")]
    ConferenceNotFound,

    /// Bridge reported `conflict` / `conference-already-exists`.
    #[error("conference id collision on bridge")]
    ConferenceAlreadyExists,

    /// Bridge reported `service-unavailable` / `graceful-shutdown`.
    #[error("bridge entered graceful shutdown")]
    BridgeGracefulShutdown,

    /// Bridge reported `service-unavailable` / `internal-server-error`.
    #[error("bridge is unavailable")]
    BridgeUnavailable,

    /// Any other error condition the bridge returned.
    #[error("bridge returned protocol error: {0:?}")]
    ProtocolError(ColibriErrorCondition),

    /// A success response could not be parsed.
    #[error("malformed success response: {0}")]
    ParseError(String),

    /// A response carried a conference id different from the one already
    /// established for this session.
    #[error("conference id mismatch: established {established}, got {received}")]
    StateMismatch { established: String, received: String },

    /// `allocate` was called with an id already present in the conference.
    #[error("participant {0} already exists in this conference")]
    ParticipantAlreadyExists(String),

    /// The session or participant was replaced while a response was in
    /// flight; the response is stale and must be dropped.
    #[error("session or participant no longer current")]
    SessionReplacedDuringAwait,

    /// Invariant violation that should be unreachable in correct operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ColibriError {
    /// Whether recovering from this error requires tearing down the whole
    /// bridge session, per the error-kind classification above.
    pub fn removes_bridge(&self) -> bool {
        matches!(
            self,
            ColibriError::Timeout
                | ColibriError::ConferenceNotFound
                | ColibriError::ConferenceAlreadyExists
                | ColibriError::BridgeGracefulShutdown
                | ColibriError::BridgeUnavailable
                | ColibriError::StateMismatch { .. }
        )
    }
}

/// Errors from the `ControlChannel` transport boundary, classified before
/// they reach `ColibriError`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlChannelError {
    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("bridge returned an error condition")]
    ErrorResponse(ColibriErrorCondition),
}

pub type Result<T> = std::result::Result<T, ColibriError>;
