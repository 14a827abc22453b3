//! The control-channel contract this crate consumes but does not
//! implement ("OUT OF SCOPE... an abstract control channel").
//!
//! Shaped like `rvoip-session-core`'s boundary traits (`CallHandler`,
//! `ConferenceApi`): an `async_trait` the signaling layer implements once
//! per transport.

use std::time::Duration;

use async_trait::async_trait;

use crate::bridge::Jid;
use crate::error::ControlChannelError;

use super::protocol::{ConferenceModifyRequest, ConferenceModifyResponse};

/// Issues request/response RPCs against a bridge. The only collaborator
/// this crate requires from the signaling layer.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_conference_modify(
        &self,
        bridge: &Jid,
        request: ConferenceModifyRequest,
        deadline: Duration,
    ) -> Result<ConferenceModifyResponse, ControlChannelError>;
}
