//! The Colibri control-channel contract: wire shapes and the transport
//! trait the signaling layer implements.

pub mod channel;
pub mod protocol;

pub use channel::ControlChannel;
pub use protocol::{
    ColibriErrorCondition, ConferenceModifyRequest, ConferenceModifyResponse,
    ConferenceModifySuccess, EndpointElement, MediaElement, RelayElement, SctpElement,
    TransportElement,
};
