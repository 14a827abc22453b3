//! Bridge selection and Colibri session management core for a multi-party
//! conferencing focus.
//!
//! This crate owns the part of a conference focus that decides which media
//! bridge a participant lands on and keeps each (conference, bridge)
//! session's Colibri state correct as participants join, move, mute, and
//! leave. It does not speak any wire protocol itself, handle media, persist
//! anything across a restart, or drive signaling — those are the caller's
//! job, reached through the [`colibri::ControlChannel`] trait this crate
//! consumes.
//!
//! Start at [`registry::BridgeRegistry`] (the process-wide bridge table) and
//! [`manager::SessionManager`] (one per conference).

pub mod bridge;
pub mod colibri;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod participant;
pub mod ratelimit;
pub mod registry;
pub mod selection;
pub mod session;

pub use bridge::{Bridge, BridgeStateChange, BridgeStats, Jid, RelayId};
pub use config::{BridgeSelectionConfig, RateLimiterConfig};
pub use error::{ColibriError, ControlChannelError, Result};
pub use events::{ColibriEvent, ColibriEventHandler, EventPublisher, LoggingEventHandler};
pub use manager::{session_key, FullMesh, MeshTopology, SessionManager};
pub use participant::{AllocationParams, ColibriAllocation, ConferenceBridgeProperties, MediaType, ParticipantInfo, ParticipantTransport};
pub use ratelimit::RateLimiter;
pub use registry::BridgeRegistry;
pub use selection::{ConferenceBridge, SelectionParticipantProps, SelectionStrategy, Strategy};
pub use session::{OctoRelay, Session};
