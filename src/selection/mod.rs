//! Bridge selection strategy family.
//!
//! Grounded on `rvoip-call-engine::routing`'s shape of a pluggable
//! decision engine (a trait implemented by several interchangeable
//! strategies, chosen by configuration) but replacing that module's
//! class-per-strategy design with a capability-interface redesign:
//! `SelectionStrategy` is one trait, strategies are small structs, and the
//! factory is a sum type rather than a class hierarchy.

pub mod intra_region;
pub mod region;
pub mod single;
pub mod split;
pub mod visitor;

use crate::bridge::{Bridge, Jid};
use crate::participant::ConferenceBridgeProperties;

pub use intra_region::IntraRegion;
pub use region::RegionBased;
pub use single::Single;
pub use split::Split;
pub use visitor::Visitor;

/// A bridge already in use by the conference, paired with its
/// conference-local properties.
#[derive(Debug, Clone)]
pub struct ConferenceBridge {
    pub bridge: Bridge,
    pub properties: ConferenceBridgeProperties,
}

/// Properties of the participant being placed, as seen by selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionParticipantProps {
    pub region: Option<String>,
    pub visitor: bool,
}

/// A bridge selection strategy.
///
/// `select` implements the shared preamble every strategy shares; concrete
/// strategies implement `do_select` only.
pub trait SelectionStrategy: Send + Sync {
    /// Strategy-specific selection once the shared preamble has decided
    /// delegation is warranted. `allow_multi_bridge` is threaded through so a
    /// composing strategy (`Visitor`) can re-enter the shared preamble via
    /// `select` on a partition of the conference's bridges rather than
    /// skipping straight past it.
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge>;

    /// Shared entry point (preamble): if the conference uses no
    /// bridges yet, or multi-bridge is allowed and the first conference
    /// bridge supports Octo (has a relay id), delegate to `do_select`.
    /// Otherwise return the conference's single existing bridge as-is.
    fn select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        let supports_octo = conference_bridges
            .first()
            .map(|cb| cb.bridge.relay_id().is_some())
            .unwrap_or(false);

        if conference_bridges.is_empty() || (allow_multi_bridge && supports_octo) {
            self.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level)
        } else {
            conference_bridges.first().map(|cb| cb.bridge.clone())
        }
    }
}

/// `bridge.stress > maxStress` (the overload predicate).
pub fn is_overloaded(bridge: &Bridge, max_stress_level: f64) -> bool {
    bridge.stress() > max_stress_level
}

/// First bridge with `stress <= maxStress`, in deterministic tie-break
/// order — used as a fast "good enough" pick rather than strictly the
/// least loaded.
pub fn not_loaded(bridges: &[Bridge], conference_bridges: &[ConferenceBridge], max_stress_level: f64) -> Option<Bridge> {
    ordered(bridges, conference_bridges).into_iter().find(|b| !is_overloaded(b, max_stress_level))
}

pub fn not_loaded_in_region(
    bridges: &[Bridge],
    conference_bridges: &[ConferenceBridge],
    region: &str,
    max_stress_level: f64,
) -> Option<Bridge> {
    let filtered: Vec<Bridge> = bridges
        .iter()
        .filter(|b| b.region() == Some(region))
        .cloned()
        .collect();
    not_loaded(&filtered, conference_bridges, max_stress_level)
}

/// Intersection of the conference's current bridges with `region`, not
/// overloaded — used by `IntraRegion` to prefer spreading within a region
/// the conference is already using.
pub fn not_loaded_already_in_conference_in_region(
    conference_bridges: &[ConferenceBridge],
    region: &str,
    max_stress_level: f64,
) -> Option<Bridge> {
    let filtered: Vec<Bridge> = conference_bridges
        .iter()
        .filter(|cb| cb.bridge.region() == Some(region))
        .map(|cb| cb.bridge.clone())
        .collect();
    not_loaded(&filtered, conference_bridges, max_stress_level)
}

/// Minimum stress; ties broken by lowest participant count among those in
/// the conference, then by jid lexicographic order ("Tie-breaks
/// are total and deterministic").
pub fn least_loaded(bridges: &[Bridge], conference_bridges: &[ConferenceBridge]) -> Option<Bridge> {
    ordered(bridges, conference_bridges).into_iter().next()
}

fn participant_count_in_conference(bridge: &Bridge, conference_bridges: &[ConferenceBridge]) -> usize {
    conference_bridges
        .iter()
        .find(|cb| cb.bridge.jid() == bridge.jid())
        .map(|cb| cb.properties.participant_count)
        .unwrap_or(0)
}

/// All of `bridges` sorted by the shared tie-break: stress ascending, then
/// participant-count-in-conference ascending, then jid lexicographic.
fn ordered(bridges: &[Bridge], conference_bridges: &[ConferenceBridge]) -> Vec<Bridge> {
    let mut sorted: Vec<Bridge> = bridges.to_vec();
    sorted.sort_by(|a, b| {
        a.stress()
            .partial_cmp(&b.stress())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                participant_count_in_conference(a, conference_bridges)
                    .cmp(&participant_count_in_conference(b, conference_bridges))
            })
            .then_with(|| a.jid().cmp(b.jid()))
    });
    sorted
}

/// The region a conference is anchored to: the region of its first bridge
/// (`IntraRegion`'s notion of `conferenceRegion`).
pub fn conference_region(conference_bridges: &[ConferenceBridge]) -> Option<String> {
    conference_bridges.first().and_then(|cb| cb.bridge.region().map(|r| r.to_string()))
}

/// Filtering applied before any strategy runs ("Filtering
/// applied before strategies are invoked"): drop non-selectable (already
/// true of `candidates` from `BridgeRegistry::candidates`), apply the
/// pinned-version fallback rule, then the draining/graceful-shutdown
/// preference hierarchy.
pub fn prefilter(
    mut candidates: Vec<Bridge>,
    pinned_version: Option<&str>,
    allow_selection_if_no_pinned_match: bool,
) -> Vec<Bridge> {
    if let Some(version) = pinned_version {
        let matching: Vec<Bridge> = candidates.iter().filter(|b| b.version() == Some(version)).cloned().collect();
        if !matching.is_empty() || !allow_selection_if_no_pinned_match {
            candidates = matching;
        }
    }

    let non_draining: Vec<Bridge> = candidates.iter().filter(|b| !b.draining()).cloned().collect();
    if !non_draining.is_empty() {
        candidates = non_draining;
    }

    let non_graceful: Vec<Bridge> = candidates.iter().filter(|b| !b.in_graceful_shutdown()).cloned().collect();
    if !non_graceful.is_empty() {
        candidates = non_graceful;
    }

    candidates
}

/// Configuration-driven choice of strategy: a sum type rather than a class
/// hierarchy so new strategies don't need a registry to plug into.
pub enum Strategy {
    Region(RegionBased),
    IntraRegion(IntraRegion),
    Single(Single),
    Split(Split),
    Visitor(Visitor),
}

impl SelectionStrategy for Strategy {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        match self {
            Strategy::Region(s) => s.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level),
            Strategy::IntraRegion(s) => s.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level),
            Strategy::Single(s) => s.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level),
            Strategy::Split(s) => s.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level),
            Strategy::Visitor(s) => s.do_select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level),
        }
    }
}

/// Irrelevant helper retained for call sites that only have a `Jid` handy.
pub fn bridge_by_jid<'a>(bridges: &'a [Bridge], jid: &Jid) -> Option<&'a Bridge> {
    bridges.iter().find(|b| b.jid() == jid)
}
