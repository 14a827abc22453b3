//! Split strategy ("assumed from factory presence"): spreads
//! a conference across distinct bridges rather than consolidating,
//! breaking ties by least-loaded. Intended for testing/spreading
//! scenarios rather than production load balancing.

use crate::bridge::Bridge;

use super::{least_loaded, ConferenceBridge, SelectionParticipantProps, SelectionStrategy};

#[derive(Debug, Default, Clone, Copy)]
pub struct Split;

impl SelectionStrategy for Split {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        _participant: &SelectionParticipantProps,
        _allow_multi_bridge: bool,
        _max_stress_level: f64,
    ) -> Option<Bridge> {
        let in_use: std::collections::HashSet<_> = conference_bridges.iter().map(|cb| cb.bridge.jid().clone()).collect();
        let fresh: Vec<Bridge> = candidates.iter().filter(|b| !in_use.contains(b.jid())).cloned().collect();

        if fresh.is_empty() {
            return None;
        }

        least_loaded(&fresh, conference_bridges)
    }
}
