//! Region-based strategy: prefer not-loaded in the
//! participant's region, else any not-loaded, else least-loaded overall.

use crate::bridge::Bridge;

use super::{least_loaded, not_loaded, not_loaded_in_region, ConferenceBridge, SelectionParticipantProps, SelectionStrategy};

#[derive(Debug, Default, Clone, Copy)]
pub struct RegionBased;

impl SelectionStrategy for RegionBased {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        _allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        if let Some(region) = &participant.region {
            if let Some(b) = not_loaded_in_region(candidates, conference_bridges, region, max_stress_level) {
                return Some(b);
            }
        }

        if let Some(b) = not_loaded(candidates, conference_bridges, max_stress_level) {
            return Some(b);
        }

        least_loaded(candidates, conference_bridges)
    }
}
