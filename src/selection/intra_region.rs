//! Intra-region strategy: when the conference has no bridges
//! yet, behaves like `RegionBased` restricted to "not loaded or
//! least-loaded"; once it has bridges, anchors to the region of the first
//! conference bridge and prefers spreading within it.

use crate::bridge::Bridge;

use super::{
    conference_region, least_loaded, not_loaded_already_in_conference_in_region,
    not_loaded_in_region, ConferenceBridge, SelectionParticipantProps, SelectionStrategy,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct IntraRegion;

impl SelectionStrategy for IntraRegion {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        _allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        if conference_bridges.is_empty() {
            if let Some(region) = &participant.region {
                if let Some(b) = not_loaded_in_region(candidates, conference_bridges, region, max_stress_level) {
                    return Some(b);
                }
            }
            return least_loaded(candidates, conference_bridges);
        }

        let region = conference_region(conference_bridges)?;

        if let Some(b) = not_loaded_already_in_conference_in_region(conference_bridges, &region, max_stress_level) {
            return Some(b);
        }

        if let Some(b) = not_loaded_in_region(candidates, conference_bridges, &region, max_stress_level) {
            return Some(b);
        }

        least_loaded(candidates, conference_bridges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeStats, Jid};
    use crate::participant::ConferenceBridgeProperties;

    fn bridge(jid: &str, stress: f64, region: &str) -> Bridge {
        let mut b = Bridge::new(Jid::from(jid));
        b.update_stats(&BridgeStats { stress: Some(stress), region: Some(region.to_string()), ..Default::default() });
        b
    }

    #[test]
    fn anchors_to_first_conference_bridge_region() {
        let us_a = bridge("A", 0.1, "us");
        let us_b = bridge("B", 0.05, "us");
        let eu = bridge("C", 0.05, "eu");
        let conference_bridges = vec![ConferenceBridge {
            bridge: us_a.clone(),
            properties: ConferenceBridgeProperties::default(),
        }];
        let strategy = IntraRegion;
        let props = SelectionParticipantProps { region: Some("eu".into()), visitor: false };
        // Even though the participant is in eu, the conference is anchored to us.
        let chosen = strategy
            .do_select(&[us_a.clone(), us_b.clone(), eu], &conference_bridges, &props, true, 0.8)
            .unwrap();
        assert_eq!(chosen.region(), Some("us"));
    }
}
