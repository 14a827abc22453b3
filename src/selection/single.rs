//! Single-bridge strategy: never spreads a conference across
//! more than one bridge. Used when multi-bridge/Octo is disabled.

use crate::bridge::Bridge;

use super::{least_loaded, not_loaded_in_region, ConferenceBridge, SelectionParticipantProps, SelectionStrategy};

#[derive(Debug, Default, Clone, Copy)]
pub struct Single;

impl SelectionStrategy for Single {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        _allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        match conference_bridges.len() {
            0 => {
                if let Some(region) = &participant.region {
                    if let Some(b) = not_loaded_in_region(candidates, conference_bridges, region, max_stress_level) {
                        return Some(b);
                    }
                }
                least_loaded(candidates, conference_bridges)
            }
            1 => {
                let existing = &conference_bridges[0].bridge;
                if existing.operational() {
                    Some(existing.clone())
                } else {
                    None
                }
            }
            // More than one bridge already in a single-bridge conference
            // is a topology the caller must reconcile; selection cannot
            // decide which one to keep.
            _ => None,
        }
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
    fn returns_existing_operational_bridge() {
        let a = bridge("A", 0.1, "us");
        let conference_bridges = vec![ConferenceBridge { bridge: a.clone(), properties: ConferenceBridgeProperties::default() }];
        let props = SelectionParticipantProps::default();
        let chosen = Single.do_select(&[a.clone()], &conference_bridges, &props, true, 0.8).unwrap();
        assert_eq!(chosen.jid(), a.jid());
    }

    #[test]
    fn returns_none_when_existing_bridge_non_operational() {
        let mut a = bridge("A", 0.1, "us");
        a.set_operational(false);
        let conference_bridges = vec![ConferenceBridge { bridge: a.clone(), properties: ConferenceBridgeProperties::default() }];
        let props = SelectionParticipantProps::default();
        assert!(Single.do_select(&[a], &conference_bridges, &props, true, 0.8).is_none());
    }

    #[test]
    fn returns_none_with_more_than_one_conference_bridge() {
        let a = bridge("A", 0.1, "us");
        let b = bridge("B", 0.1, "us");
        let conference_bridges = vec![
            ConferenceBridge { bridge: a.clone(), properties: ConferenceBridgeProperties::default() },
            ConferenceBridge { bridge: b.clone(), properties: ConferenceBridgeProperties::default() },
        ];
        let props = SelectionParticipantProps::default();
        assert!(Single.do_select(&[a, b], &conference_bridges, &props, true, 0.8).is_none());
    }
}
