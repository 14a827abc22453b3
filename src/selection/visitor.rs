//! Visitor-partitioned strategy: composes two inner
//! strategies, one for visitors and one for regular participants,
//! selecting within the matching partition of the conference's bridges
//! first and falling back to the full candidate set.

use crate::bridge::Bridge;

use super::{ConferenceBridge, SelectionParticipantProps, SelectionStrategy};

pub struct Visitor {
    participant_strategy: Box<dyn SelectionStrategy>,
    visitor_strategy: Box<dyn SelectionStrategy>,
}

impl Visitor {
    pub fn new(participant_strategy: Box<dyn SelectionStrategy>, visitor_strategy: Box<dyn SelectionStrategy>) -> Self {
        Self { participant_strategy, visitor_strategy }
    }
}

impl SelectionStrategy for Visitor {
    fn do_select(
        &self,
        candidates: &[Bridge],
        conference_bridges: &[ConferenceBridge],
        participant: &SelectionParticipantProps,
        allow_multi_bridge: bool,
        max_stress_level: f64,
    ) -> Option<Bridge> {
        let (visitor_bridges, participant_bridges): (Vec<ConferenceBridge>, Vec<ConferenceBridge>) =
            conference_bridges.iter().cloned().partition(|cb| cb.properties.visitor);

        let (inner, partition) = if participant.visitor {
            (&self.visitor_strategy, visitor_bridges)
        } else {
            (&self.participant_strategy, participant_bridges)
        };

        // Go through `select`, not `do_select`, on the partition: it must
        // see the shared preamble so a partition that already has exactly
        // one bridge is kept rather than re-run through full selection.
        inner
            .select(candidates, &partition, participant, allow_multi_bridge, max_stress_level)
            .or_else(|| inner.select(candidates, conference_bridges, participant, allow_multi_bridge, max_stress_level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeStats, Jid};
    use crate::participant::ConferenceBridgeProperties;
    use crate::selection::RegionBased;

    fn bridge(jid: &str, stress: f64, region: &str) -> Bridge {
        let mut b = Bridge::new(Jid::from(jid));
        b.update_stats(&BridgeStats { stress: Some(stress), region: Some(region.to_string()), ..Default::default() });
        b
    }

    #[test]
    fn scenario_5_visitor_partitioning() {
        let bridge_a = bridge("A", 0.1, "us");
        let bridge_b = bridge("B", 0.1, "us");
        let conference_bridges = vec![
            ConferenceBridge {
                bridge: bridge_a.clone(),
                properties: ConferenceBridgeProperties { visitor: false, participant_count: 1, ..Default::default() },
            },
            ConferenceBridge {
                bridge: bridge_b.clone(),
                properties: ConferenceBridgeProperties { visitor: true, participant_count: 1, ..Default::default() },
            },
        ];

        let strategy = Visitor::new(Box::new(RegionBased), Box::new(RegionBased));

        let visitor_props = SelectionParticipantProps { region: Some("us".into()), visitor: true };
        let chosen_for_visitor = strategy
            .do_select(&[bridge_a.clone(), bridge_b.clone()], &conference_bridges, &visitor_props, true, 0.8)
            .unwrap();
        assert_eq!(chosen_for_visitor.jid(), bridge_b.jid());

        let participant_props = SelectionParticipantProps { region: Some("us".into()), visitor: false };
        let chosen_for_participant = strategy
            .do_select(&[bridge_a.clone(), bridge_b.clone()], &conference_bridges, &participant_props, true, 0.8)
            .unwrap();
        assert_eq!(chosen_for_participant.jid(), bridge_a.jid());
    }
}
