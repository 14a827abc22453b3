//! A single media relay's state and metadata.
//!
//! Grounded on `rvoip-session-core::bridge::bridge::SessionBridge`'s shape
//! (a plain value-object with `&mut self` mutators that log their own
//! transitions) generalized to the richer Colibri bridge lifecycle: stress,
//! region/version pinning, and the four independent shutdown-adjacent
//! flags this calls out as a source of real-world disagreement.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable opaque identifier for a bridge (its XMPP JID in the reference
/// deployment; opaque to this crate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Jid(pub String);

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Jid {
    fn from(s: &str) -> Self {
        Jid(s.to_string())
    }
}

impl From<String> for Jid {
    fn from(s: String) -> Self {
        Jid(s)
    }
}

/// Identifies a bridge within the Octo relay mesh. Distinct from `Jid`
/// because a bridge may be known before it has announced a relay id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelayId(pub String);

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stats/presence fields a bridge may report. All fields optional: a
/// partial report only updates the fields it carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeStats {
    pub stress: Option<f64>,
    pub region: Option<String>,
    pub version: Option<String>,
    pub relay_id: Option<RelayId>,
    pub operational: Option<bool>,
    pub draining: Option<bool>,
    pub in_graceful_shutdown: Option<bool>,
}

/// A flag transition worth surfacing to the registry's event stream.
/// Returned by mutators instead of the `Bridge` performing I/O itself
/// ("no I/O").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStateChange {
    BecameOperational,
    BecameNonOperational,
    BecameDraining,
    StoppedDraining,
    EnteredGracefulShutdown,
    EnteredShuttingDown,
}

/// A single media relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    jid: Jid,
    relay_id: Option<RelayId>,
    region: Option<String>,
    version: Option<String>,
    stress: f64,
    endpoint_count: u32,
    last_reported_stress_level: f64,
    operational: bool,
    draining: bool,
    in_graceful_shutdown: bool,
    shutting_down: bool,
}

impl Bridge {
    /// A newly-discovered bridge starts operational and unburdened; the
    /// registry immediately feeds it stats from the same presence that
    /// announced it.
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            relay_id: None,
            region: None,
            version: None,
            stress: 0.0,
            endpoint_count: 0,
            last_reported_stress_level: 0.0,
            operational: true,
            draining: false,
            in_graceful_shutdown: false,
            shutting_down: false,
        }
    }

    pub fn jid(&self) -> &Jid {
        &self.jid
    }

    pub fn relay_id(&self) -> Option<&RelayId> {
        self.relay_id.as_ref()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn stress(&self) -> f64 {
        self.stress
    }

    pub fn endpoint_count(&self) -> u32 {
        self.endpoint_count
    }

    pub fn operational(&self) -> bool {
        self.operational
    }

    pub fn draining(&self) -> bool {
        self.draining
    }

    pub fn in_graceful_shutdown(&self) -> bool {
        self.in_graceful_shutdown
    }

    pub fn shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// `selectable = operational ∧ ¬shuttingDown` (the explicit
    /// resolution of the two-implementations disagreement: draining and
    /// graceful shutdown are selector *preference* filters, not part of
    /// this predicate).
    pub fn selectable(&self) -> bool {
        self.operational && !self.shutting_down
    }

    /// Ingest a stats/presence report. Clamps stress to `[0, 1]`; rejects
    /// (and logs) non-finite or out-of-range values, keeping the previous
    /// stress. Returns the set of flag transitions this report caused.
    pub fn update_stats(&mut self, stats: &BridgeStats) -> Vec<BridgeStateChange> {
        let mut changes = Vec::new();

        if let Some(stress) = stats.stress {
            if stress.is_finite() && (0.0..=1.0).contains(&stress) {
                self.last_reported_stress_level = stress;
                self.stress = stress;
            } else {
                tracing::warn!(
                    bridge = %self.jid,
                    stress,
                    "rejected out-of-range stress report, keeping previous value"
                );
            }
        }

        if let Some(region) = &stats.region {
            self.region = Some(region.clone());
        }

        if let Some(version) = &stats.version {
            self.version = Some(version.clone());
        }

        if let Some(relay_id) = &stats.relay_id {
            match &self.relay_id {
                None => self.relay_id = Some(relay_id.clone()),
                Some(existing) if existing != relay_id => {
                    tracing::info!(
                        bridge = %self.jid,
                        old_relay_id = %existing,
                        new_relay_id = %relay_id,
                        "bridge relay id changed"
                    );
                    self.relay_id = Some(relay_id.clone());
                }
                _ => {}
            }
        }

        if let Some(operational) = stats.operational {
            if let Some(change) = self.set_operational(operational) {
                changes.push(change);
            }
        }

        if let Some(draining) = stats.draining {
            if let Some(change) = self.set_draining(draining) {
                changes.push(change);
            }
        }

        if let Some(graceful) = stats.in_graceful_shutdown {
            if graceful {
                if let Some(change) = self.set_graceful_shutdown() {
                    changes.push(change);
                }
            }
        }

        changes
    }

    pub fn endpoint_added(&mut self) {
        self.endpoint_count += 1;
    }

    pub fn endpoint_removed(&mut self) {
        self.endpoint_count = self.endpoint_count.saturating_sub(1);
    }

    /// Idempotent. Returns `Some` only when the flag actually flipped.
    pub fn set_operational(&mut self, operational: bool) -> Option<BridgeStateChange> {
        if self.operational == operational {
            return None;
        }
        self.operational = operational;
        Some(if operational {
            BridgeStateChange::BecameOperational
        } else {
            BridgeStateChange::BecameNonOperational
        })
    }

    pub fn set_draining(&mut self, draining: bool) -> Option<BridgeStateChange> {
        if self.draining == draining {
            return None;
        }
        self.draining = draining;
        Some(if draining {
            BridgeStateChange::BecameDraining
        } else {
            BridgeStateChange::StoppedDraining
        })
    }

    pub fn set_graceful_shutdown(&mut self) -> Option<BridgeStateChange> {
        if self.in_graceful_shutdown {
            return None;
        }
        self.in_graceful_shutdown = true;
        Some(BridgeStateChange::EnteredGracefulShutdown)
    }

    /// One-way latch: once `true`, further calls are no-ops.
    pub fn set_shutting_down(&mut self) -> Option<BridgeStateChange> {
        if self.shutting_down {
            return None;
        }
        self.shutting_down = true;
        Some(BridgeStateChange::EnteredShuttingDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectable_ignores_draining_and_graceful_shutdown() {
        let mut b = Bridge::new(Jid::from("b1"));
        assert!(b.selectable());
        b.set_draining(true);
        assert!(b.selectable(), "draining alone must not affect selectable");
        b.set_graceful_shutdown();
        assert!(b.selectable(), "graceful shutdown alone must not affect selectable");
        b.set_shutting_down();
        assert!(!b.selectable());
    }

    #[test]
    fn shutting_down_is_a_one_way_latch() {
        let mut b = Bridge::new(Jid::from("b1"));
        assert!(b.set_shutting_down().is_some());
        assert!(b.set_shutting_down().is_none(), "second call is a no-op");
        assert!(b.shutting_down());
    }

    #[test]
    fn stress_out_of_range_is_rejected_and_previous_kept() {
        let mut b = Bridge::new(Jid::from("b1"));
        b.update_stats(&BridgeStats { stress: Some(0.4), ..Default::default() });
        assert_eq!(b.stress(), 0.4);
        b.update_stats(&BridgeStats { stress: Some(1.5), ..Default::default() });
        assert_eq!(b.stress(), 0.4, "out-of-range stress must not overwrite previous");
        b.update_stats(&BridgeStats { stress: Some(f64::NAN), ..Default::default() });
        assert_eq!(b.stress(), 0.4);
    }

    #[test]
    fn endpoint_count_floors_at_zero() {
        let mut b = Bridge::new(Jid::from("b1"));
        b.endpoint_removed();
        assert_eq!(b.endpoint_count(), 0);
        b.endpoint_added();
        b.endpoint_removed();
        b.endpoint_removed();
        assert_eq!(b.endpoint_count(), 0);
    }

    #[test]
    fn relay_id_may_change_once_and_is_accepted() {
        let mut b = Bridge::new(Jid::from("b1"));
        b.update_stats(&BridgeStats { relay_id: Some(RelayId("r1".into())), ..Default::default() });
        assert_eq!(b.relay_id(), Some(&RelayId("r1".into())));
        b.update_stats(&BridgeStats { relay_id: Some(RelayId("r2".into())), ..Default::default() });
        assert_eq!(b.relay_id(), Some(&RelayId("r2".into())));
    }
}
