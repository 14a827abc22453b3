//! Configuration keys consumed by the selector and rate limiter.
//!
//! Mirrors the shape of `rvoip-session-core`'s `SessionManagerConfig`: a
//! plain, `Default`-implementing, serde-derived struct that callers build
//! however they load configuration (file, env, flags) — loading itself is
//! out of this crate's scope.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bridge selection configuration (`bridge.*` keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSelectionConfig {
    /// Bridges with `stress > maxBridgeStress` are treated as overloaded
    /// by the selector facade's filtering pass.
    pub max_bridge_stress: f64,
    /// Whether a pinned-version conference may fall back to an
    /// unmatched-version bridge when no match exists.
    pub allow_selection_if_no_pinned_match: bool,
    /// Whether a participant's region hint is treated as a hard pin.
    pub participant_region_pinned: bool,
    /// Whether selection may fall back across regions when no regional
    /// match exists.
    pub allow_selection_if_no_regional_match: bool,
    /// Strategy-local "not loaded" threshold (the `notLoaded`
    /// helper); distinct from `max_bridge_stress`, which gates the
    /// overload predicate applied by the selector facade.
    pub max_stress_level: f64,
}

impl Default for BridgeSelectionConfig {
    fn default() -> Self {
        Self {
            max_bridge_stress: 0.85,
            allow_selection_if_no_pinned_match: false,
            participant_region_pinned: false,
            allow_selection_if_no_regional_match: true,
            max_stress_level: 0.8,
        }
    }
}

/// Rate limiter configuration (`rateLimit.*` keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Minimum gap between two accepted requests.
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,
    /// Maximum accepted requests within the trailing `interval` window.
    pub max_requests: usize,
    /// Width of the trailing sliding window.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(10_000),
            max_requests: 3,
            interval: Duration::from_millis(60_000),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
