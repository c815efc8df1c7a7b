use crate::cable::CableCase;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tolerances and search radii used while extracting topologies.
///
/// Distances are in the planar units of the input layers (metres for projected
/// Dutch grid data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Per-axis margin under which two line endpoints are treated as the same point when deduplicating.
    pub duplicate_margin: f64,
    /// Tolerance for endpoint coincidence in touch queries and loop mapping.
    pub touch_tolerance: f64,
    /// Distance from an LV/MV station shape within which a line endpoint starts a radial run.
    pub lv_station_margin: f64,
    pub consumer_distance: f64,
    pub mv_station_radius: f64,
    pub hv_station_radius: f64,
    pub fallback_radius: f64,
    pub hv_start_margin: f64,
    pub hv_start_margin_step: f64,
    pub hv_start_attempts: usize,
    /// Purpose marker identifying residential consumers.
    pub residential_marker: String,
    pub industrial_marker: String,
    pub cable_case: CableCase,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            duplicate_margin: 0.12,
            touch_tolerance: 1e-6,
            lv_station_margin: 0.05,
            consumer_distance: 20.0,
            mv_station_radius: 3.0,
            hv_station_radius: 20.0,
            fallback_radius: 3.0,
            hv_start_margin: 50.0,
            hv_start_margin_step: 50.0,
            hv_start_attempts: 5,
            residential_marker: "woonfunctie".to_string(),
            industrial_marker: "industriefunctie".to_string(),
            cable_case: CableCase::Average,
        }
    }
}

impl ExtractionConfig {
    /// Parses a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Longest wall-clock budget a single candidate can get.
pub const MAX_MATCH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Limits for the topology matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Candidates with this many edges or more are skipped.
    pub size_ceiling: usize,
    /// Wall-clock budget per candidate, in seconds.
    pub timeout_secs: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            size_ceiling: 20,
            timeout_secs: 300.0,
        }
    }
}

impl MatchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Per-candidate budget, clamped to `[0, MAX_MATCH_TIMEOUT]`. NaN reads as zero.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.max(0.0))
            .map_or(MAX_MATCH_TIMEOUT, |t| t.min(MAX_MATCH_TIMEOUT))
    }
}
