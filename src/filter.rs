//! Significant-change sample filter.
//!
//! The sensor pings at roughly 10-15 Hz. Only readings that differ materially
//! from the last accepted sample are persisted and emitted.

use serde::{Deserialize, Serialize};

use crate::sample::{Location, Sample};

/// Temperature change that always counts as significant.
pub const MIN_DELTA_TEMPERATURE_C: f32 = 1.0;

/// Mean Earth radius in metres (IUGG).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Configurable filter thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Depth change in metres that triggers a new sample.
    pub min_delta_depth_m: f32,
    /// Distance in metres travelled since the last sample that triggers a new one.
    pub min_delta_position_m: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_delta_depth_m: 0.5,
            min_delta_position_m: 1.0,
        }
    }
}

/// Decide whether `candidate` should be kept given the last accepted sample.
///
/// The first sample is always kept. After that any of a battery change, a
/// temperature change of at least [`MIN_DELTA_TEMPERATURE_C`], a depth change
/// of at least `min_delta_depth_m`, or movement beyond `min_delta_position_m`
/// is enough.
pub fn accept(candidate: &Sample, last: Option<&Sample>, thresholds: &Thresholds) -> bool {
    let Some(last) = last else {
        return true;
    };

    if candidate.battery_pct != last.battery_pct {
        return true;
    }
    if (candidate.temperature_c - last.temperature_c).abs() >= MIN_DELTA_TEMPERATURE_C {
        return true;
    }
    if (candidate.depth_m - last.depth_m).abs() >= thresholds.min_delta_depth_m {
        return true;
    }
    haversine_m(candidate.location(), last.location()) > thresholds.min_delta_position_m
}

/// Great-circle distance between two positions in metres.
pub fn haversine_m(a: Location, b: Location) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
}
