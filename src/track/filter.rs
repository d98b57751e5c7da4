use super::entities::TrackPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Thresholds applied before a track is handed to the upload collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterPolicy {
    /// Consecutive stationary points within this distance of the run's first point collapse
    /// into that first point.
    pub stationary_radius_m: f64,
    /// Points reporting a worse horizontal accuracy are dropped. `None` keeps all of them.
    pub max_accuracy_m: Option<f64>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            stationary_radius_m: 10.0,
            max_accuracy_m: None,
        }
    }
}

/// Great-circle distance in meters.
pub fn distance_m(a: &TrackPoint, b: &TrackPoint) -> f64 {
    let (lat_a, lat_b) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = lat_b - lat_a;
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Drops bad-signal and inaccurate points, then collapses duplicate stationary runs.
pub fn filter_for_upload(points: &[TrackPoint], policy: &FilterPolicy) -> Vec<TrackPoint> {
    let mut kept: Vec<TrackPoint> = Vec::with_capacity(points.len());
    let mut run_start: Option<usize> = None;

    for point in points {
        if point.is_bad_signal {
            continue;
        }
        if let (Some(limit), Some(accuracy)) = (policy.max_accuracy_m, point.accuracy) {
            if accuracy > limit {
                continue;
            }
        }

        if !point.is_stationary {
            run_start = None;
            kept.push(point.clone());
            continue;
        }

        match run_start {
            Some(index) if distance_m(&kept[index], point) <= policy.stationary_radius_m => {}
            _ => {
                run_start = Some(kept.len());
                kept.push(point.clone());
            }
        }
    }

    kept
}
