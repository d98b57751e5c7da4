use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A location sample as the rest of the app sees it.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    pub is_stationary: bool,
    pub is_bad_signal: bool,
    pub confidence: Option<f64>,
}

/// One row of the on-disk log, written by the background collector. Column names follow the
/// collector's schema.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TrackRow {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub is_stationary: bool,
    #[serde(default)]
    pub bad_signal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl From<TrackRow> for TrackPoint {
    fn from(
        TrackRow {
            timestamp,
            latitude,
            longitude,
            altitude,
            accuracy,
            is_stationary,
            bad_signal,
            confidence,
        }: TrackRow,
    ) -> Self {
        TrackPoint {
            timestamp,
            latitude,
            longitude,
            altitude,
            accuracy,
            is_stationary,
            is_bad_signal: bad_signal,
            confidence,
        }
    }
}

impl From<&TrackPoint> for TrackRow {
    fn from(point: &TrackPoint) -> Self {
        TrackRow {
            timestamp: point.timestamp,
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            accuracy: point.accuracy,
            is_stationary: point.is_stationary,
            bad_signal: point.is_bad_signal,
            confidence: point.confidence,
        }
    }
}
