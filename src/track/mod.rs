pub mod entities;
pub mod filter;
pub mod log;
pub mod reconciler;

pub use entities::TrackPoint;
pub use filter::{filter_for_upload, FilterPolicy};
pub use log::{JsonLinesTrackLog, TrackLog};
pub use reconciler::{
    HydrateOutcome, ReconcilerConfig, TrackReconciler, TrackSnapshot, VerifyOutcome,
};
