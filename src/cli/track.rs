use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::Subcommand;

use crate::{
    runtime::RuntimeConfig,
    track::{filter_for_upload, FilterPolicy, ReconcilerConfig, TrackPoint},
};

use super::{open_components, parse_moment};

#[derive(Subcommand, Debug)]
pub enum TrackCommand {
    #[command(about = "Append a location sample the way the background collector does")]
    Record {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        alt: Option<f64>,
        #[arg(long, help = "Horizontal accuracy in meters")]
        accuracy: Option<f64>,
        #[arg(long)]
        stationary: bool,
        #[arg(long)]
        bad_signal: bool,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(
            long,
            help = "Moment of the sample. Examples are \"5 minutes ago\", \"12:00 16/03/2025\". Defaults to now"
        )]
        at: Option<String>,
    },
    #[command(about = "Hydrate the track as the foreground would and print it")]
    Show {
        #[arg(long, help = "Also wait for the settle and verify passes before printing")]
        settle: bool,
    },
    #[command(about = "Print the track as filtered for upload, in JSON")]
    Export {
        #[arg(long, default_value_t = FilterPolicy::default().stationary_radius_m)]
        stationary_radius: f64,
        #[arg(long, help = "Drop points with a worse accuracy, in meters")]
        max_accuracy: Option<f64>,
    },
    #[command(about = "Remove every sample")]
    Clear,
}

pub async fn process_track_command(command: TrackCommand, config: &RuntimeConfig) -> Result<()> {
    let components = open_components(config).await?;
    let reconciler = &components.reconciler;

    match command {
        TrackCommand::Record {
            lat,
            lon,
            alt,
            accuracy,
            stationary,
            bad_signal,
            confidence,
            at,
        } => {
            let timestamp = match at {
                Some(at) => parse_moment(&at, "sample moment")?,
                None => Utc::now(),
            };
            let point = TrackPoint {
                timestamp,
                latitude: lat,
                longitude: lon,
                altitude: alt,
                accuracy,
                is_stationary: stationary,
                is_bad_signal: bad_signal,
                confidence,
            };
            let written = reconciler.log().append(vec![point]).await?;
            if written == 0 {
                println!("Sample is older than the last recorded one, skipped");
            }
        }
        TrackCommand::Show { settle } => {
            reconciler.on_foreground().await;
            if settle {
                let passes = ReconcilerConfig::default().verify_delay + Duration::from_millis(100);
                tokio::time::sleep(passes).await;
            }
            let snapshot = reconciler.snapshot();
            for point in snapshot.points.iter() {
                println!("{}", render(point));
            }
            println!(
                "{} points, {}",
                snapshot.low_water_mark,
                if snapshot.hydrated { "hydrated" } else { "stale" }
            );
            reconciler.on_unmount();
        }
        TrackCommand::Export {
            stationary_radius,
            max_accuracy,
        } => {
            reconciler.hydrate().await;
            let policy = FilterPolicy {
                stationary_radius_m: stationary_radius,
                max_accuracy_m: max_accuracy,
            };
            let filtered = filter_for_upload(&reconciler.snapshot().points, &policy);
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        TrackCommand::Clear => reconciler.log().clear().await?,
    }
    Ok(())
}

fn render(point: &TrackPoint) -> String {
    let mut flags = vec![];
    if point.is_stationary {
        flags.push("stationary");
    }
    if point.is_bad_signal {
        flags.push("bad signal");
    }
    format!(
        "{}\t{:.6}\t{:.6}\t{}\t{}",
        point.timestamp.with_timezone(&Local).format("%x %H:%M:%S"),
        point.latitude,
        point.longitude,
        point
            .accuracy
            .map(|v| format!("±{v:.0}m"))
            .unwrap_or_default(),
        flags.join(", ")
    )
}
