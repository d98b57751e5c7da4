pub mod reminders;
pub mod timer;
pub mod track;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_english::{parse_date_string, Dialect};
use clap::{CommandFactory, Parser, Subcommand};
use reminders::{process_reminders_command, RemindersCommand};
use timer::{process_timer_command, TimerCommand};
use track::{process_track_command, TrackCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    runtime::{default_device_id, start_runtime, Components, RuntimeConfig},
    utils::{
        clock::DefaultClock,
        dir::{create_application_default_path, ensure_dir},
        logging::{enable_logging, CLI_PREFIX, RUNTIME_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Pacekeeper", version, long_about = None)]
#[command(about = "Session timer, location track and reminder scheduling core", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print logs to the console")]
    log: bool,
    #[arg(long = "log-filter", global = true, help = "Log level. Overrides RUST_LOG")]
    log_filter: Option<LevelFilter>,
    #[arg(
        long,
        global = true,
        env = "PACEKEEPER_DEVICE_ID",
        help = "Identity of this device for shared reminders. Defaults to the host name"
    )]
    device_id: Option<String>,
    #[arg(
        long,
        global = true,
        help = "A push channel already delivers shared reminders authored on this device"
    )]
    remote_channel: bool,
    #[arg(long, global = true, help = "Behave as if exact wake-ups were not permitted")]
    inexact: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Start, pause and inspect the session timer")]
    Timer {
        #[command(subcommand)]
        command: TimerCommand,
    },
    #[command(about = "Record and inspect the location track")]
    Track {
        #[command(subcommand)]
        command: TrackCommand,
    },
    #[command(about = "Manage reminders and their wake-ups")]
    Reminders {
        #[command(subcommand)]
        command: RemindersCommand,
    },
    #[command(
        about = "Run the cold-start runtime until Ctrl-C. On unix SIGUSR1 moves the app to the background and SIGUSR2 back to the foreground"
    )]
    Run {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let dir = args
        .dir
        .map_or_else(create_application_default_path, ensure_dir)?;
    let prefix = match args.commands {
        Commands::Run {} => RUNTIME_PREFIX,
        _ => CLI_PREFIX,
    };
    let logging_level = args
        .log_filter
        .or_else(|| args.log.then_some(LevelFilter::TRACE));
    enable_logging(prefix, &dir, logging_level, args.log)?;

    let config = RuntimeConfig {
        dir,
        device_id: args.device_id.unwrap_or_else(default_device_id),
        remote_channel: args.remote_channel,
        exact_wakeups: !args.inexact,
    };

    match args.commands {
        Commands::Timer { command } => process_timer_command(command, &config).await,
        Commands::Track { command } => process_track_command(command, &config).await,
        Commands::Reminders { command } => process_reminders_command(command, &config).await,
        Commands::Run {} => start_runtime(config).await,
    }
}

async fn open_components(config: &RuntimeConfig) -> Result<Components<Local>> {
    Components::open(config, Arc::new(DefaultClock), Local).await
}

/// Parses expressions like "tomorrow 9am", "in 2 hours" or "12:00 16/03/2025" (day/month/year).
fn parse_moment(value: &str, argument: &str) -> Result<DateTime<Utc>> {
    match parse_date_string(value, Local::now(), Dialect::Uk) {
        Ok(v) => Ok(v.with_timezone(&Utc)),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to validate {argument} {e}"),
            )
            .into()),
    }
}
