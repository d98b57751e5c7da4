use anyhow::Result;
use chrono::{Duration, Local};
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;

use crate::{
    clock::{engine::ClockEngine, ClockEvent, ClockSnapshot, SessionKind, TimerPhase},
    runtime::RuntimeConfig,
    utils::time::{format_duration, parse_duration},
};

use super::open_components;

#[derive(Subcommand, Debug)]
pub enum TimerCommand {
    #[command(about = "Start counting up")]
    Up {
        label: String,
        #[arg(long, help = "Treat the session as a tracked activity. Clears the location track")]
        activity: bool,
    },
    #[command(about = "Start a count-down. Durations look like 90, 90s, 25m or 1h30m")]
    Down {
        #[arg(value_parser = parse_duration)]
        duration: Duration,
        label: String,
    },
    #[command(about = "Freeze the running timer")]
    Pause,
    #[command(about = "Continue a paused timer")]
    Resume,
    #[command(about = "Drop the active session")]
    Cancel,
    #[command(about = "Run a finished count-down again")]
    Restart,
    #[command(about = "Show the active session")]
    Status,
    #[command(about = "Print the timer every second until it stops or Ctrl-C")]
    Watch,
}

pub async fn process_timer_command(command: TimerCommand, config: &RuntimeConfig) -> Result<()> {
    let components = open_components(config).await?;
    let engine = &components.engine;
    engine.restore().await;

    let snapshot = match command {
        TimerCommand::Up { label, activity } => {
            let kind = if activity {
                SessionKind::Activity
            } else {
                SessionKind::Stopwatch
            };
            let snapshot = engine.start_count_up(&label, kind).await?;
            if activity {
                components.reconciler.log().clear().await?;
            }
            snapshot
        }
        TimerCommand::Down { duration, label } => engine.start_count_down(duration, &label).await?,
        TimerCommand::Pause => engine.pause().await?,
        TimerCommand::Resume => engine.resume().await?,
        TimerCommand::Cancel => engine.cancel().await,
        TimerCommand::Restart => engine.restart().await?,
        TimerCommand::Status => engine.tick().await,
        TimerCommand::Watch => return watch(engine).await,
    };
    println!("{}", render(&snapshot));
    Ok(())
}

async fn watch(engine: &ClockEngine) -> Result<()> {
    let mut events = engine.subscribe();
    let snapshot = engine.snapshot().await;
    println!("{}", render(&snapshot));
    if snapshot.phase != TimerPhase::Running {
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(ClockEvent::Tick(snapshot)) => println!("{}", render(&snapshot)),
                Ok(ClockEvent::Alarm(snapshot)) => {
                    println!("{}", render(&snapshot));
                    println!("Time is up");
                    return Ok(());
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

fn phase_name(phase: TimerPhase) -> &'static str {
    match phase {
        TimerPhase::Idle => "idle",
        TimerPhase::Running => "running",
        TimerPhase::Paused => "paused",
        TimerPhase::Fired => "finished",
    }
}

fn render(snapshot: &ClockSnapshot) -> String {
    let Some(session) = &snapshot.session else {
        return phase_name(TimerPhase::Idle).to_owned();
    };
    let value = match snapshot.remaining {
        Some(remaining) => format!("{} left", format_duration(remaining)),
        None => format_duration(snapshot.elapsed),
    };
    format!(
        "{}\t{}\t{}\tsince {}",
        session.label,
        phase_name(snapshot.phase),
        value,
        session.started_at.with_timezone(&Local).format("%x %H:%M:%S"),
    )
}
