use anyhow::Result;
use chrono::{Local, NaiveTime, Utc};
use clap::Subcommand;

use crate::{
    reminders::spec::{ReminderCategory, ReminderSchedule, ReminderSpec, WeekdaySet},
    runtime::{Components, RuntimeConfig},
    wakeup::RecurrenceRule,
};

use super::{open_components, parse_moment};

#[derive(clap::Args, Debug)]
pub struct ReminderOptions {
    #[arg(long, help = "Reminder id. Derived from the title when missing")]
    id: Option<String>,
    #[arg(long, default_value = "")]
    notes: String,
    #[arg(long, help = "Store as a shared reminder authored by this device")]
    shared: bool,
}

#[derive(Subcommand, Debug)]
pub enum RemindersCommand {
    #[command(about = "Remind once")]
    AddOnce {
        title: String,
        #[arg(
            long,
            help = "When to remind. Examples are \"tomorrow 9am\", \"in 2 hours\", \"12:00 16/03/2025\""
        )]
        at: String,
        #[command(flatten)]
        options: ReminderOptions,
    },
    #[command(about = "Remind every day")]
    AddDaily {
        title: String,
        #[arg(long, value_parser = parse_time, help = "Local time as HH:MM")]
        time: NaiveTime,
        #[command(flatten)]
        options: ReminderOptions,
    },
    #[command(about = "Remind on some days of the week")]
    AddWeekly {
        title: String,
        #[arg(long, value_parser = parse_time, help = "Local time as HH:MM")]
        time: NaiveTime,
        #[arg(long, help = "Days like \"mon,wed,fri\" or \"2,4,6\" where Sunday is 1")]
        days: WeekdaySet,
        #[command(flatten)]
        options: ReminderOptions,
    },
    #[command(about = "Show the next trigger of every reminder")]
    List,
    #[command(about = "Cancel every wake-up and schedule them again")]
    Rebuild,
    #[command(about = "Mark a reminder as delivered")]
    Delivered { id: String },
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(value, "%H:%M")
}

pub async fn process_reminders_command(
    command: RemindersCommand,
    config: &RuntimeConfig,
) -> Result<()> {
    let components = open_components(config).await?;

    match command {
        RemindersCommand::AddOnce { title, at, options } => {
            let notify_at = parse_moment(&at, "reminder moment")?;
            add(&components, config, title, ReminderSchedule::OneTime { notify_at }, options).await
        }
        RemindersCommand::AddDaily {
            title,
            time,
            options,
        } => {
            let schedule = ReminderSchedule::Daily { notify_time: time };
            add(&components, config, title, schedule, options).await
        }
        RemindersCommand::AddWeekly {
            title,
            time,
            days,
            options,
        } => {
            let schedule = ReminderSchedule::Weekly {
                notify_time: time,
                weekdays: days,
            };
            add(&components, config, title, schedule, options).await
        }
        RemindersCommand::List => {
            let plan = components.scheduler.preview().await;
            for alarm in plan.alarms {
                println!(
                    "{}\t{}\t{}\t{}",
                    alarm.reminder_id,
                    alarm.trigger.with_timezone(&Local).format("%x %H:%M"),
                    describe(&alarm.rule),
                    alarm.payload.title
                );
            }
            for id in plan.skipped {
                println!("{id}\tnot scheduled");
            }
            Ok(())
        }
        RemindersCommand::Rebuild => rebuild(&components).await,
        RemindersCommand::Delivered { id } => {
            components.scheduler.acknowledge_delivery(&id).await?;
            rebuild(&components).await
        }
    }
}

async fn add(
    components: &Components<Local>,
    config: &RuntimeConfig,
    title: String,
    schedule: ReminderSchedule,
    ReminderOptions { id, notes, shared }: ReminderOptions,
) -> Result<()> {
    let id = id.unwrap_or_else(|| generate_id(&title));
    let category = if shared {
        ReminderCategory::Shared
    } else {
        ReminderCategory::Personal
    };
    let spec = ReminderSpec {
        id: id.clone(),
        title,
        notes,
        schedule,
        origin_device_id: shared.then(|| config.device_id.clone()),
        delivered: false,
    };
    components.reminders.add(category, spec).await?;
    println!("Added {category} reminder {id}");
    rebuild(components).await
}

/// Rebuilds the wake-up table and puts the timer wake-up back, the way a cold start does.
async fn rebuild(components: &Components<Local>) -> Result<()> {
    components.engine.restore().await;
    let report = components.scheduler.rebuild().await;
    components.engine.reissue_wakeup().await;

    println!(
        "{} scheduled, {} skipped, {} failed",
        report.scheduled.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for category in report.failed_categories {
        println!("Couldn't fetch {category} reminders");
    }
    Ok(())
}

fn generate_id(title: &str) -> String {
    let slug = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>();
    format!("{}-{}", slug.trim_matches('-'), Utc::now().timestamp_millis())
}

fn describe(rule: &RecurrenceRule) -> String {
    match rule {
        RecurrenceRule::Once => "once".into(),
        RecurrenceRule::Daily { hour, minute } => format!("daily {hour:02}:{minute:02}"),
        RecurrenceRule::Weekly {
            hour,
            minute,
            weekdays,
        } => format!("weekly {hour:02}:{minute:02} on {weekdays}"),
    }
}
