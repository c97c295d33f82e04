use std::path::Path;

use anyhow::Context;
use chrono::{Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use coopdoor_api::client::DoorClient;
use coopdoor_scheduler::configs::Settings;
use coopdoor_scheduler::engine;
use coopdoor_scheduler::fire::{FireAction, FireOutcome, fire};
use coopdoor_scheduler::installer::{ProcessSystemCtl, TriggerInstaller};
use coopdoor_scheduler::store::ScheduleStateStore;

#[derive(Debug, Parser)]
#[command(name = "coopdoor-scheduler", version, about = "Daily open/close schedule for the coop door")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve the day's schedule and install its triggers
    Apply {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run one trigger against the door daemon
    Fire {
        #[arg(value_enum)]
        action: FireAction,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the schedule that apply would install
    Preview {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the stored schedule state
    State,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new().context("Failed to load settings.")?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let app_name = env!("CARGO_PKG_NAME").replace('-', "_");
            let level = settings.logger.level.as_str();

            format!("{app_name}={level},coopdoor_api={level}").into()
        }))
        .with_writer(std::io::stderr)
        .init();

    let scheduler = &settings.scheduler;
    let store = ScheduleStateStore::new(&scheduler.state_path);
    let automation = Path::new(&scheduler.automation_path);
    let now = Utc::now();

    match cli.command {
        Commands::Apply { date } => {
            let systemctl = ProcessSystemCtl::new(&scheduler.systemctl);
            let installer = TriggerInstaller::from_settings(scheduler, &settings.config_dir, systemctl)?;
            let report = engine::apply(&installer, &store, automation, date, now)
                .context("Schedule apply failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Fire { action, date } => {
            let door = DoorClient::new(&scheduler.socket_path).with_timeout(scheduler.request_timeout());
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            match fire(&door, &store, action, date, now).await? {
                FireOutcome::Fired(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                FireOutcome::Skipped(reason) => println!("skipped: {reason}"),
            }
        }
        Commands::Preview { date } => {
            let schedule = engine::preview(automation, date, now)?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        Commands::State => match store.load()? {
            Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
            None => println!("no schedule state at {}", store.path().display()),
        },
    }

    Ok(())
}
