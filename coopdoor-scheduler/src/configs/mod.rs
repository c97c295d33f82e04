mod automation;
mod settings;

pub use automation::{
    ModeKind, ParseFailure, ScheduleConfig, ScheduleMode, load_automation, parse_automation,
    system_timezone,
};
pub use settings::{Logger, Scheduler, Settings};
