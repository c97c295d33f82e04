use std::env;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scheduler {
    pub automation_path: String,
    pub state_path: String,
    /// Directory the trigger units are written to
    pub unit_dir: String,
    pub socket_path: String,
    /// Absolute path of this binary, used in the units' ExecStart
    pub scheduler_bin: String,
    #[serde(default)]
    pub run_as_user: Option<String>,
    #[serde(default)]
    pub daemon_unit: Option<String>,
    /// Host-local HH:MM of the unconditional daily close
    pub safety_close_at: String,
    /// Host-local HH:MM of the daily resolve-and-install run
    pub daily_apply_at: String,
    pub systemctl: String,
    pub request_timeout_secs: u64,
}

impl Scheduler {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub scheduler: Scheduler,
    /// Directory the settings were loaded from; passed on to the generated units
    #[serde(skip)]
    pub config_dir: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = env::var("COOPDOOR_CONFIG_DIR").unwrap_or("configs".into());
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        let mut settings: Settings = Config::builder()
            .add_source(File::with_name(&format!("{config_dir}/default")))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            .add_source(
                Environment::with_prefix("COOPDOOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.config_dir = Path::new(&config_dir)
            .canonicalize()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or(config_dir);

        Ok(settings)
    }
}
