use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Upper bound for the pulse interval and the pause after an action.
pub const MAX_DEVICE_PAUSE_SECS: f64 = 300.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Ble,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub mac: String,
    pub adapter: String,
    pub transport: Transport,
    pub connect_timeout_secs: u64,
    /// Pulses that take the door from closed to fully open
    pub base_pulses: u32,
    pub pulse_interval_secs: f64,
    pub home_before_open: bool,
    pub min_pause_after_action_secs: f64,
}

impl Device {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn pulse_interval(&self) -> Duration {
        Duration::from_secs_f64(self.pulse_interval_secs)
    }

    pub fn min_pause(&self) -> Duration {
        Duration::from_secs_f64(self.min_pause_after_action_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Hold the link open and reconnect whenever it drops
    Persistent,
    /// Connect per command and release the link afterwards
    OnDemand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub mode: LinkMode,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub health_check_ms: u64,
    /// How long a command waits for the link before failing
    pub wait_for_connection_secs: u64,
}

impl Link {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check_ms)
    }

    pub fn wait_for_connection(&self) -> Duration {
        Duration::from_secs(self.wait_for_connection_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub socket_path: String,
    /// Commands that may wait behind the one in flight
    pub queue_depth: usize,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    /// Automation file holding the open cap
    pub automation: String,
    /// Directory for the position and last-event cache
    pub state_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub device: Device,
    pub link: Link,
    pub channel: Channel,
    pub paths: Paths,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = env::var("COOPDOOR_CONFIG_DIR").unwrap_or("configs".into());
        let run_mode = env::var("RUN_MODE").unwrap_or("development".into());

        let settings: Settings = Config::builder()
            .add_source(File::with_name(&format!("{config_dir}/default")))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            .add_source(
                Environment::with_prefix("COOPDOOR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.base_pulses == 0 {
            return Err(ConfigError::Message("device.base_pulses must be at least 1".into()));
        }
        if self.device.connect_timeout_secs == 0 {
            return Err(ConfigError::Message("device.connect_timeout_secs must be at least 1".into()));
        }
        let pauses = [
            ("device.pulse_interval_secs", self.device.pulse_interval_secs),
            ("device.min_pause_after_action_secs", self.device.min_pause_after_action_secs),
        ];
        for (key, secs) in pauses {
            if !(0.0..=MAX_DEVICE_PAUSE_SECS).contains(&secs) {
                return Err(ConfigError::Message(format!(
                    "{key} must be within 0..={MAX_DEVICE_PAUSE_SECS}, got {secs}"
                )));
            }
        }
        if self.channel.queue_depth == 0 {
            return Err(ConfigError::Message("channel.queue_depth must be at least 1".into()));
        }
        if !(1.0..=10.0).contains(&self.link.multiplier) {
            return Err(ConfigError::Message("link.multiplier must be within 1.0..=10.0".into()));
        }
        if self.link.base_delay_ms == 0 || self.link.max_delay_ms < self.link.base_delay_ms {
            return Err(ConfigError::Message(
                "link delays must satisfy 0 < base_delay_ms <= max_delay_ms".into(),
            ));
        }
        if self.link.health_check_ms == 0 {
            return Err(ConfigError::Message("link.health_check_ms must be positive".into()));
        }

        Ok(())
    }
}
