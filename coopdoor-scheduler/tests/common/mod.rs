#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use coopdoor_api::client::{ClientError, DoorControl};
use coopdoor_api::{CommandOutcome, DoorSnapshot};
use coopdoor_scheduler::errors::ScheduleError;
use coopdoor_scheduler::installer::{SystemCtl, TriggerInstaller};
use coopdoor_scheduler::store::ScheduleStateStore;
use tempfile::TempDir;

pub const BIN: &str = "/usr/local/bin/coopdoor-scheduler";

/// Records every systemctl call; optionally fails calls that match.
#[derive(Default)]
pub struct RecordingSystemCtl {
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingSystemCtl {
    pub fn fail_on(&self, call: &str) {
        *self.fail_on.lock().unwrap() = Some(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl SystemCtl for RecordingSystemCtl {
    fn run(&self, args: &[&str]) -> Result<(), ScheduleError> {
        let call = args.join(" ");
        self.calls.lock().unwrap().push(call.clone());

        if self.fail_on.lock().unwrap().as_deref() == Some(call.as_str()) {
            return Err(ScheduleError::SystemCtl {
                args: call,
                detail: "Access denied".into(),
            });
        }
        Ok(())
    }
}

pub struct Workspace {
    pub dir: TempDir,
    pub systemctl: RecordingSystemCtl,
}

impl Workspace {
    pub fn new(automation: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("units")).unwrap();
        fs::write(dir.path().join("automation.json"), automation).unwrap();
        Self {
            dir,
            systemctl: RecordingSystemCtl::default(),
        }
    }

    pub fn installer(&self) -> TriggerInstaller<&RecordingSystemCtl> {
        TriggerInstaller::new(self.unit_dir(), BIN, &self.systemctl)
            .with_daemon_unit("coopd.service")
            .with_run_as_user("coop")
            .with_environment("COOPDOOR_CONFIG_DIR", "/etc/coopdoor")
    }

    pub fn store(&self) -> ScheduleStateStore {
        ScheduleStateStore::new(self.dir.path().join("state").join("schedule_state.json"))
    }

    pub fn automation(&self) -> PathBuf {
        self.dir.path().join("automation.json")
    }

    pub fn unit_dir(&self) -> PathBuf {
        self.dir.path().join("units")
    }

    pub fn unit(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.unit_dir().join(name)).ok()
    }

    pub fn unit_files(&self) -> Vec<String> {
        list(&self.unit_dir())
    }
}

pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

pub fn fixed_automation(open: &str, close: &str, open_percent: u8) -> String {
    format!(
        r#"{{"mode":"fixed","fixed":{{"open":"{open}","close":"{close}"}},"timezone":"UTC","open_percent":{open_percent}}}"#
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoorCall {
    Open(i32),
    Close,
}

/// Door stand-in that records what the triggers asked for.
#[derive(Default)]
pub struct FakeDoor {
    calls: Mutex<Vec<DoorCall>>,
    failing: Mutex<bool>,
}

impl FakeDoor {
    pub fn failing() -> Self {
        Self {
            failing: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<DoorCall> {
        self.calls.lock().unwrap().clone()
    }

    fn outcome(&self) -> CommandOutcome {
        let succeeded = !*self.failing.lock().unwrap();
        CommandOutcome::new(succeeded, DoorSnapshot::default())
    }
}

#[async_trait]
impl DoorControl for FakeDoor {
    async fn open(&self, percent: i32) -> Result<CommandOutcome, ClientError> {
        self.calls.lock().unwrap().push(DoorCall::Open(percent));
        Ok(self.outcome())
    }

    async fn close(&self) -> Result<CommandOutcome, ClientError> {
        self.calls.lock().unwrap().push(DoorCall::Close);
        Ok(self.outcome())
    }
}
