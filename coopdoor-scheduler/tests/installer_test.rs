mod common;

use chrono::{TimeDelta, Utc};
use coopdoor_api::ErrorKind;
use coopdoor_scheduler::configs::ModeKind;
use coopdoor_scheduler::engine::apply;
use coopdoor_scheduler::installer::UnitChange;
use coopdoor_scheduler::resolver::solar::sun_events;

use common::{Workspace, date, fixed_automation, utc};

const RECURRING_UNITS: [&str; 4] = [
    "coopdoor-apply.service",
    "coopdoor-apply.timer",
    "coopdoor-safety-close.service",
    "coopdoor-safety-close.timer",
];

#[test]
fn test_fixed_schedule_installs_both_triggers() {
    let ws = Workspace::new(&fixed_automation("07:00", "20:30", 75));
    let report = apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 3, 30),
    )
    .unwrap();

    assert_eq!(report.installed.open, UnitChange::Armed);
    assert_eq!(report.installed.close, UnitChange::Armed);

    let open_timer = ws.unit("coopdoor-open-2024-06-21.timer").unwrap();
    assert!(open_timer.contains("OnCalendar=2024-06-21 07:00:00 UTC\n"));
    assert!(open_timer.contains("Unit=coopdoor-open-2024-06-21.service\n"));
    let close_timer = ws.unit("coopdoor-close-2024-06-21.timer").unwrap();
    assert!(close_timer.contains("OnCalendar=2024-06-21 20:30:00 UTC\n"));

    let open_service = ws.unit("coopdoor-open-2024-06-21.service").unwrap();
    assert!(open_service.contains("After=coopd.service\n"));
    assert!(open_service.contains("User=coop\n"));
    assert!(open_service.contains("Environment=COOPDOOR_CONFIG_DIR=/etc/coopdoor\n"));
    assert!(open_service.contains(&format!("ExecStart={} fire open --date 2024-06-21\n", common::BIN)));

    let safety_timer = ws.unit("coopdoor-safety-close.timer").unwrap();
    assert!(safety_timer.contains("OnCalendar=*-*-* 21:00:00\n"));
    let safety_service = ws.unit("coopdoor-safety-close.service").unwrap();
    assert!(safety_service.contains(&format!("ExecStart={} fire safety-close\n", common::BIN)));
    let apply_timer = ws.unit("coopdoor-apply.timer").unwrap();
    assert!(apply_timer.contains("OnCalendar=*-*-* 03:30:00\n"));
    let apply_service = ws.unit("coopdoor-apply.service").unwrap();
    assert!(!apply_service.contains("After="));
    assert!(!apply_service.contains("User="));

    let state = ws.store().load().unwrap().unwrap();
    assert_eq!(state.date, date(2024, 6, 21));
    assert_eq!(state.mode, ModeKind::Fixed);
    assert_eq!(state.open_percent, 75);
    assert!(state.open_armed && state.close_armed);
    assert!(!state.open_fired && !state.close_fired);

    let calls = ws.systemctl.calls();
    assert!(calls.contains(&"restart coopdoor-open-2024-06-21.timer".to_string()));
    assert!(calls.contains(&"restart coopdoor-close-2024-06-21.timer".to_string()));
}

#[test]
fn test_reapply_same_day_is_idempotent() {
    let ws = Workspace::new(&fixed_automation("07:00", "20:30", 75));
    let day = Some(date(2024, 6, 21));
    let now = utc(2024, 6, 21, 3, 30);

    apply(&ws.installer(), &ws.store(), &ws.automation(), day, now).unwrap();
    let safety_before = ws.unit("coopdoor-safety-close.timer").unwrap();
    ws.systemctl.clear();

    let report = apply(&ws.installer(), &ws.store(), &ws.automation(), day, now).unwrap();

    assert_eq!(report.recurring.safety_close, UnitChange::Unchanged);
    assert_eq!(report.recurring.daily_apply, UnitChange::Unchanged);
    assert_eq!(ws.unit("coopdoor-safety-close.timer").unwrap(), safety_before);

    // one open and one close pair, no leftovers from staging
    assert_eq!(
        ws.unit_files(),
        vec![
            "coopdoor-apply.service",
            "coopdoor-apply.timer",
            "coopdoor-close-2024-06-21.service",
            "coopdoor-close-2024-06-21.timer",
            "coopdoor-open-2024-06-21.service",
            "coopdoor-open-2024-06-21.timer",
            "coopdoor-safety-close.service",
            "coopdoor-safety-close.timer",
        ]
    );

    let calls = ws.systemctl.calls();
    assert!(calls.contains(&"enable --now coopdoor-safety-close.timer".to_string()));
    assert!(!calls.contains(&"restart coopdoor-safety-close.timer".to_string()));
}

#[test]
fn test_close_before_open_rolls_to_next_day() {
    let ws = Workspace::new(&fixed_automation("22:00", "02:00", 0));
    let report = apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 3, 30),
    )
    .unwrap();

    assert!(ws.unit("coopdoor-open-2024-06-21.timer").unwrap().contains("OnCalendar=2024-06-21 22:00:00 UTC\n"));
    assert!(ws.unit("coopdoor-close-2024-06-21.timer").unwrap().contains("OnCalendar=2024-06-22 02:00:00 UTC\n"));
    assert_eq!(report.state.open_percent, 100);
    assert!(report.state.resolved_close_at > report.state.resolved_open_at);
}

#[test]
fn test_solar_close_offset_is_exact() {
    let ws = Workspace::new(
        r#"{
            "mode": "solar",
            "solar": {"sunrise_offset_min": 0, "sunset_offset_min": -30},
            "location": {"lat": 40.7128, "lon": -74.0060},
            "timezone": "America/New_York",
            "open_percent": 75
        }"#,
    );
    let day = date(2024, 6, 21);
    let report = apply(&ws.installer(), &ws.store(), &ws.automation(), Some(day), utc(2024, 6, 21, 7, 30)).unwrap();

    let sun = sun_events(day, 40.7128, -74.0060, &chrono_tz::America::New_York).unwrap();
    let expected_close = sun.sunset - TimeDelta::minutes(30);
    assert_eq!(report.state.mode, ModeKind::Solar);
    assert_eq!(report.state.resolved_close_at, expected_close.fixed_offset());
    assert_eq!(report.state.resolved_open_at, sun.sunrise.fixed_offset());

    let on_calendar = expected_close.with_timezone(&Utc).format("OnCalendar=%Y-%m-%d %H:%M:%S UTC\n").to_string();
    assert!(ws.unit("coopdoor-close-2024-06-21.timer").unwrap().contains(&on_calendar));
}

#[test]
fn test_polar_day_installs_only_recurring_triggers() {
    let ws = Workspace::new(
        r#"{"mode":"solar","location":{"lat":78.22,"lon":15.65},"timezone":"Arctic/Longyearbyen"}"#,
    );
    let err = apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 1, 30),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnresolvableSchedule);
    assert!(err.to_string().contains("78.22"));
    assert_eq!(ws.unit_files(), RECURRING_UNITS);
    assert!(ws.store().load().unwrap().is_none());
}

#[test]
fn test_inconsistent_config_keeps_safety_close() {
    let ws = Workspace::new(
        r#"{"fixed":{"open":"07:00","close":"19:00"},"location":{"lat":40.7,"lon":-74.0},"timezone":"UTC"}"#,
    );
    let err = apply(&ws.installer(), &ws.store(), &ws.automation(), None, utc(2024, 6, 21, 3, 30)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigInconsistent);
    assert_eq!(ws.unit_files(), RECURRING_UNITS);
}

#[test]
fn test_activation_failure_rolls_back_the_pair() {
    let ws = Workspace::new(&fixed_automation("07:00", "20:30", 75));
    ws.systemctl.fail_on("restart coopdoor-close-2024-06-21.timer");

    let err = apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 3, 30),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TriggerInstallFailed);
    assert_eq!(ws.unit_files(), RECURRING_UNITS);
    assert!(ws.store().load().unwrap().is_none());

    // the open timer had already been started and must not stay loaded
    let calls = ws.systemctl.calls();
    let restarted = calls
        .iter()
        .position(|c| c == "restart coopdoor-open-2024-06-21.timer")
        .unwrap();
    let disabled = calls
        .iter()
        .position(|c| c == "disable --now coopdoor-open-2024-06-21.timer")
        .unwrap();
    assert!(disabled > restarted);
    assert_eq!(calls.last().map(String::as_str), Some("daemon-reload"));
}

#[test]
fn test_unwritable_unit_dir_is_reported() {
    let ws = Workspace::new(&fixed_automation("07:00", "20:30", 75));
    std::fs::remove_dir(ws.unit_dir()).unwrap();

    let err = apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 3, 30),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TriggerInstallFailed);
    assert!(err.to_string().contains("coopdoor-open-2024-06-21.timer"));
    assert!(ws.store().load().unwrap().is_none());
}

#[test]
fn test_elapsed_open_is_not_armed() {
    let ws = Workspace::new(&fixed_automation("07:00", "20:30", 75));
    let day = Some(date(2024, 6, 21));

    apply(&ws.installer(), &ws.store(), &ws.automation(), day, utc(2024, 6, 21, 3, 30)).unwrap();
    assert!(ws.unit("coopdoor-open-2024-06-21.timer").is_some());
    ws.systemctl.clear();

    let report = apply(&ws.installer(), &ws.store(), &ws.automation(), day, utc(2024, 6, 21, 12, 0)).unwrap();

    assert_eq!(report.installed.open, UnitChange::Elapsed);
    assert_eq!(report.installed.close, UnitChange::Armed);
    assert!(ws.unit("coopdoor-open-2024-06-21.timer").is_none());
    assert!(ws.unit("coopdoor-open-2024-06-21.service").is_none());
    assert!(ws.unit("coopdoor-close-2024-06-21.timer").is_some());
    assert!(ws.systemctl.calls().contains(&"disable --now coopdoor-open-2024-06-21.timer".to_string()));

    let state = ws.store().load().unwrap().unwrap();
    assert!(!state.open_armed);
    assert!(state.close_armed);
}

#[test]
fn test_pending_close_survives_next_day_apply() {
    let ws = Workspace::new(&fixed_automation("22:00", "04:00", 75));

    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(date(2024, 6, 21)), utc(2024, 6, 21, 3, 30)).unwrap();
    assert!(ws.unit("coopdoor-close-2024-06-21.timer").unwrap().contains("OnCalendar=2024-06-22 04:00:00 UTC\n"));
    ws.systemctl.clear();

    // the next daily apply runs before the first night's close is due
    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(date(2024, 6, 22)), utc(2024, 6, 22, 3, 30)).unwrap();

    assert_eq!(
        ws.unit_files(),
        vec![
            "coopdoor-apply.service",
            "coopdoor-apply.timer",
            "coopdoor-close-2024-06-21.service",
            "coopdoor-close-2024-06-21.timer",
            "coopdoor-close-2024-06-22.service",
            "coopdoor-close-2024-06-22.timer",
            "coopdoor-open-2024-06-22.service",
            "coopdoor-open-2024-06-22.timer",
            "coopdoor-safety-close.service",
            "coopdoor-safety-close.timer",
        ]
    );
    let calls = ws.systemctl.calls();
    assert!(calls.contains(&"disable --now coopdoor-open-2024-06-21.timer".to_string()));
    assert!(!calls.contains(&"disable --now coopdoor-close-2024-06-21.timer".to_string()));

    let carried = ws.store().load_day(date(2024, 6, 21)).unwrap().unwrap();
    assert!(carried.close_armed && !carried.close_fired);
    assert_eq!(ws.store().load().unwrap().unwrap().date, date(2024, 6, 22));

    // a day later that close is behind us and gets pruned
    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(date(2024, 6, 23)), utc(2024, 6, 23, 3, 30)).unwrap();
    assert!(ws.unit("coopdoor-close-2024-06-21.timer").is_none());
    assert!(ws.unit("coopdoor-close-2024-06-21.service").is_none());
    assert!(ws.unit("coopdoor-close-2024-06-22.timer").is_some());
    assert!(ws.unit("coopdoor-open-2024-06-22.timer").is_none());
    assert_eq!(ws.store().load_day(date(2024, 6, 21)).unwrap(), None);
}
