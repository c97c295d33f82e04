mod common;

use coopdoor_api::ErrorKind;
use coopdoor_scheduler::engine::apply;
use coopdoor_scheduler::fire::{FireAction, FireOutcome, fire};

use common::{DoorCall, FakeDoor, Workspace, date, fixed_automation, utc};

fn applied(open_percent: u8) -> Workspace {
    let ws = Workspace::new(&fixed_automation("07:00", "19:00", open_percent));
    apply(
        &ws.installer(),
        &ws.store(),
        &ws.automation(),
        Some(date(2024, 6, 21)),
        utc(2024, 6, 21, 3, 30),
    )
    .unwrap();
    ws
}

#[tokio::test]
async fn test_open_fires_once_with_capped_percent() {
    let ws = applied(75);
    let door = FakeDoor::default();
    let day = date(2024, 6, 21);

    let outcome = fire(&door, &ws.store(), FireAction::Open, day, utc(2024, 6, 21, 7, 0))
        .await
        .unwrap();
    assert!(matches!(outcome, FireOutcome::Fired(ref o) if o.succeeded));
    assert_eq!(door.calls(), vec![DoorCall::Open(75)]);
    assert!(ws.store().load().unwrap().unwrap().open_fired);

    // a persistent timer catching up after a reboot must not open twice
    let again = fire(&door, &ws.store(), FireAction::Open, day, utc(2024, 6, 21, 7, 5))
        .await
        .unwrap();
    assert!(matches!(again, FireOutcome::Skipped(_)));
    assert_eq!(door.calls().len(), 1);
}

#[tokio::test]
async fn test_close_marks_only_close() {
    let ws = applied(0);
    let door = FakeDoor::default();

    fire(&door, &ws.store(), FireAction::Close, date(2024, 6, 21), utc(2024, 6, 21, 19, 0))
        .await
        .unwrap();

    let state = ws.store().load().unwrap().unwrap();
    assert!(state.close_fired);
    assert!(!state.open_fired);
    assert_eq!(door.calls(), vec![DoorCall::Close]);
}

#[tokio::test]
async fn test_trigger_for_another_day_is_skipped() {
    let ws = applied(75);
    let door = FakeDoor::default();

    let outcome = fire(&door, &ws.store(), FireAction::Close, date(2024, 6, 20), utc(2024, 6, 21, 19, 0))
        .await
        .unwrap();

    assert!(matches!(outcome, FireOutcome::Skipped(_)));
    assert!(door.calls().is_empty());
}

#[tokio::test]
async fn test_late_open_is_refused() {
    let ws = applied(75);
    let door = FakeDoor::default();

    let outcome = fire(&door, &ws.store(), FireAction::Open, date(2024, 6, 21), utc(2024, 6, 21, 19, 30))
        .await
        .unwrap();

    assert!(matches!(outcome, FireOutcome::Skipped(_)));
    assert!(door.calls().is_empty());
    assert!(!ws.store().load().unwrap().unwrap().open_fired);
}

#[tokio::test]
async fn test_safety_close_runs_without_schedule() {
    let ws = Workspace::new("{}");
    let door = FakeDoor::default();

    let outcome = fire(&door, &ws.store(), FireAction::SafetyClose, date(2024, 6, 21), utc(2024, 6, 21, 21, 0))
        .await
        .unwrap();

    assert!(matches!(outcome, FireOutcome::Fired(_)));
    assert_eq!(door.calls(), vec![DoorCall::Close]);
    assert!(ws.store().load().unwrap().is_none());
}

#[tokio::test]
async fn test_failed_command_is_not_marked() {
    let ws = applied(75);
    let door = FakeDoor::failing();

    let err = fire(&door, &ws.store(), FireAction::Open, date(2024, 6, 21), utc(2024, 6, 21, 7, 0))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    assert!(!ws.store().load().unwrap().unwrap().open_fired);
}

#[tokio::test]
async fn test_rolled_over_close_fires_after_next_apply() {
    let ws = Workspace::new(&fixed_automation("22:00", "04:00", 75));
    let first = date(2024, 6, 21);
    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(first), utc(2024, 6, 21, 3, 30)).unwrap();
    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(date(2024, 6, 22)), utc(2024, 6, 22, 3, 30)).unwrap();
    let door = FakeDoor::default();

    let outcome = fire(&door, &ws.store(), FireAction::Close, first, utc(2024, 6, 22, 4, 0))
        .await
        .unwrap();

    assert!(matches!(outcome, FireOutcome::Fired(_)));
    assert_eq!(door.calls(), vec![DoorCall::Close]);
    assert!(ws.store().load_day(first).unwrap().unwrap().close_fired);
    assert!(!ws.store().load().unwrap().unwrap().close_fired);

    let again = fire(&door, &ws.store(), FireAction::Close, first, utc(2024, 6, 22, 4, 1))
        .await
        .unwrap();
    assert!(matches!(again, FireOutcome::Skipped(_)));
    assert_eq!(door.calls().len(), 1);
}

#[tokio::test]
async fn test_reapply_keeps_fired_flags() {
    let ws = applied(75);
    let door = FakeDoor::default();
    let day = date(2024, 6, 21);

    fire(&door, &ws.store(), FireAction::Open, day, utc(2024, 6, 21, 7, 0))
        .await
        .unwrap();
    apply(&ws.installer(), &ws.store(), &ws.automation(), Some(day), utc(2024, 6, 21, 7, 30)).unwrap();

    let state = ws.store().load().unwrap().unwrap();
    assert!(state.open_fired);
    assert!(!state.open_armed);
    let again = fire(&door, &ws.store(), FireAction::Open, day, utc(2024, 6, 21, 7, 35))
        .await
        .unwrap();
    assert!(matches!(again, FireOutcome::Skipped(_)));
}
