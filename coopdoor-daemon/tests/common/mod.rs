#![allow(dead_code)]

use std::time::Duration;

use coopdoor_api::{ConnectionState, DoorSnapshot};
use coopdoor_daemon::configs::{Device, Link, LinkMode, OpenCap, Transport};
use coopdoor_daemon::services::link::SimulatedLink;
use coopdoor_daemon::services::{CommandChannel, ConnectionService};
use tokio::task::JoinHandle;

pub fn device() -> Device {
    Device {
        mac: "00:80:E1:22:EE:F2".into(),
        adapter: "hci0".into(),
        transport: Transport::Simulated,
        connect_timeout_secs: 5,
        base_pulses: 14,
        pulse_interval_secs: 2.0,
        home_before_open: false,
        min_pause_after_action_secs: 1.0,
    }
}

pub fn fast_device() -> Device {
    Device {
        pulse_interval_secs: 0.0,
        min_pause_after_action_secs: 0.0,
        ..device()
    }
}

pub fn policy(mode: LinkMode) -> Link {
    Link {
        mode,
        base_delay_ms: 1000,
        multiplier: 2.0,
        max_delay_ms: 8000,
        health_check_ms: 500,
        wait_for_connection_secs: 30,
    }
}

pub struct Harness {
    pub channel: CommandChannel,
    pub link: SimulatedLink,
    pub worker: JoinHandle<()>,
}

pub fn start(link: SimulatedLink, device: Device, policy: Link, cap: OpenCap) -> Harness {
    start_with_depth(link, device, policy, cap, 4)
}

pub fn start_with_depth(
    link: SimulatedLink,
    device: Device,
    policy: Link,
    cap: OpenCap,
    queue_depth: usize,
) -> Harness {
    let service = ConnectionService::new(link.clone(), device, policy, cap);
    let (channel, worker) = service.spawn(queue_depth);

    Harness {
        channel,
        link,
        worker,
    }
}

/// Waits until the published snapshot satisfies `predicate`.
pub async fn wait_for<F>(channel: &CommandChannel, predicate: F) -> DoorSnapshot
where
    F: Fn(&DoorSnapshot) -> bool,
{
    let mut rx = channel.subscribe();
    let waited = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            rx.changed().await.expect("worker dropped the snapshot channel");
        }
    })
    .await;

    waited.expect("snapshot condition not reached")
}

pub async fn wait_connected(channel: &CommandChannel) -> DoorSnapshot {
    wait_for(channel, |s| s.connection == ConnectionState::Connected).await
}
