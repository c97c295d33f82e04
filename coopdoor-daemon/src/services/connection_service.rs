//! Owns the controller link and executes door commands one at a time.
//!
//! The worker is the only task that touches the link. Commands arrive over a
//! bounded queue, state is published through a watch channel, and reconnects
//! follow an exponential backoff while the link is down.

use std::sync::Arc;
use std::time::Duration;

use coopdoor_api::pulse::{CLOSE_PAYLOAD, OPEN_PULSE_PAYLOAD, PulsePlan};
use coopdoor_api::{
    CommandOutcome, ConnectionState, DoorPosition, DoorSnapshot, EventAction, LastEvent,
};
use time::OffsetDateTime;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, sleep, sleep_until, timeout};

use crate::configs::{Device, Link, LinkMode, OpenCap};
use crate::errors::DeviceError;
use crate::services::backoff::Backoff;
use crate::services::command_channel::CommandChannel;
use crate::services::link::{DoorLink, LinkError};
use crate::services::state_cache::StateCache;

const WRITE_ATTEMPTS: u32 = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Percent already validated to 0..=100
    Open { percent: u8 },
    Close,
    Connect,
    Disconnect,
}

pub type CommandResult = Result<CommandOutcome, DeviceError>;

pub struct Envelope {
    pub command: DeviceCommand,
    pub reply: oneshot::Sender<CommandResult>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    homed: bool,
    pulses_sent: u32,
}

struct DriveFailure {
    progress: Progress,
    error: LinkError,
}

pub struct ConnectionService<L> {
    link: L,
    device: Device,
    policy: Link,
    cap: OpenCap,
    cache: Option<StateCache>,
    state: ConnectionState,
    backoff: Backoff,
    retry_at: Option<Instant>,
    last_failure: Option<LinkError>,
    position: Option<DoorPosition>,
    last_event: Option<LastEvent>,
    busy: bool,
    op: Option<EventAction>,
    eta: Option<OffsetDateTime>,
    snapshot_tx: watch::Sender<DoorSnapshot>,
    cancel: Arc<Notify>,
}

impl<L: DoorLink + 'static> ConnectionService<L> {
    pub fn new(link: L, device: Device, policy: Link, cap: OpenCap) -> Self {
        let (snapshot_tx, _) = watch::channel(DoorSnapshot::default());
        let backoff = Backoff::from_policy(&policy);

        Self {
            link,
            device,
            policy,
            cap,
            cache: None,
            state: ConnectionState::Idle,
            backoff,
            retry_at: None,
            last_failure: None,
            position: None,
            last_event: None,
            busy: false,
            op: None,
            eta: None,
            snapshot_tx,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// Restores the cached position and last event, and persists future ones.
    pub async fn with_cache(mut self, cache: StateCache) -> Self {
        self.position = cache.load_position().await;
        self.last_event = cache.load_last_event().await;
        if let Some(position) = &self.position {
            tracing::info!(percent = position.percent, "restored cached door position");
        }
        self.cache = Some(cache);
        self.publish();
        self
    }

    /// Starts the worker. It runs until every channel handle is dropped.
    pub fn spawn(self, queue_depth: usize) -> (CommandChannel, JoinHandle<()>) {
        let (requests_tx, requests_rx) = mpsc::channel(queue_depth.max(1));
        let channel = CommandChannel::new(
            requests_tx,
            self.snapshot_tx.subscribe(),
            self.cancel.clone(),
        );
        let handle = tokio::spawn(self.run(requests_rx));

        (channel, handle)
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Envelope>) {
        tracing::info!(
            mac = %self.device.mac,
            mode = ?self.policy.mode,
            "connection worker started"
        );
        self.publish();

        if self.policy.mode == LinkMode::Persistent {
            self.attempt_connect().await;
        }

        let mut health = tokio::time::interval(self.policy.health_check());
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                envelope = requests.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.attempt_connect().await;
                },
                _ = health.tick(), if self.state.is_connected() => {
                    self.check_health().await;
                },
            }
        }

        self.drop_link().await;
        self.retry_at = None;
        self.set_state(ConnectionState::Idle);
        tracing::info!("connection worker stopped");
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { command, reply } = envelope;
        tracing::debug!(?command, "executing command");

        let motion = match command {
            DeviceCommand::Open { percent } => {
                let plan = PulsePlan::open(
                    percent,
                    self.cap.current().await,
                    self.device.base_pulses,
                    self.device.pulse_interval(),
                    self.device.home_before_open,
                );
                Some((EventAction::Open, Some(percent), plan))
            }
            DeviceCommand::Close => Some((EventAction::Close, None, PulsePlan::close())),
            DeviceCommand::Connect | DeviceCommand::Disconnect => None,
        };

        self.busy = true;
        if let Some((action, _, plan)) = &motion {
            self.op = Some(*action);
            self.eta = Some(OffsetDateTime::now_utc() + self.expected_duration(plan));
        }
        self.publish();

        let result = match motion {
            Some((action, requested, plan)) => self.run_motion(action, requested, plan).await,
            None if command == DeviceCommand::Connect => self.connect().await,
            None => self.disconnect().await,
        };

        if let Err(e) = &result {
            tracing::warn!(?command, error = %e, "command failed");
        }
        if reply.send(result).is_err() {
            tracing::debug!(?command, "caller left before the outcome was ready");
        }

        if self.op.is_some() {
            sleep(self.device.min_pause()).await;
            if self.policy.mode == LinkMode::OnDemand {
                self.release().await;
            }
        }

        self.busy = false;
        self.op = None;
        self.eta = None;
        self.publish();
    }

    /// Time from the first write until the worker takes the next command.
    fn expected_duration(&self, plan: &PulsePlan) -> Duration {
        let homing = if plan.home_first {
            self.device.min_pause()
        } else {
            Duration::ZERO
        };
        plan.pulse_span() + homing + self.device.min_pause()
    }

    async fn run_motion(
        &mut self,
        action: EventAction,
        requested: Option<u8>,
        plan: PulsePlan,
    ) -> Result<CommandOutcome, DeviceError> {
        if let Err(e) = self.ensure_connected().await {
            self.record(action, requested, Some(plan.percent), false, e.to_string());
            self.persist().await;
            return Err(e);
        }

        let base_pulses = self.device.base_pulses;

        let succeeded = match self.drive(&plan).await {
            Ok(()) => {
                self.position = Some(DoorPosition::at_percent(
                    plan.percent,
                    base_pulses,
                    OffsetDateTime::now_utc(),
                ));
                let detail = if plan.is_close() {
                    "door closed".to_string()
                } else {
                    format!("opened to {}% with {} pulses", plan.percent, plan.pulses)
                };
                tracing::info!(
                    action = ?action,
                    percent = plan.percent,
                    pulses = plan.pulses,
                    "door command completed"
                );
                self.record(action, requested, Some(plan.percent), true, detail);
                true
            }
            Err(DriveFailure { progress, error }) => {
                if progress.homed || progress.pulses_sent > 0 {
                    self.position = Some(DoorPosition::after_pulses(
                        progress.pulses_sent,
                        base_pulses,
                        OffsetDateTime::now_utc(),
                    ));
                }
                let detail = format!(
                    "link lost after {} of {} pulses: {error}",
                    progress.pulses_sent, plan.pulses
                );
                tracing::warn!(action = ?action, %detail, "door command interrupted");
                self.record(action, requested, Some(plan.percent), false, detail);
                self.on_link_lost(&error).await;
                false
            }
        };

        self.persist().await;
        Ok(CommandOutcome::new(succeeded, self.snapshot()))
    }

    async fn drive(&mut self, plan: &PulsePlan) -> Result<(), DriveFailure> {
        let mut progress = Progress::default();

        if plan.is_close() || plan.home_first {
            self.write_with_retry(&CLOSE_PAYLOAD)
                .await
                .map_err(|error| DriveFailure { progress, error })?;
            progress.homed = true;
            if plan.is_close() {
                return Ok(());
            }
            sleep(self.device.min_pause()).await;
        }

        for index in 0..plan.pulses {
            self.write_with_retry(&OPEN_PULSE_PAYLOAD)
                .await
                .map_err(|error| DriveFailure { progress, error })?;
            progress.pulses_sent += 1;
            tracing::debug!(pulse = index + 1, total = plan.pulses, "open pulse sent");

            if index + 1 < plan.pulses {
                sleep(plan.interval).await;
            }
        }

        Ok(())
    }

    async fn write_with_retry(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let mut attempt = 1;
        loop {
            let result = match timeout(self.device.connect_timeout(), self.link.write(payload)).await {
                Ok(result) => result,
                Err(_) => Err(LinkError::Timeout),
            };
            match result {
                Ok(()) => return Ok(()),
                // a controller that stopped answering is treated as gone
                Err(LinkError::Timeout) => return Err(LinkError::Timeout),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "gatt write failed, retrying");
                    attempt += 1;
                    sleep(WRITE_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn connect(&mut self) -> Result<CommandOutcome, DeviceError> {
        let result = self.ensure_connected().await;
        let detail = match &result {
            Ok(()) => "link established".to_string(),
            Err(e) => e.to_string(),
        };
        self.record(EventAction::Connect, None, None, result.is_ok(), detail);
        self.persist().await;

        result.map(|()| CommandOutcome::new(true, self.snapshot()))
    }

    async fn disconnect(&mut self) -> Result<CommandOutcome, DeviceError> {
        self.release().await;
        self.backoff.reset();
        self.last_failure = None;
        self.record(EventAction::Disconnect, None, None, true, "link released".into());
        self.persist().await;

        Ok(CommandOutcome::new(true, self.snapshot()))
    }

    /// Drops the link and any pending reconnect. A failed link stays failed.
    async fn release(&mut self) {
        self.retry_at = None;
        self.drop_link().await;
        if !matches!(self.state, ConnectionState::Failed { .. }) {
            self.set_state(ConnectionState::Idle);
        }
    }

    /// Waits for a usable link, bounded by the configured wait.
    ///
    /// An idle link is connected right away. While reconnecting, the scheduled
    /// attempts are awaited; if the next one lies beyond the wait window the
    /// command fails at once instead of stalling the queue.
    async fn ensure_connected(&mut self) -> Result<(), DeviceError> {
        let deadline = Instant::now() + self.policy.wait_for_connection();

        if self.state == ConnectionState::Idle {
            self.attempt_connect().await;
        }

        loop {
            match &self.state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed { reason } => {
                    return Err(DeviceError::Unavailable(reason.clone()));
                }
                _ => {}
            }

            let Some(retry_at) = self.retry_at else {
                return Err(self.unavailable());
            };
            if retry_at > deadline {
                return Err(self.unavailable());
            }

            tokio::select! {
                _ = sleep_until(retry_at) => {}
                _ = self.cancel.notified() => {
                    return Err(DeviceError::Unavailable("disconnect requested while waiting for the link".into()));
                }
            }

            self.retry_at = None;
            self.attempt_connect().await;
        }
    }

    fn unavailable(&self) -> DeviceError {
        match &self.last_failure {
            Some(LinkError::Timeout) => DeviceError::ConnectTimeout(self.device.connect_timeout()),
            Some(e) => DeviceError::Unavailable(e.to_string()),
            None => DeviceError::Unavailable(format!("link is {}", self.state.name())),
        }
    }

    async fn attempt_connect(&mut self) {
        self.set_state(ConnectionState::Scanning);

        let result = match timeout(self.device.connect_timeout(), self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        };

        match result {
            Ok(()) => {
                self.backoff.reset();
                self.last_failure = None;
                self.retry_at = None;
                self.set_state(ConnectionState::Connected);
                tracing::info!(mac = %self.device.mac, "controller connected");
            }
            Err(error) => {
                self.drop_link().await;
                if error.is_retryable() {
                    self.schedule_retry(&error);
                } else {
                    tracing::error!(mac = %self.device.mac, error = %error, "link failed permanently");
                    self.retry_at = None;
                    self.set_state(ConnectionState::Failed {
                        reason: error.to_string(),
                    });
                }
                self.last_failure = Some(error);
            }
        }
    }

    async fn establish(&mut self) -> Result<(), LinkError> {
        self.link.discover(self.device.connect_timeout()).await?;
        self.set_state(ConnectionState::Connecting);
        self.link.connect().await
    }

    fn schedule_retry(&mut self, error: &LinkError) {
        let (attempt, delay) = self.backoff.next_delay();
        self.retry_at = Some(Instant::now() + delay);
        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "controller unreachable, reconnect scheduled"
        );
        self.set_state(ConnectionState::Reconnecting {
            attempt,
            next_delay_ms: delay.as_millis() as u64,
        });
    }

    async fn on_link_lost(&mut self, error: &LinkError) {
        self.drop_link().await;
        self.last_failure = Some(error.clone());
        self.schedule_retry(error);
    }

    async fn drop_link(&mut self) {
        if timeout(self.device.connect_timeout(), self.link.disconnect())
            .await
            .is_err()
        {
            tracing::warn!(mac = %self.device.mac, "controller did not acknowledge the disconnect");
        }
    }

    async fn check_health(&mut self) {
        let alive = timeout(self.device.connect_timeout(), self.link.is_connected())
            .await
            .unwrap_or(false);
        if !alive {
            tracing::warn!(mac = %self.device.mac, "controller dropped the link");
            self.on_link_lost(&LinkError::Io("unexpected disconnect".into())).await;
        }
    }

    fn record(
        &mut self,
        action: EventAction,
        requested_percent: Option<u8>,
        effective_percent: Option<u8>,
        succeeded: bool,
        detail: String,
    ) {
        self.last_event = Some(LastEvent {
            action,
            requested_percent,
            effective_percent,
            succeeded,
            timestamp: OffsetDateTime::now_utc(),
            detail,
        });
        self.publish();
    }

    async fn persist(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache
            .store(self.position.as_ref(), self.last_event.as_ref())
            .await
        {
            tracing::warn!(error = %e, "failed to persist door state");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = self.state.name(), to = state.name(), "connection state changed");
            self.state = state;
            self.publish();
        }
    }

    fn snapshot(&self) -> DoorSnapshot {
        DoorSnapshot {
            connection: self.state.clone(),
            position: self.position.clone(),
            last_event: self.last_event.clone(),
            busy: self.busy,
            op: self.op,
            eta: self.eta,
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
