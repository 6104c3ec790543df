use crate::application::history::HistoryBuffer;
use crate::domain::classification::{
    classify_install_response, classify_sync_response, Classification, InstallOutcome,
};
use crate::domain::models::{
    CacheRecord, ControllerConfig, ErrorCode, HistoryEntry, RecoveryReason, SyncResult, SyncState,
    MAX_CONTROLLER_DELAY_SECONDS,
};
use crate::infrastructure::command_gateway::{CommandGateway, SyncRecord};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::result_cache::ResultCacheRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Countdown,
    Manual,
    ServerChange,
    Recovery,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Countdown => "countdown",
            Self::Manual => "manual",
            Self::ServerChange => "server_change",
            Self::Recovery => "recovery",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    /// A follow-up attempt will start once the outstanding one completes.
    Deferred,
    Ignored,
}

enum ControllerCommand {
    SyncNow {
        reply: oneshot::Sender<TriggerOutcome>,
    },
    ChangeServer {
        server: String,
        reply: oneshot::Sender<Result<TriggerOutcome, InfraError>>,
    },
    InstallHelper {
        reply: oneshot::Sender<TriggerOutcome>,
    },
    CurrentServer {
        reply: oneshot::Sender<String>,
    },
    History {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    ClearHistory {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

enum GatewayEvent {
    SyncCompleted {
        attempt: u64,
        server: String,
        response: Result<String, InfraError>,
    },
    InstallCompleted {
        attempt: u64,
        response: Result<String, InfraError>,
    },
}

#[derive(Clone)]
pub struct SyncControllerHandle {
    commands: mpsc::UnboundedSender<ControllerCommand>,
    state: watch::Receiver<SyncState>,
}

impl SyncControllerHandle {
    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    pub async fn sync_now(&self) -> Result<TriggerOutcome, InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::SyncNow { reply })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)
    }

    pub async fn change_server(&self, server: &str) -> Result<TriggerOutcome, InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::ChangeServer {
            server: server.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)?
    }

    pub async fn install_helper(&self) -> Result<TriggerOutcome, InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::InstallHelper { reply })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)
    }

    pub async fn server(&self) -> Result<String, InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::CurrentServer { reply })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)
    }

    pub async fn history(&self) -> Result<Vec<HistoryEntry>, InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::History { reply })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)
    }

    pub async fn clear_history(&self) -> Result<(), InfraError> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::ClearHistory { reply })?;
        rx.await.map_err(|_| InfraError::ControllerStopped)
    }

    /// Stops the actor. Results of calls still outstanding are discarded.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ControllerCommand::Shutdown);
    }

    fn send(&self, command: ControllerCommand) -> Result<(), InfraError> {
        self.commands
            .send(command)
            .map_err(|_| InfraError::ControllerStopped)
    }
}

pub struct SyncController<G, C>
where
    G: CommandGateway + ?Sized + 'static,
    C: ResultCacheRepository + ?Sized + 'static,
{
    config: ControllerConfig,
    gateway: Arc<G>,
    cache: Arc<C>,
    now_provider: NowProvider,
}

impl<G, C> SyncController<G, C>
where
    G: CommandGateway + ?Sized + 'static,
    C: ResultCacheRepository + ?Sized + 'static,
{
    pub fn new(config: ControllerConfig, gateway: Arc<G>, cache: Arc<C>) -> Self {
        Self {
            config,
            gateway,
            cache,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    /// Runs the start-up protocol and spawns the actor. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(self) -> SyncControllerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cache_writes_tx, cache_writes_rx) = mpsc::unbounded_channel();
        let initial = SyncState::Querying { last_result: None };
        let (state_tx, state_rx) = watch::channel(initial);

        let mut actor = ControllerActor {
            server: self.config.server.trim().to_string(),
            history: HistoryBuffer::with_capacity(self.config.history_capacity),
            seconds_until_next_sync: self.config.sync_interval_seconds(),
            config: self.config,
            gateway: self.gateway,
            cache: Arc::clone(&self.cache),
            now_provider: self.now_provider,
            state_tx,
            events_tx,
            cache_writes: cache_writes_tx,
            mode: Mode::Idle,
            last_result: None,
            last_failure: None,
            next_attempt: 0,
            sync_in_flight: None,
            install_in_flight: None,
            resync_pending: false,
            settle_deadline: None,
            last_captured_at_ms: None,
            ticker_reset: false,
        };
        actor.start();
        tokio::spawn(write_cache(self.cache, cache_writes_rx));
        tokio::spawn(actor.run(commands_rx, events_rx));

        SyncControllerHandle {
            commands: commands_tx,
            state: state_rx,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Mode {
    Idle,
    Querying,
    PermissionWarning,
    Recovery {
        reason: RecoveryReason,
        error: Option<String>,
    },
}

struct ControllerActor<G, C>
where
    G: CommandGateway + ?Sized + 'static,
    C: ResultCacheRepository + ?Sized + 'static,
{
    config: ControllerConfig,
    server: String,
    gateway: Arc<G>,
    cache: Arc<C>,
    now_provider: NowProvider,
    history: HistoryBuffer,
    state_tx: watch::Sender<SyncState>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    cache_writes: mpsc::UnboundedSender<CacheRecord>,
    mode: Mode,
    last_result: Option<SyncResult>,
    last_failure: Option<String>,
    seconds_until_next_sync: u64,
    next_attempt: u64,
    sync_in_flight: Option<u64>,
    install_in_flight: Option<u64>,
    resync_pending: bool,
    settle_deadline: Option<Instant>,
    last_captured_at_ms: Option<i64>,
    ticker_reset: bool,
}

impl<G, C> ControllerActor<G, C>
where
    G: CommandGateway + ?Sized + 'static,
    C: ResultCacheRepository + ?Sized + 'static,
{
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ControllerCommand>,
        mut events: mpsc::UnboundedReceiver<GatewayEvent>,
    ) {
        let period = Duration::from_secs(1);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let settle = self.settle_deadline;
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(ControllerCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
                _ = ticker.tick() => self.on_tick(),
                _ = sleep_until(settle.unwrap_or_else(Instant::now)), if settle.is_some() => {
                    self.on_settle_elapsed();
                }
            }
            if std::mem::take(&mut self.ticker_reset) {
                ticker.reset();
            }
        }

        info!(server = %self.server, "sync controller stopped");
    }

    fn start(&mut self) {
        let now_ms = (self.now_provider)().timestamp_millis();
        let interval_seconds = self.config.sync_interval_seconds();
        let interval_ms = i64::try_from(interval_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);

        let captured_at_ms = match self.cache.load_captured_at() {
            Ok(value) => value,
            Err(error) => {
                warn!(error = %error, "failed to read cached sync time; ignoring cache");
                None
            }
        };
        let Some(captured_at_ms) = captured_at_ms else {
            self.start_attempt(Trigger::Startup);
            return;
        };
        self.last_captured_at_ms = Some(captured_at_ms);

        let elapsed_ms = now_ms.saturating_sub(captured_at_ms).max(0);
        if elapsed_ms >= interval_ms {
            debug!(elapsed_ms, "cached sync result is stale");
            self.start_attempt(Trigger::Startup);
            return;
        }

        let record = match self.cache.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.start_attempt(Trigger::Startup);
                return;
            }
            Err(error) => {
                warn!(error = %error, "failed to read cached sync result; ignoring cache");
                self.start_attempt(Trigger::Startup);
                return;
            }
        };

        let elapsed_seconds = u64::try_from(elapsed_ms / 1000).unwrap_or(0);
        self.seconds_until_next_sync = interval_seconds.saturating_sub(elapsed_seconds);
        self.mode = if self.config.permission_warning
            && record.result.error_code == Some(ErrorCode::PermissionDenied)
        {
            Mode::PermissionWarning
        } else {
            Mode::Idle
        };
        info!(
            server = %record.result.server,
            seconds_until_next_sync = self.seconds_until_next_sync,
            "adopted cached sync result"
        );
        self.last_result = Some(record.result);
        self.publish();
    }

    fn handle_command(&mut self, command: ControllerCommand) {
        match command {
            ControllerCommand::SyncNow { reply } => {
                let outcome = self.request_attempt(Trigger::Manual);
                let _ = reply.send(outcome);
            }
            ControllerCommand::ChangeServer { server, reply } => {
                let _ = reply.send(self.change_server(server));
            }
            ControllerCommand::InstallHelper { reply } => {
                let _ = reply.send(self.request_install());
            }
            ControllerCommand::CurrentServer { reply } => {
                let _ = reply.send(self.server.clone());
            }
            ControllerCommand::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
            ControllerCommand::ClearHistory { reply } => {
                self.history.clear();
                info!("sync history cleared");
                let _ = reply.send(());
            }
            ControllerCommand::Shutdown => {}
        }
    }

    fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::SyncCompleted {
                attempt,
                server,
                response,
            } => self.on_sync_completed(attempt, server, response),
            GatewayEvent::InstallCompleted { attempt, response } => {
                self.on_install_completed(attempt, response)
            }
        }
    }

    fn countdown_running(&self) -> bool {
        matches!(self.mode, Mode::Idle | Mode::PermissionWarning)
            && self.sync_in_flight.is_none()
            && self.settle_deadline.is_none()
    }

    fn on_tick(&mut self) {
        if !self.countdown_running() {
            return;
        }
        self.seconds_until_next_sync = self.seconds_until_next_sync.saturating_sub(1);
        if self.seconds_until_next_sync == 0 {
            self.start_attempt(Trigger::Countdown);
        } else {
            self.publish();
        }
    }

    fn on_settle_elapsed(&mut self) {
        self.settle_deadline = None;
        self.start_attempt(Trigger::Recovery);
    }

    fn request_attempt(&mut self, trigger: Trigger) -> TriggerOutcome {
        if self.install_in_flight.is_some() {
            debug!(trigger = trigger.as_str(), "helper installation outstanding; trigger ignored");
            return TriggerOutcome::Ignored;
        }
        self.start_attempt(trigger)
    }

    fn change_server(&mut self, server: String) -> Result<TriggerOutcome, InfraError> {
        let server = server.trim();
        if server.is_empty() {
            return Err(InfraError::InvalidConfig("server must not be empty".to_string()));
        }
        info!(from = %self.server, to = %server, "target server changed");
        self.server = server.to_string();

        if self.install_in_flight.is_some() {
            return Ok(TriggerOutcome::Ignored);
        }
        if self.sync_in_flight.is_some() {
            self.resync_pending = true;
            return Ok(TriggerOutcome::Deferred);
        }
        Ok(self.start_attempt(Trigger::ServerChange))
    }

    fn start_attempt(&mut self, trigger: Trigger) -> TriggerOutcome {
        if let Some(attempt) = self.sync_in_flight {
            debug!(attempt, trigger = trigger.as_str(), "sync attempt in flight; trigger ignored");
            return TriggerOutcome::Ignored;
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.sync_in_flight = Some(attempt);
        self.settle_deadline = None;
        self.mode = Mode::Querying;
        self.publish();

        let server = self.server.clone();
        info!(attempt, server = %server, trigger = trigger.as_str(), "starting sync attempt");

        let gateway = Arc::clone(&self.gateway);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let response = gateway.sync(&server).await;
            if events
                .send(GatewayEvent::SyncCompleted {
                    attempt,
                    server,
                    response,
                })
                .is_err()
            {
                debug!(attempt, "sync controller gone; discarding late sync result");
            }
        });
        TriggerOutcome::Started
    }

    fn on_sync_completed(
        &mut self,
        attempt: u64,
        server: String,
        response: Result<String, InfraError>,
    ) {
        if self.sync_in_flight != Some(attempt) {
            debug!(attempt, "discarding stale sync completion");
            return;
        }
        self.sync_in_flight = None;

        let classification = classify_sync_response(response.as_deref());
        info!(attempt, server = %server, outcome = classification.label(), "sync attempt completed");

        match classification {
            Classification::Success(result) => {
                let result = self.record_measurement(result, &server);
                self.last_result = Some(result);
                self.last_failure = None;
                self.mode = Mode::Idle;
            }
            Classification::PermissionDenied(result) => {
                let result = self.record_measurement(result, &server);
                self.last_result = Some(result);
                self.last_failure = None;
                self.mode = if self.config.permission_warning {
                    Mode::PermissionWarning
                } else {
                    Mode::Idle
                };
            }
            Classification::RecoveryRequired(reason) => {
                warn!(reason = reason.as_str(), "helper process unavailable");
                self.last_result = None;
                self.resync_pending = false;
                self.mode = Mode::Recovery {
                    reason,
                    error: None,
                };
            }
            Classification::Other(message) => {
                warn!(attempt, error = %message, "sync attempt failed");
                self.last_result = None;
                self.last_failure = Some(message);
                self.mode = Mode::Idle;
            }
        }

        self.reset_countdown();
        if std::mem::take(&mut self.resync_pending) {
            self.start_attempt(Trigger::ServerChange);
        } else {
            self.publish();
        }
    }

    fn record_measurement(&mut self, mut result: SyncResult, server: &str) -> SyncResult {
        if result.server.trim().is_empty() {
            result.server = server.to_string();
        }

        let now = (self.now_provider)();
        let captured_at_ms = self
            .last_captured_at_ms
            .map_or(now.timestamp_millis(), |previous| {
                previous.max(now.timestamp_millis())
            });
        self.last_captured_at_ms = Some(captured_at_ms);

        let record = CacheRecord {
            result: result.clone(),
            captured_at_ms,
        };
        if self.cache_writes.send(record).is_err() {
            warn!("cache writer stopped; sync result not cached");
        }

        self.history.push(HistoryEntry {
            time: now,
            offset: result.offset,
            delay: result.delay,
            server: result.server.clone(),
        });

        let sync_record = SyncRecord {
            offset: result.offset,
            delay: result.delay,
            server: result.server.clone(),
            timestamp: captured_at_ms,
        };
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            if let Err(error) = gateway.record_sync(&sync_record).await {
                warn!(error = %error, server = %sync_record.server, "failed to forward sync record");
            }
        });

        result
    }

    fn request_install(&mut self) -> TriggerOutcome {
        let Mode::Recovery { reason, .. } = self.mode.clone() else {
            return TriggerOutcome::Ignored;
        };
        if self.install_in_flight.is_some() {
            debug!("helper installation already in flight");
            return TriggerOutcome::Ignored;
        }

        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.install_in_flight = Some(attempt);
        self.mode = Mode::Recovery {
            reason,
            error: None,
        };
        self.publish();
        info!(attempt, reason = reason.as_str(), "installing helper process");

        let gateway = Arc::clone(&self.gateway);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let response = gateway.install_helper().await;
            if events
                .send(GatewayEvent::InstallCompleted { attempt, response })
                .is_err()
            {
                debug!(attempt, "sync controller gone; discarding late install result");
            }
        });
        TriggerOutcome::Started
    }

    fn on_install_completed(&mut self, attempt: u64, response: Result<String, InfraError>) {
        if self.install_in_flight != Some(attempt) {
            debug!(attempt, "discarding stale install completion");
            return;
        }
        self.install_in_flight = None;
        let Mode::Recovery { reason, .. } = self.mode.clone() else {
            return;
        };

        match classify_install_response(response.as_deref()) {
            InstallOutcome::Installed { message } => {
                info!(
                    message = message.as_deref().unwrap_or_default(),
                    settle_delay_ms = self.config.settle_delay.as_millis() as u64,
                    "helper installed; waiting before next sync"
                );
                self.mode = Mode::Idle;
                self.last_failure = None;
                self.seconds_until_next_sync = self.config.settle_delay_seconds();
                self.settle_deadline = Some(settle_deadline(Instant::now(), self.config.settle_delay));
            }
            InstallOutcome::Failed(message) => {
                warn!(error = %message, "helper installation failed");
                self.mode = Mode::Recovery {
                    reason,
                    error: Some(message),
                };
            }
        }
        self.publish();
    }

    fn reset_countdown(&mut self) {
        self.seconds_until_next_sync = self.config.sync_interval_seconds();
        self.ticker_reset = true;
    }

    fn snapshot(&self) -> SyncState {
        match (&self.mode, &self.last_result) {
            (Mode::Querying, last_result) => SyncState::Querying {
                last_result: last_result.clone(),
            },
            (Mode::Recovery { reason, error }, _) => SyncState::RecoveryRequired {
                reason: *reason,
                installing: self.install_in_flight.is_some(),
                error: error.clone(),
            },
            (Mode::PermissionWarning, Some(result)) => SyncState::PermissionWarning {
                last_result: result.clone(),
                seconds_until_next_sync: self.seconds_until_next_sync,
            },
            (Mode::Idle | Mode::PermissionWarning, last_result) => SyncState::Idle {
                last_result: last_result.clone(),
                seconds_until_next_sync: self.seconds_until_next_sync,
                last_failure: self.last_failure.clone(),
            },
        }
    }

    fn publish(&self) {
        let next = self.snapshot();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

fn settle_deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or_else(|| {
        warn!(
            settle_delay_secs = delay.as_secs(),
            cap_secs = MAX_CONTROLLER_DELAY_SECONDS,
            "settle delay out of range; capping"
        );
        now + Duration::from_secs(MAX_CONTROLLER_DELAY_SECONDS)
    })
}

async fn write_cache<C>(cache: Arc<C>, mut records: mpsc::UnboundedReceiver<CacheRecord>)
where
    C: ResultCacheRepository + ?Sized + 'static,
{
    // One write at a time keeps records in capture order.
    while let Some(record) = records.recv().await {
        let cache = Arc::clone(&cache);
        match tokio::task::spawn_blocking(move || cache.save(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(error = %error, "failed to cache sync result"),
            Err(error) => warn!(error = %error, "cache write task failed"),
        }
    }
}
