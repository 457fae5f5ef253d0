use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{
    PlatformProfile, ACTION_TIMEOUT_MS, CHANNEL_CAPACITY, COUNTDOWN_CEILING_SECS,
    HEARTBEAT_INTERVAL_SECS, LEG_SETTLE_PAUSE_MS, LIVE_CHECK_MIN_GAP_SECS, REACQUIRE_BACKOFF_MS,
    RECOVERY_CHECK_INTERVAL_SECS, RESYNC_STABILIZE_MS, SETTLE_DELAY_MS, SOURCE_TIMEOUT_MS,
    STANDBY_GAP_SECS,
};
use crate::detector::{DedupGuard, DetectorConfig, RoundDetector};
use crate::error::{ActionError, AppError, PlacementError, Result, SourceError};
use crate::execution::{bounded, place_legs, BetBook};
use crate::platform::PlatformActions;
use crate::poller::{read_snapshot, Heartbeat};
use crate::publisher::EventPublisher;
use crate::recovery::{
    check, resync, CheckTrigger, CheckVerdict, FailurePredicate, RecoveryState, ResyncPlan,
};
use crate::scheduler::{fire_once, tick_opt, TimerConfig, Timers};
use crate::source::TelemetrySource;
use crate::types::{now_ns, BettingPhaseStarted, GameSnapshot, LegRequest, Phase, ViewHandle};

/// Requests from the HTTP surface. Each carries its reply channel.
#[derive(Debug)]
pub enum EngineCommand {
    PlaceBetSet {
        legs: [LegRequest; 2],
        reply: oneshot::Sender<std::result::Result<u64, PlacementError>>,
    },
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
}

/// Results of work the engine spawned off its own task.
enum TaskDone {
    Check {
        trigger: CheckTrigger,
        verdict: CheckVerdict,
    },
    Resync(std::result::Result<ViewHandle, SourceError>),
    Placement {
        id: u64,
        result: std::result::Result<(), PlacementError>,
        reply: oneshot::Sender<std::result::Result<u64, PlacementError>>,
    },
    Cashout {
        id: u64,
        leg: usize,
        result: std::result::Result<(), ActionError>,
        can_cashout: bool,
        latency: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timers: TimerConfig,
    pub detector: DetectorConfig,
    pub emit_cooldown: Duration,
    pub placement_cooldown: Duration,
    pub live_trading: bool,
    pub source_timeout: Duration,
    pub action_timeout: Duration,
    pub leg_pause: Duration,
    pub resync: ResyncPlan,
    pub standby_gap: Duration,
    pub live_check_gap: Duration,
}

impl EngineConfig {
    pub fn from_profile(profile: &PlatformProfile, live_trading: bool) -> Self {
        Self {
            timers: TimerConfig {
                poll: profile.poll_interval(),
                cashout: profile.cashout_interval(),
                recovery: Duration::from_secs(RECOVERY_CHECK_INTERVAL_SECS),
                heartbeat: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
                settle: Duration::from_millis(SETTLE_DELAY_MS),
            },
            detector: DetectorConfig {
                countdown_ceiling: Duration::from_secs(COUNTDOWN_CEILING_SECS),
                bet_drop_corroboration: profile.bet_drop_corroboration,
            },
            emit_cooldown: profile.emit_cooldown(),
            placement_cooldown: profile.placement_cooldown(),
            live_trading,
            source_timeout: Duration::from_millis(SOURCE_TIMEOUT_MS),
            action_timeout: Duration::from_millis(ACTION_TIMEOUT_MS),
            leg_pause: Duration::from_millis(LEG_SETTLE_PAUSE_MS),
            resync: ResyncPlan {
                call_timeout: Duration::from_millis(SOURCE_TIMEOUT_MS),
                stabilize: Duration::from_millis(RESYNC_STABILIZE_MS),
                backoff: REACQUIRE_BACKOFF_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
            },
            standby_gap: Duration::from_secs(STANDBY_GAP_SECS),
            live_check_gap: Duration::from_secs(LIVE_CHECK_MIN_GAP_SECS),
        }
    }
}

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub source: Arc<dyn TelemetrySource>,
    pub actions: Arc<dyn PlatformActions>,
    pub publisher: Arc<dyn EventPublisher>,
    pub is_failure: FailurePredicate,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

/// Owns every piece of mutable observer state and is its only writer.
/// Timer ticks, API commands and spawned-task results are all handled on
/// this one task, one at a time.
pub struct Engine {
    cfg: EngineConfig,
    source: Arc<dyn TelemetrySource>,
    actions: Arc<dyn PlatformActions>,
    publisher: Arc<dyn EventPublisher>,
    is_failure: FailurePredicate,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,

    detector: RoundDetector,
    guard: DedupGuard,
    bets: BetBook,
    recovery: RecoveryState,
    heartbeat: Heartbeat,
    /// Betting reopened while a round was still awaiting its confirming read.
    betting_deferred: bool,
    fatal: Option<String>,

    cmd_rx: mpsc::Receiver<EngineCommand>,
    task_tx: mpsc::Sender<TaskDone>,
    task_rx: mpsc::Receiver<TaskDone>,
}

impl Engine {
    pub fn new(cfg: EngineConfig, deps: EngineDeps, cmd_rx: mpsc::Receiver<EngineCommand>) -> Self {
        let (task_tx, task_rx) = mpsc::channel(CHANNEL_CAPACITY);
        deps.health.set_enabled(true);
        Self {
            detector: RoundDetector::new(cfg.detector.clone()),
            guard: DedupGuard::new(cfg.emit_cooldown),
            bets: BetBook::new(cfg.placement_cooldown, cfg.live_trading),
            recovery: RecoveryState::new(cfg.live_check_gap),
            heartbeat: Heartbeat::new(cfg.standby_gap),
            betting_deferred: false,
            fatal: None,
            source: deps.source,
            actions: deps.actions,
            publisher: deps.publisher,
            is_failure: deps.is_failure,
            health: deps.health,
            latency: deps.latency,
            cmd_rx,
            task_tx,
            task_rx,
            cfg,
        }
    }

    /// Run until recovery gives up. Only ever returns `AppError::ObserverFatal`.
    pub async fn run(mut self) -> Result<()> {
        info!(
            poll_ms = self.cfg.timers.poll.as_millis() as u64,
            cashout_ms = self.cfg.timers.cashout.as_millis() as u64,
            live = self.cfg.live_trading,
            "[ENGINE] started"
        );
        let mut timers = Timers::new(self.cfg.timers.clone());

        loop {
            tokio::select! {
                _ = timers.poll.tick() => self.on_poll(&mut timers).await,
                _ = tick_opt(&mut timers.cashout) => self.on_cashout_tick(&mut timers).await,
                _ = fire_once(&mut timers.settle) => self.on_settle(&mut timers).await,
                _ = timers.recovery.tick() => self.start_check(CheckTrigger::Periodic),
                _ = timers.heartbeat.tick() => self.on_heartbeat(),
                Some(done) = self.task_rx.recv() => self.on_task_done(done, &mut timers),
                Some(cmd) = self.cmd_rx.recv() => self.on_command(cmd, &mut timers),
            }

            if let Some(reason) = self.fatal.take() {
                self.health.set_halted();
                error!(%reason, "[ENGINE] halted");
                return Err(AppError::ObserverFatal(reason));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    async fn on_poll(&mut self, timers: &mut Timers) {
        if self.recovery.is_resyncing() {
            return;
        }
        if self.heartbeat.beat(now_ns()).is_some() {
            self.start_check(CheckTrigger::Standby);
        }
        match read_snapshot(self.source.as_ref(), self.cfg.source_timeout).await {
            Ok(snap) => self.apply_snapshot(snap, timers),
            Err(e) => self.on_snapshot_error(e, timers),
        }
    }

    /// Confirming read for a pending round.
    async fn on_settle(&mut self, timers: &mut Timers) {
        if self.recovery.is_resyncing() {
            return;
        }
        match read_snapshot(self.source.as_ref(), self.cfg.source_timeout).await {
            Ok(snap) => self.apply_snapshot(snap, timers),
            Err(e) => debug!("[POLLER] confirming read failed, next poll confirms: {e}"),
        }
    }

    /// Multiplier-only read while a bet set is being monitored.
    async fn on_cashout_tick(&mut self, timers: &mut Timers) {
        if self.recovery.is_resyncing() || !self.bets.is_monitoring() {
            timers.stop_cashout();
            return;
        }
        match read_snapshot(self.source.as_ref(), self.cfg.source_timeout).await {
            Ok(snap) if self.cashout_open(&snap) => self.dispatch_cashouts(snap.multiplier, snap.captured_at),
            Ok(_) => {}
            Err(e) => debug!("[CASHOUT] read failed: {e}"),
        }
        if self.bets.all_resolved() {
            timers.stop_cashout();
        }
    }

    /// Whether a cash-out read still belongs to the running round. Once the
    /// platform has shown a running flag, its absence means the round crashed
    /// and the multiplier on screen is frozen.
    fn cashout_open(&self, snap: &GameSnapshot) -> bool {
        if self.detector.phase() != Phase::Live {
            return false;
        }
        if self.detector.state().running_seen {
            snap.is_round_running
        } else {
            !snap.is_countdown_visible && snap.multiplier >= 1.0
        }
    }

    fn on_heartbeat(&mut self) {
        if self.heartbeat.beat(now_ns()).is_some() {
            self.start_check(CheckTrigger::Standby);
        }
    }

    fn on_snapshot_error(&mut self, e: SourceError, timers: &mut Timers) {
        if e.is_view_loss() {
            warn!("[POLLER] view lost: {e}");
            self.start_resync(&e.to_string(), timers);
        } else if e.is_retryable() {
            debug!("[POLLER] snapshot failed, tick skipped: {e}");
            self.start_check(CheckTrigger::SnapshotFailed);
        } else {
            warn!("[POLLER] unusable snapshot skipped: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Detection and bets
    // -----------------------------------------------------------------------

    fn apply_snapshot(&mut self, snap: GameSnapshot, timers: &mut Timers) {
        self.health.mark_snapshot(snap.captured_at_ns);
        let out = self.detector.observe(&snap);

        if out.round_started {
            self.start_check(CheckTrigger::LiveStart);
            self.bets.on_round_started();
        }
        let live = self.detector.phase() == Phase::Live;
        self.sync_cashout_monitor(live, timers);
        if live && timers.cashout_running() {
            self.dispatch_cashouts(snap.multiplier, snap.captured_at);
        }

        let mut accepted = None;
        for candidate in out.candidates {
            if !self.guard.admit(candidate.multiplier, snap.captured_at) {
                continue;
            }
            let round = candidate.into_round(now_ns());
            info!(
                multiplier = round.multiplier,
                detected_by = %round.detected_by,
                bet_count = round.bet_count,
                total_staked = round.total_staked,
                total_paid = round.total_paid,
                "[DETECTOR] round completed"
            );
            self.health.mark_round(round.created_at_ns);
            accepted = Some(round.multiplier);
            self.publisher.on_round_completed(round);
        }
        // A round that began on this same tick is not the one that just ended.
        if accepted.is_some() && !out.round_started {
            self.settle_bets(accepted, timers);
        }

        if out.settle_requested {
            timers.arm_settle();
        }
        if out.betting_started {
            self.betting_deferred = true;
        }
        if self.betting_deferred && self.detector.state().pending_round.is_none() {
            self.betting_deferred = false;
            self.settle_bets(None, timers);
            let event = BettingPhaseStarted {
                last_multiplier: self.guard.last_multiplier(),
                timestamp_ns: now_ns(),
            };
            info!(last = ?event.last_multiplier, "[DETECTOR] betting phase started");
            self.publisher.on_betting_phase_started(event);
        }
    }

    fn sync_cashout_monitor(&mut self, live: bool, timers: &mut Timers) {
        let wanted = live && self.bets.is_monitoring() && !self.bets.all_resolved();
        if wanted {
            timers.start_cashout();
        } else {
            timers.stop_cashout();
        }
    }

    fn settle_bets(&mut self, round_multiplier: Option<f64>, timers: &mut Timers) {
        if let Some(outcome) = self.bets.settle(round_multiplier) {
            timers.stop_cashout();
            self.health.set_bet_active(false);
            self.publisher.on_bet_set_settled(outcome);
        }
    }

    fn dispatch_cashouts(&mut self, multiplier: f64, captured_at: Instant) {
        let Some(id) = self.bets.active().map(|s| s.id) else {
            return;
        };
        for leg in self.bets.due_cashouts(multiplier) {
            info!(bet_set = id, leg, multiplier, "[CASHOUT] target reached");
            let actions = Arc::clone(&self.actions);
            let tx = self.task_tx.clone();
            let limit = self.cfg.action_timeout;
            tokio::spawn(async move {
                let result = bounded(limit, actions.cashout(leg)).await;
                let latency = captured_at.elapsed();
                let can_cashout = match &result {
                    Ok(()) => true,
                    Err(_) => match tokio::time::timeout(limit, actions.can_cashout(leg)).await {
                        Ok(can) => can,
                        Err(_) => {
                            // Unknown availability keeps the leg retryable for the rest of the round.
                            warn!(bet_set = id, leg, "[CASHOUT] availability check timed out, leg stays retryable");
                            true
                        }
                    },
                };
                let _ = tx
                    .send(TaskDone::Cashout { id, leg, result, can_cashout, latency })
                    .await;
            });
        }
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    fn start_check(&mut self, trigger: CheckTrigger) {
        if self.fatal.is_some() || !self.recovery.begin_check(trigger, Instant::now()) {
            return;
        }
        debug!(?trigger, "[RECOVERY] check started");
        let source = Arc::clone(&self.source);
        let is_failure = Arc::clone(&self.is_failure);
        let tx = self.task_tx.clone();
        let limit = self.cfg.source_timeout;
        tokio::spawn(async move {
            let verdict = check(source, is_failure, limit).await;
            let _ = tx.send(TaskDone::Check { trigger, verdict }).await;
        });
    }

    fn start_resync(&mut self, reason: &str, timers: &mut Timers) {
        if self.fatal.is_some() || !self.recovery.begin_resync(reason) {
            return;
        }
        self.health.set_resyncing(true);
        timers.cancel_settle();
        timers.stop_cashout();
        self.betting_deferred = false;

        let source = Arc::clone(&self.source);
        let plan = self.cfg.resync.clone();
        let tx = self.task_tx.clone();
        tokio::spawn(async move {
            let result = resync(source, plan).await;
            let _ = tx.send(TaskDone::Resync(result)).await;
        });
    }

    fn on_task_done(&mut self, done: TaskDone, timers: &mut Timers) {
        match done {
            TaskDone::Check { trigger, verdict } => {
                self.recovery.finish_check();
                match &verdict {
                    CheckVerdict::Healthy => debug!(?trigger, "[RECOVERY] check passed"),
                    CheckVerdict::SessionFailure => {
                        warn!(?trigger, "[RECOVERY] failure signature on page");
                        self.start_resync("failure signature", timers);
                    }
                    CheckVerdict::Unreachable(e) if verdict.needs_resync() => {
                        warn!(?trigger, "[RECOVERY] page unreachable: {e}");
                        self.start_resync(&e.to_string(), timers);
                    }
                    CheckVerdict::Unreachable(e) => debug!(?trigger, "[RECOVERY] check inconclusive: {e}"),
                }
            }
            TaskDone::Resync(result) => {
                self.recovery.finish_resync();
                self.health.set_resyncing(false);
                match result {
                    Ok(view) => {
                        self.detector.reset_after_resync();
                        info!(%view, n = self.recovery.resync_count(), "[RECOVERY] resync complete");
                    }
                    Err(e) => {
                        let reason = format!(
                            "view not reacquired after {} attempts: {e}",
                            self.cfg.resync.backoff.len()
                        );
                        error!(%reason, "[RECOVERY] giving up");
                        self.publisher.on_observer_fatal(reason.clone());
                        self.fatal = Some(reason);
                    }
                }
            }
            TaskDone::Placement { id, result, reply } => {
                let current = self.bets.placement_done(id, &result);
                let answer = match (current, result) {
                    (true, Ok(())) => Ok(id),
                    (true, Err(e)) => Err(e),
                    (false, _) => Err(PlacementError::Cancelled),
                };
                self.health.set_bet_active(self.bets.active().is_some());
                if self.bets.is_monitoring() {
                    self.sync_cashout_monitor(self.detector.phase() == Phase::Live, timers);
                }
                let _ = reply.send(answer);
            }
            TaskDone::Cashout { id, leg, result, can_cashout, latency } => {
                match &result {
                    Ok(()) => {
                        self.latency.record(latency);
                        info!(bet_set = id, leg, latency_ms = latency.as_millis() as u64, "[CASHOUT] cashed out");
                    }
                    Err(e) => warn!(bet_set = id, leg, can_cashout, "[CASHOUT] cash-out failed: {e}"),
                }
                self.bets.cashout_result(id, leg, result.is_ok(), can_cashout);
                if self.bets.all_resolved() {
                    timers.stop_cashout();
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn on_command(&mut self, cmd: EngineCommand, timers: &mut Timers) {
        match cmd {
            EngineCommand::PlaceBetSet { legs, reply } => {
                let phase = if self.recovery.is_resyncing() { Phase::Unknown } else { self.detector.phase() };
                let id = match self.bets.try_open(legs, phase, Instant::now()) {
                    Ok(id) => id,
                    Err(e) => {
                        info!(%phase, "[PLACE] rejected: {e}");
                        let _ = reply.send(Err(e));
                        return;
                    }
                };
                self.health.set_bet_active(true);
                let actions = Arc::clone(&self.actions);
                let tx = self.task_tx.clone();
                let pause = self.cfg.leg_pause;
                let limit = self.cfg.action_timeout;
                tokio::spawn(async move {
                    let result = place_legs(actions, legs, pause, limit).await;
                    let _ = tx.send(TaskDone::Placement { id, result, reply }).await;
                });
            }
            EngineCommand::SetEnabled { enabled, reply } => {
                self.bets.set_enabled(enabled);
                if !enabled {
                    timers.stop_cashout();
                }
                self.health.set_enabled(enabled);
                self.health.set_bet_active(self.bets.active().is_some());
                info!(enabled, "[ENGINE] system toggled");
                let _ = reply.send(enabled);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::round::tests::Snap;
    use crate::types::{DetectedBy, ObserverEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Time-scripted source: each entry applies from its offset onward.
    struct ScriptedSource {
        start: tokio::time::Instant,
        script: Vec<(u64, std::result::Result<Snap, SourceError>)>,
        snapshot_calls: AtomicU32,
        reacquire_ok: bool,
    }

    impl ScriptedSource {
        fn new(script: Vec<(u64, std::result::Result<Snap, SourceError>)>) -> Arc<Self> {
            Arc::new(Self {
                start: tokio::time::Instant::now(),
                script,
                snapshot_calls: AtomicU32::new(0),
                reacquire_ok: true,
            })
        }

        fn failing_reacquire(script: Vec<(u64, std::result::Result<Snap, SourceError>)>) -> Arc<Self> {
            Arc::new(Self {
                start: tokio::time::Instant::now(),
                script,
                snapshot_calls: AtomicU32::new(0),
                reacquire_ok: false,
            })
        }

        fn calls(&self) -> u32 {
            self.snapshot_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn snapshot(&self) -> std::result::Result<GameSnapshot, SourceError> {
            self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
            let elapsed = self.start.elapsed().as_millis() as u64;
            let entry = self
                .script
                .iter()
                .rev()
                .find(|(at, _)| *at <= elapsed)
                .map(|(_, e)| e.clone())
                .unwrap_or(Err(SourceError::NotConnected));
            entry.map(|s| s.at(Instant::now()))
        }
        async fn reacquire(&self) -> std::result::Result<ViewHandle, SourceError> {
            if self.reacquire_ok {
                Ok(ViewHandle("frame".to_string()))
            } else {
                Err(SourceError::ViewLost("frame gone".to_string()))
            }
        }
        async fn reload(&self) -> std::result::Result<(), SourceError> {
            Ok(())
        }
        async fn page_text(&self) -> std::result::Result<String, SourceError> {
            Ok("lobby".to_string())
        }
    }

    #[derive(Default)]
    struct Recorded {
        events: Mutex<Vec<ObserverEvent>>,
    }

    impl Recorded {
        fn rounds(&self) -> Vec<crate::types::RoundCompleted> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    ObserverEvent::RoundCompleted(r) => Some(r.clone()),
                    _ => None,
                })
                .collect()
        }
        fn all(&self) -> Vec<ObserverEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventPublisher for Recorded {
        fn on_round_completed(&self, round: crate::types::RoundCompleted) {
            self.events.lock().unwrap().push(ObserverEvent::RoundCompleted(round));
        }
        fn on_betting_phase_started(&self, event: BettingPhaseStarted) {
            self.events.lock().unwrap().push(ObserverEvent::BettingPhaseStarted(event));
        }
        fn on_bet_set_settled(&self, outcome: crate::types::BetSetOutcome) {
            self.events.lock().unwrap().push(ObserverEvent::BetSetSettled(outcome));
        }
        fn on_observer_fatal(&self, reason: String) {
            self.events.lock().unwrap().push(ObserverEvent::ObserverFatal(reason));
        }
    }

    #[derive(Default)]
    struct Clicks {
        cashouts: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl PlatformActions for Clicks {
        async fn set_stake(&self, _leg: usize, _amount: f64) -> std::result::Result<(), ActionError> {
            Ok(())
        }
        async fn submit(&self, _leg: usize) -> std::result::Result<(), ActionError> {
            Ok(())
        }
        async fn cashout(&self, leg: usize) -> std::result::Result<(), ActionError> {
            self.cashouts.lock().unwrap().push(leg);
            Ok(())
        }
        async fn can_bet(&self, _leg: usize) -> bool {
            true
        }
        async fn can_cashout(&self, _leg: usize) -> bool {
            true
        }
    }

    fn test_config() -> EngineConfig {
        let mut cfg = EngineConfig::from_profile(&PlatformProfile::default(), false);
        cfg.resync.stabilize = Duration::from_secs(1);
        cfg.resync.backoff = vec![Duration::from_millis(500), Duration::from_millis(500)];
        cfg
    }

    struct Harness {
        source: Arc<ScriptedSource>,
        publisher: Arc<Recorded>,
        actions: Arc<Clicks>,
        health: Arc<HealthState>,
        cmd_tx: mpsc::Sender<EngineCommand>,
        handle: tokio::task::JoinHandle<Result<()>>,
    }

    fn start(source: Arc<ScriptedSource>) -> Harness {
        let publisher = Arc::new(Recorded::default());
        let actions = Arc::new(Clicks::default());
        let health = Arc::new(HealthState::new());
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let deps = EngineDeps {
            source: source.clone(),
            actions: actions.clone(),
            publisher: publisher.clone(),
            is_failure: Arc::new(|text: &str| text.contains("session expired")),
            health: health.clone(),
            latency: Arc::new(LatencyStats::new()),
        };
        let engine = Engine::new(test_config(), deps, cmd_rx);
        let handle = tokio::spawn(engine.run());
        Harness { source, publisher, actions, health, cmd_tx, handle }
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_transition_round_is_published_once() {
        let h = start(ScriptedSource::new(vec![
            (0, Ok(Snap::betting())),
            (50, Ok(Snap::live(1.0))),
            (150, Ok(Snap::live(3.42))),
            (250, Ok(Snap::ended())),
        ]));
        sleep_ms(1_000).await;

        let rounds = h.publisher.rounds();
        assert_eq!(rounds.len(), 1);
        assert!((rounds[0].multiplier - 3.42).abs() < 1e-9);
        assert_eq!(rounds[0].detected_by, DetectedBy::StateTransition);

        // Betting reopened only after the round went out.
        let events = h.publisher.all();
        let betting_at = events
            .iter()
            .position(|e| matches!(e, ObserverEvent::BettingPhaseStarted(b) if b.last_multiplier == Some(3.42)))
            .expect("betting phase event");
        let round_at = events.iter().position(|e| matches!(e, ObserverEvent::RoundCompleted(_))).unwrap();
        assert!(round_at < betting_at);
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_are_inert_while_resyncing() {
        let h = start(ScriptedSource::new(vec![
            (0, Err(SourceError::ViewLost("frame detached".to_string()))),
            (50, Ok(Snap::betting())),
            (150, Ok(Snap::live(2.0))),
            (450, Ok(Snap::ended())),
        ]));
        // Reload, 1s stabilize, first reacquire at +500ms.
        sleep_ms(1_200).await;
        assert!(h.health.report().resyncing);
        assert_eq!(h.source.calls(), 1, "no reads while resyncing");
        assert!(h.publisher.all().is_empty());

        sleep_ms(1_000).await;
        assert!(!h.health.report().resyncing);
        assert!(h.source.calls() > 1);
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reacquire_is_fatal_once() {
        let h = start(ScriptedSource::failing_reacquire(vec![(
            0,
            Err(SourceError::ViewLost("frame detached".to_string())),
        )]));
        let result = tokio::time::timeout(Duration::from_secs(10), h.handle).await.expect("engine stops");
        assert!(matches!(result, Ok(Err(AppError::ObserverFatal(_)))));
        let fatals = h
            .publisher
            .all()
            .into_iter()
            .filter(|e| matches!(e, ObserverEvent::ObserverFatal(_)))
            .count();
        assert_eq!(fatals, 1);
        assert!(h.health.is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn bet_set_cashes_out_crossing_leg_and_settles() {
        let h = start(ScriptedSource::new(vec![
            (0, Ok(Snap::betting())),
            (450, Ok(Snap::live(1.0))),
            (650, Ok(Snap::live(1.3))),
            (850, Ok(Snap::live(1.7))),
            (1_050, Ok(Snap::live(2.2))),
            (1_250, Ok(Snap::ended())),
        ]));
        sleep_ms(10).await;

        let (reply, rx) = oneshot::channel();
        let legs = [LegRequest { amount: 10.0, target: 1.5 }, LegRequest { amount: 5.0, target: 5.0 }];
        h.cmd_tx.send(EngineCommand::PlaceBetSet { legs, reply }).await.unwrap();
        let id = rx.await.unwrap().expect("placement accepted");

        sleep_ms(2_000).await;
        assert_eq!(*h.actions.cashouts.lock().unwrap(), vec![0]);

        let outcome = h
            .publisher
            .all()
            .into_iter()
            .find_map(|e| match e {
                ObserverEvent::BetSetSettled(o) => Some(o),
                _ => None,
            })
            .expect("bet set settled");
        assert_eq!(outcome.bet_set_id, id);
        assert!(outcome.legs[0].cashed_out);
        let crossed = outcome.legs[0].actual_multiplier.unwrap();
        assert!((crossed - 1.7).abs() < 1e-9);
        assert!(!outcome.legs[1].cashed_out);
        assert_eq!(outcome.round_multiplier, Some(2.2));
        assert!(!h.health.report().bet_active);
        h.handle.abort();
    }

    fn settled(publisher: &Recorded) -> crate::types::BetSetOutcome {
        publisher
            .all()
            .into_iter()
            .find_map(|e| match e {
                ObserverEvent::BetSetSettled(o) => Some(o),
                _ => None,
            })
            .expect("bet set settled")
    }

    #[tokio::test(start_paused = true)]
    async fn frozen_crash_value_is_not_cashed_out() {
        // After the crash the page keeps showing 2.05 with the countdown still hidden.
        let crashed = Snap { multiplier: 2.05, running: false, countdown: false, ..Snap::betting() };
        let h = start(ScriptedSource::new(vec![
            (0, Ok(Snap::betting())),
            (450, Ok(Snap::live(1.0))),
            (650, Ok(Snap::live(1.9))),
            (825, Ok(crashed)),
            (1_250, Ok(Snap::ended())),
        ]));
        sleep_ms(10).await;

        let (reply, rx) = oneshot::channel();
        let legs = [LegRequest { amount: 10.0, target: 2.0 }, LegRequest { amount: 5.0, target: 5.0 }];
        h.cmd_tx.send(EngineCommand::PlaceBetSet { legs, reply }).await.unwrap();
        rx.await.unwrap().expect("placement accepted");

        sleep_ms(2_000).await;
        assert!(h.actions.cashouts.lock().unwrap().is_empty());
        let outcome = settled(&h.publisher);
        assert!(!outcome.legs[0].cashed_out);
        assert_eq!(outcome.legs[0].payout, 0.0);
        assert_eq!(outcome.round_multiplier, Some(2.05));
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn set_still_placing_at_round_start_is_monitored_in_that_round() {
        let h = start(ScriptedSource::new(vec![
            (0, Ok(Snap::betting())),
            (150, Ok(Snap::live(1.0))),
            (400, Ok(Snap::live(1.3))),
            (600, Ok(Snap::live(1.8))),
            (800, Ok(Snap::live(2.6))),
            (1_000, Ok(Snap::ended())),
            (2_000, Ok(Snap::live(1.0))),
            (2_200, Ok(Snap::live(1.2))),
            (2_400, Ok(Snap::ended())),
        ]));
        sleep_ms(10).await;

        // Leg pause keeps the set placing until well after the round goes live.
        let (reply, rx) = oneshot::channel();
        let legs = [LegRequest { amount: 10.0, target: 1.5 }, LegRequest { amount: 5.0, target: 5.0 }];
        h.cmd_tx.send(EngineCommand::PlaceBetSet { legs, reply }).await.unwrap();
        let id = rx.await.unwrap().expect("placement accepted");

        sleep_ms(2_000).await;
        assert_eq!(*h.actions.cashouts.lock().unwrap(), vec![0]);
        let outcome = settled(&h.publisher);
        assert_eq!(outcome.bet_set_id, id);
        assert_eq!(outcome.round_multiplier, Some(2.6));
        assert!(outcome.legs[0].cashed_out);
        let crossed = outcome.legs[0].actual_multiplier.unwrap();
        assert!((crossed - 1.8).abs() < 1e-9);
        assert!(!outcome.legs[1].cashed_out);
        h.handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_clears_the_active_bet_set() {
        let h = start(ScriptedSource::new(vec![(0, Ok(Snap::betting()))]));
        sleep_ms(10).await;

        let (reply, rx) = oneshot::channel();
        let legs = [LegRequest { amount: 1.0, target: 2.0 }, LegRequest { amount: 1.0, target: 3.0 }];
        h.cmd_tx.send(EngineCommand::PlaceBetSet { legs, reply }).await.unwrap();
        rx.await.unwrap().unwrap();
        assert!(h.health.report().bet_active);

        let (reply, rx) = oneshot::channel();
        h.cmd_tx.send(EngineCommand::SetEnabled { enabled: false, reply }).await.unwrap();
        assert!(!rx.await.unwrap());
        let report = h.health.report();
        assert!(!report.enabled);
        assert!(!report.bet_active);

        let (reply, rx) = oneshot::channel();
        h.cmd_tx.send(EngineCommand::PlaceBetSet { legs, reply }).await.unwrap();
        assert!(matches!(rx.await.unwrap(), Err(PlacementError::Disabled)));
        h.handle.abort();
    }
}
