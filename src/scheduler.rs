use std::pin::Pin;
use std::time::Duration;

use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TimerConfig {
    pub poll: Duration,
    pub cashout: Duration,
    pub recovery: Duration,
    pub heartbeat: Duration,
    pub settle: Duration,
}

/// Named timers owned by the engine. `cashout` and `settle` exist only while
/// their lifecycle needs them; an absent timer never fires.
/// Fields are public so one `select!` can borrow each timer separately.
pub struct Timers {
    cfg: TimerConfig,
    pub poll: Interval,
    pub recovery: Interval,
    pub heartbeat: Interval,
    pub cashout: Option<Interval>,
    pub settle: Option<Pin<Box<Sleep>>>,
}

fn skipping(mut iv: Interval) -> Interval {
    iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
    iv
}

/// Tick of an optional interval; pending forever when it is absent.
pub async fn tick_opt(iv: &mut Option<Interval>) {
    match iv.as_mut() {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// One-shot sleep that clears itself after firing.
pub async fn fire_once(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => {
            sleep.as_mut().await;
            *slot = None;
        }
        None => std::future::pending().await,
    }
}

impl Timers {
    pub fn new(cfg: TimerConfig) -> Self {
        let now = Instant::now();
        Self {
            poll: skipping(interval(cfg.poll)),
            // First periodic check one period in, not at startup.
            recovery: skipping(interval_at(now + cfg.recovery, cfg.recovery)),
            heartbeat: skipping(interval_at(now + cfg.heartbeat, cfg.heartbeat)),
            cashout: None,
            settle: None,
            cfg,
        }
    }

    pub fn start_cashout(&mut self) {
        if self.cashout.is_none() {
            debug!(interval_ms = self.cfg.cashout.as_millis() as u64, "[SCHED] cashout monitor started");
            self.cashout = Some(skipping(interval(self.cfg.cashout)));
        }
    }

    pub fn stop_cashout(&mut self) {
        if self.cashout.take().is_some() {
            debug!("[SCHED] cashout monitor stopped");
        }
    }

    pub fn cashout_running(&self) -> bool {
        self.cashout.is_some()
    }

    /// Arm the one-shot confirming read. Re-arming restarts it.
    pub fn arm_settle(&mut self) {
        self.settle = Some(Box::pin(tokio::time::sleep(self.cfg.settle)));
    }

    pub fn cancel_settle(&mut self) {
        self.settle = None;
    }

    pub fn settle_armed(&self) -> bool {
        self.settle.is_some()
    }
}
