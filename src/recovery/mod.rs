pub mod resync;
pub mod signature;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::SourceError;
use crate::source::TelemetrySource;

pub use resync::{resync, ResyncPlan};
pub use signature::SignatureMatcher;

/// Pluggable failure-text predicate.
pub type FailurePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Why a recovery check was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Periodic,
    SnapshotFailed,
    LiveStart,
    Standby,
}

#[derive(Debug)]
pub enum CheckVerdict {
    Healthy,
    /// A failure signature is on the page.
    SessionFailure,
    /// The page text could not be read.
    Unreachable(SourceError),
}

impl CheckVerdict {
    pub fn needs_resync(&self) -> bool {
        match self {
            CheckVerdict::Healthy => false,
            CheckVerdict::SessionFailure => true,
            CheckVerdict::Unreachable(e) => e.is_view_loss(),
        }
    }
}

/// Scan the page text for failure signatures.
pub async fn check(source: Arc<dyn TelemetrySource>, is_failure: FailurePredicate, timeout: Duration) -> CheckVerdict {
    let text = match tokio::time::timeout(timeout, source.page_text()).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => return CheckVerdict::Unreachable(e),
        Err(_) => return CheckVerdict::Unreachable(SourceError::Timeout(timeout.as_millis() as u64)),
    };
    if is_failure(&text) {
        CheckVerdict::SessionFailure
    } else {
        CheckVerdict::Healthy
    }
}

/// Gates for the recovery handler. Concurrent triggers collapse: at most one
/// check and one resync run at a time, and no check while resyncing.
#[derive(Debug)]
pub struct RecoveryState {
    is_resyncing: bool,
    check_in_flight: bool,
    live_check_gap: Duration,
    last_live_check_at: Option<Instant>,
    resync_count: u64,
}

impl RecoveryState {
    pub fn new(live_check_gap: Duration) -> Self {
        Self {
            is_resyncing: false,
            check_in_flight: false,
            live_check_gap,
            last_live_check_at: None,
            resync_count: 0,
        }
    }

    pub fn is_resyncing(&self) -> bool {
        self.is_resyncing
    }

    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    pub fn begin_check(&mut self, trigger: CheckTrigger, now: Instant) -> bool {
        if self.is_resyncing || self.check_in_flight {
            debug!(?trigger, "[RECOVERY] check collapsed into one already running");
            return false;
        }
        if trigger == CheckTrigger::LiveStart {
            if let Some(last) = self.last_live_check_at {
                if now.saturating_duration_since(last) < self.live_check_gap {
                    return false;
                }
            }
            self.last_live_check_at = Some(now);
        }
        self.check_in_flight = true;
        true
    }

    pub fn finish_check(&mut self) {
        self.check_in_flight = false;
    }

    pub fn begin_resync(&mut self, reason: &str) -> bool {
        if self.is_resyncing {
            debug!(reason, "[RECOVERY] resync already in progress");
            return false;
        }
        self.is_resyncing = true;
        self.resync_count += 1;
        info!(reason, n = self.resync_count, "[RECOVERY] resync started");
        true
    }

    pub fn finish_resync(&mut self) {
        self.is_resyncing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_collapse_while_one_runs() {
        let mut rs = RecoveryState::new(Duration::from_secs(5));
        let now = Instant::now();
        assert!(rs.begin_check(CheckTrigger::Periodic, now));
        assert!(!rs.begin_check(CheckTrigger::SnapshotFailed, now));
        rs.finish_check();
        assert!(rs.begin_check(CheckTrigger::SnapshotFailed, now));
    }

    #[test]
    fn no_checks_during_resync() {
        let mut rs = RecoveryState::new(Duration::from_secs(5));
        assert!(rs.begin_resync("view lost"));
        assert!(!rs.begin_resync("signature"));
        assert!(!rs.begin_check(CheckTrigger::Periodic, Instant::now()));
        rs.finish_resync();
        assert!(!rs.is_resyncing());
        assert_eq!(rs.resync_count(), 1);
    }

    #[test]
    fn live_start_checks_are_throttled() {
        let mut rs = RecoveryState::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(rs.begin_check(CheckTrigger::LiveStart, t0));
        rs.finish_check();
        assert!(!rs.begin_check(CheckTrigger::LiveStart, t0 + Duration::from_secs(2)));
        assert!(rs.begin_check(CheckTrigger::Periodic, t0 + Duration::from_secs(2)));
        rs.finish_check();
        assert!(rs.begin_check(CheckTrigger::LiveStart, t0 + Duration::from_secs(6)));
    }

    #[test]
    fn verdicts_map_to_resync() {
        assert!(!CheckVerdict::Healthy.needs_resync());
        assert!(CheckVerdict::SessionFailure.needs_resync());
        assert!(CheckVerdict::Unreachable(SourceError::NotConnected).needs_resync());
        assert!(!CheckVerdict::Unreachable(SourceError::Timeout(2000)).needs_resync());
    }
}
