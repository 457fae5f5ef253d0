use std::time::Duration;

use tracing::warn;

use crate::error::SourceError;
use crate::source::TelemetrySource;
use crate::types::GameSnapshot;

/// One timeout-bounded snapshot read.
pub async fn read_snapshot(source: &dyn TelemetrySource, timeout: Duration) -> Result<GameSnapshot, SourceError> {
    match tokio::time::timeout(timeout, source.snapshot()).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Wall-clock liveness tracker. A gap far beyond the tick period means the
/// host was suspended, not that the scheduler ran late.
#[derive(Debug)]
pub struct Heartbeat {
    standby_gap: Duration,
    last_beat_ns: Option<u64>,
    standby_events: u64,
}

impl Heartbeat {
    pub fn new(standby_gap: Duration) -> Self {
        Self { standby_gap, last_beat_ns: None, standby_events: 0 }
    }

    /// Record a beat at wall-clock `now_ns`. Returns the gap when it exceeds
    /// the standby threshold.
    pub fn beat(&mut self, now_ns: u64) -> Option<Duration> {
        let prev = self.last_beat_ns.replace(now_ns);
        let gap = Duration::from_nanos(now_ns.saturating_sub(prev?));
        if gap > self.standby_gap {
            self.standby_events += 1;
            warn!(gap_secs = gap.as_secs(), n = self.standby_events, "[POLLER] possible standby");
            Some(gap)
        } else {
            None
        }
    }

    pub fn last_beat_ns(&self) -> Option<u64> {
        self.last_beat_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: u64 = 1_000_000_000;

    #[test]
    fn first_beat_only_seeds() {
        let mut hb = Heartbeat::new(Duration::from_secs(30));
        assert_eq!(hb.beat(100 * SEC), None);
        assert_eq!(hb.last_beat_ns(), Some(100 * SEC));
    }

    #[test]
    fn long_gap_signals_standby() {
        let mut hb = Heartbeat::new(Duration::from_secs(30));
        hb.beat(0);
        assert_eq!(hb.beat(5 * SEC), None);
        assert_eq!(hb.beat(45 * SEC), Some(Duration::from_secs(40)));
        assert_eq!(hb.beat(46 * SEC), None);
    }

    #[test]
    fn clock_going_backwards_is_not_standby() {
        let mut hb = Heartbeat::new(Duration::from_secs(30));
        hb.beat(100 * SEC);
        assert_eq!(hb.beat(50 * SEC), None);
    }
}
