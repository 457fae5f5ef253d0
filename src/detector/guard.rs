use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::thresholds::DEDUP_TOLERANCE;

/// Last accepted emission. Written only right after an accept.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardState {
    pub last_emitted_multiplier: f64,
    pub last_emitted_at: Instant,
}

/// Lets racing heuristics fire freely: the first candidate for a round passes,
/// near-identical ones inside the cooldown are swallowed.
#[derive(Debug)]
pub struct DedupGuard {
    cooldown: Duration,
    state: Option<GuardState>,
    absorbed: u64,
}

impl DedupGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown, state: None, absorbed: 0 }
    }

    /// True if the candidate is a new round and was recorded as emitted.
    pub fn admit(&mut self, multiplier: f64, now: Instant) -> bool {
        if let Some(last) = self.state {
            let close = (multiplier - last.last_emitted_multiplier).abs() < DEDUP_TOLERANCE;
            let recent = now.saturating_duration_since(last.last_emitted_at) < self.cooldown;
            if close && recent {
                self.absorbed += 1;
                debug!(
                    multiplier,
                    last = last.last_emitted_multiplier,
                    absorbed = self.absorbed,
                    "[GUARD] duplicate absorbed"
                );
                return false;
            }
        }
        self.state = Some(GuardState { last_emitted_multiplier: multiplier, last_emitted_at: now });
        true
    }

    pub fn last_multiplier(&self) -> Option<f64> {
        self.state.map(|s| s.last_emitted_multiplier)
    }

    pub fn absorbed(&self) -> u64 {
        self.absorbed
    }
}
