use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{thresholds::INSTANT_CRASH, COUNTDOWN_CEILING_SECS};
use crate::detector::heuristics::{
    bet_count_drop, countdown_edge, countdown_instant_crash, history_advanced, paid_for,
    settled_multiplier, CountdownEdge,
};
use crate::types::{DetectedBy, GameSnapshot, Phase, RoundCandidate};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Countdown hidden longer than this never counts as an instant crash.
    pub countdown_ceiling: Duration,
    /// Platform quirk: a bet-count crash to zero corroborates a low fresh head.
    pub bet_drop_corroboration: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            countdown_ceiling: Duration::from_secs(COUNTDOWN_CEILING_SECS),
            bet_drop_corroboration: false,
        }
    }
}

/// Round ended by a running→stopped flip, waiting one more read so the final
/// value can render.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRound {
    pub estimate: f64,
    pub detected_at: Instant,
}

/// Everything the detector remembers between ticks. Only `RoundDetector`
/// writes it.
#[derive(Debug, Clone, Default)]
pub struct DetectorState {
    pub was_running: bool,
    pub was_countdown_visible: bool,
    /// Last seen history strip; `None` until the first non-empty read seeds it.
    pub last_history: Option<Vec<f64>>,
    /// Last non-zero multiplier read while the round was live.
    pub running_multiplier: f64,
    pub max_running_multiplier: f64,
    pub saw_multiplier_during_round: bool,
    pub round_start_bet_count: Option<u32>,
    pub round_start_total_staked: Option<f64>,
    /// Paid totals only grow during a round; keep the peak.
    pub round_max_total_paid: f64,
    pub last_bet_count: u32,
    pub last_nonzero_bet_count: u32,
    pub last_nonzero_total_staked: f64,
    pub countdown_hidden_at: Option<Instant>,
    pub in_round: bool,
    /// A candidate for the current round already went out.
    pub round_claimed: bool,
    /// The platform ever showed a running flag or a countdown.
    pub phase_signals_seen: bool,
    pub running_seen: bool,
    pub countdown_seen: bool,
    /// A round went out before its history entry appeared; the next history
    /// change belongs to that round.
    pub history_behind: bool,
    pub pending_round: Option<PendingRound>,
}

impl DetectorState {
    pub fn last_history_head(&self) -> Option<f64> {
        self.last_history.as_ref().and_then(|h| h.first().copied())
    }
}

/// What one tick produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DetectorOutput {
    /// Round-end candidates, in heuristic order. All of them go to the guard.
    pub candidates: Vec<RoundCandidate>,
    /// A Live phase began on this tick.
    pub round_started: bool,
    /// The next betting phase opened on this tick.
    pub betting_started: bool,
    /// A pending round was created; the caller should do a confirming read.
    pub settle_requested: bool,
}

pub struct RoundDetector {
    cfg: DetectorConfig,
    state: DetectorState,
}

impl RoundDetector {
    pub fn new(cfg: DetectorConfig) -> Self {
        Self { cfg, state: DetectorState::default() }
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        let s = &self.state;
        if s.pending_round.is_some() {
            Phase::Settling
        } else if s.was_running || (s.in_round && !s.was_countdown_visible) {
            Phase::Live
        } else if s.was_countdown_visible || (s.phase_signals_seen && !s.countdown_seen) {
            Phase::Betting
        } else {
            Phase::Unknown
        }
    }

    /// After a source reload the page state is new: forget phase and round
    /// memory, keep the history so a round that ended meanwhile is still seen.
    pub fn reset_after_resync(&mut self) {
        let last_history = self.state.last_history.take();
        let phase_signals_seen = self.state.phase_signals_seen;
        let running_seen = self.state.running_seen;
        let countdown_seen = self.state.countdown_seen;
        self.state = DetectorState {
            last_history,
            phase_signals_seen,
            running_seen,
            countdown_seen,
            ..DetectorState::default()
        };
    }

    /// Fold one snapshot into the state.
    pub fn observe(&mut self, snap: &GameSnapshot) -> DetectorOutput {
        let now = snap.captured_at;
        let mut out = DetectorOutput::default();

        if snap.is_round_running || snap.is_countdown_visible {
            self.state.phase_signals_seen = true;
        }
        if snap.is_round_running {
            self.state.running_seen = true;
        }
        if snap.is_countdown_visible {
            self.state.countdown_seen = true;
        }

        let fresh_head = self.fresh_history_head(snap);
        let mut history_consumed = false;

        // Pending round from the previous tick: this read is its confirmation.
        if let Some(pending) = self.state.pending_round.take() {
            let multiplier = match fresh_head {
                Some(head) => {
                    history_consumed = true;
                    head
                }
                None => pending.estimate,
            };
            debug!(
                estimate = pending.estimate,
                confirmed = multiplier,
                from_history = fresh_head.is_some(),
                waited_ms = now.saturating_duration_since(pending.detected_at).as_millis() as u64,
                "[DETECTOR] pending round confirmed"
            );
            if self.offer(multiplier, DetectedBy::StateTransition, snap, false, &mut out) && !history_consumed {
                self.state.history_behind = true;
            }
        }

        // Bet figures: remember the crowd while betting is open.
        if !self.state.in_round {
            if snap.bet_count > 0 {
                self.state.last_nonzero_bet_count = snap.bet_count;
            }
            if snap.total_staked > 0.0 {
                self.state.last_nonzero_total_staked = snap.total_staked;
            }
        }

        // Round start.
        let edge = countdown_edge(self.state.was_countdown_visible, snap.is_countdown_visible);
        let run_started = !self.state.was_running && snap.is_round_running;
        if edge == CountdownEdge::Hidden {
            self.state.countdown_hidden_at = Some(now);
        }
        if (edge == CountdownEdge::Hidden || run_started) && !self.state.in_round {
            self.begin_round();
            out.round_started = true;
        }

        // Live tracking.
        let live = snap.is_round_running || (self.state.in_round && !snap.is_countdown_visible);
        if live && snap.multiplier > 0.0 {
            self.state.running_multiplier = snap.multiplier;
            self.state.max_running_multiplier = self.state.max_running_multiplier.max(snap.multiplier);
            if snap.multiplier >= 1.0 {
                self.state.saw_multiplier_during_round = true;
            }
        }
        if self.state.in_round && snap.total_paid > self.state.round_max_total_paid {
            self.state.round_max_total_paid = snap.total_paid;
        }

        // Bet-count drop.
        if self.cfg.bet_drop_corroboration && !history_consumed && !self.state.history_behind {
            if let Some(head) = bet_count_drop(self.state.last_bet_count, snap.bet_count, fresh_head) {
                history_consumed = true;
                self.offer(head, DetectedBy::BetCountDrop, snap, false, &mut out);
            }
        }

        // History diff.
        if !history_consumed {
            if let Some(head) = fresh_head {
                if self.state.history_behind {
                    self.state.history_behind = false;
                    debug!(head, "[DETECTOR] history caught up with an emitted round");
                } else {
                    let history_only = !self.state.phase_signals_seen;
                    self.offer(head, DetectedBy::HistoryDiff, snap, history_only, &mut out);
                }
            }
        } else {
            self.state.history_behind = false;
        }
        if !snap.history.is_empty() {
            self.state.last_history = Some(snap.history.clone());
        }

        // Running → stopped.
        if self.state.was_running && !snap.is_round_running {
            if self.state.round_claimed {
                debug!("[DETECTOR] running stopped, round already claimed");
            } else {
                let estimate = settled_multiplier(
                    snap.multiplier,
                    self.state.running_multiplier,
                    self.state.max_running_multiplier,
                );
                debug!(
                    current = snap.multiplier,
                    running = self.state.running_multiplier,
                    max = self.state.max_running_multiplier,
                    estimate,
                    "[DETECTOR] running stopped, awaiting confirmation"
                );
                self.state.pending_round = Some(PendingRound { estimate, detected_at: now });
                out.settle_requested = true;
            }
            self.state.in_round = false;
        }

        // Countdown back: betting open again.
        if edge == CountdownEdge::Shown {
            if countdown_instant_crash(
                self.state.countdown_hidden_at,
                now,
                self.state.saw_multiplier_during_round,
                self.cfg.countdown_ceiling,
            ) {
                // Supersedes a pending estimate; the countdown is the better witness here.
                self.state.pending_round = None;
                out.settle_requested = false;
                if self.offer(INSTANT_CRASH, DetectedBy::CountdownTransition, snap, false, &mut out) {
                    self.state.history_behind = true;
                }
            }
            self.state.countdown_hidden_at = None;
            self.state.in_round = false;
            self.clear_bet_memory();
            out.betting_started = true;
        } else if !self.state.countdown_seen && !out.candidates.is_empty() {
            // No countdown on this platform: a settled round is the only sign betting reopened.
            self.clear_bet_memory();
            out.betting_started = true;
        }

        self.state.was_running = snap.is_round_running;
        self.state.was_countdown_visible = snap.is_countdown_visible;
        self.state.last_bet_count = snap.bet_count;
        out
    }

    fn fresh_history_head(&self, snap: &GameSnapshot) -> Option<f64> {
        let prev = self.state.last_history.as_ref()?;
        if history_advanced(prev, &snap.history) {
            snap.history_head().filter(|h| *h >= 1.0)
        } else {
            None
        }
    }

    fn begin_round(&mut self) {
        let s = &mut self.state;
        s.in_round = true;
        s.round_claimed = false;
        s.saw_multiplier_during_round = false;
        s.running_multiplier = 0.0;
        s.max_running_multiplier = 0.0;
        s.round_max_total_paid = 0.0;
        s.round_start_bet_count = (s.last_nonzero_bet_count > 0).then_some(s.last_nonzero_bet_count);
        s.round_start_total_staked =
            (s.last_nonzero_total_staked > 0.0).then_some(s.last_nonzero_total_staked);
        info!(
            bet_count = s.last_nonzero_bet_count,
            total_staked = s.last_nonzero_total_staked,
            "[DETECTOR] round started"
        );
    }

    fn clear_bet_memory(&mut self) {
        self.state.last_nonzero_bet_count = 0;
        self.state.last_nonzero_total_staked = 0.0;
    }

    /// Build a candidate with round-start bet figures and record the claim.
    /// `ignore_claim` lets history-only platforms report every new entry.
    /// Returns whether a candidate was produced.
    fn offer(
        &mut self,
        multiplier: f64,
        detected_by: DetectedBy,
        snap: &GameSnapshot,
        ignore_claim: bool,
        out: &mut DetectorOutput,
    ) -> bool {
        if self.state.round_claimed && !ignore_claim {
            debug!(multiplier, %detected_by, "[DETECTOR] round already claimed, candidate absorbed");
            return false;
        }
        let s = &self.state;
        let bet_count = s
            .round_start_bet_count
            .unwrap_or(if s.last_nonzero_bet_count > 0 { s.last_nonzero_bet_count } else { snap.bet_count });
        let total_staked = s.round_start_total_staked.unwrap_or(if s.last_nonzero_total_staked > 0.0 {
            s.last_nonzero_total_staked
        } else {
            snap.total_staked
        });
        let raw_paid = if s.round_max_total_paid > 0.0 { s.round_max_total_paid } else { snap.total_paid };
        let candidate = RoundCandidate {
            multiplier,
            bet_count,
            total_staked,
            total_paid: paid_for(multiplier, raw_paid),
            detected_by,
        };
        debug!(multiplier, %detected_by, bet_count, total_staked, "[DETECTOR] candidate");
        out.candidates.push(candidate);
        self.state.round_claimed = true;
        // Figures belong to this round only.
        self.state.round_start_bet_count = None;
        self.state.round_start_total_staked = None;
        self.state.round_max_total_paid = 0.0;
        true
    }
}
