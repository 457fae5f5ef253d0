use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::PlacementError;
use crate::types::{
    now_ns, ActiveBetSet, BetLeg, BetSetOutcome, BetSetStatus, LegOutcome, LegRequest, Phase,
};

/// Owns the enabled flag and the at-most-one active bet set. Only the engine
/// task holds it.
#[derive(Debug)]
pub struct BetBook {
    enabled: bool,
    live: bool,
    cooldown: Duration,
    active: Option<ActiveBetSet>,
    /// The active set was still placing when its round went live.
    live_while_placing: bool,
    last_placement_at: Option<Instant>,
    next_id: u64,
}

impl BetBook {
    pub fn new(cooldown: Duration, live: bool) -> Self {
        Self {
            enabled: true,
            live,
            cooldown,
            active: None,
            live_while_placing: false,
            last_placement_at: None,
            next_id: 1,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn active(&self) -> Option<&ActiveBetSet> {
        self.active.as_ref()
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(&self.active, Some(set) if set.status == BetSetStatus::Monitoring)
    }

    /// Turn the system on or off. Disabling drops the active set; returns
    /// its id so the caller can stop the cash-out monitor.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<u64> {
        self.enabled = enabled;
        if enabled {
            return None;
        }
        let dropped = self.active.take().map(|set| set.id);
        if let Some(id) = dropped {
            info!(bet_set = id, "[PLACE] system disabled, active bet set cleared");
        }
        dropped
    }

    /// Validate a placement request and open a new set in `Placing`.
    pub fn try_open(
        &mut self,
        legs: [LegRequest; 2],
        phase: Phase,
        now: Instant,
    ) -> Result<u64, PlacementError> {
        if !self.enabled {
            return Err(PlacementError::Disabled);
        }
        for (index, leg) in legs.iter().enumerate() {
            validate_leg(index, leg)?;
        }
        if let Some(last) = self.last_placement_at {
            let since = now.saturating_duration_since(last);
            if since < self.cooldown {
                return Err(PlacementError::Cooldown {
                    remaining_ms: (self.cooldown - since).as_millis() as u64,
                });
            }
        }
        if self.active.is_some() {
            return Err(PlacementError::AlreadyActive);
        }
        if phase != Phase::Betting {
            return Err(PlacementError::NotBettingPhase);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.last_placement_at = Some(now);
        self.live_while_placing = false;
        self.active = Some(ActiveBetSet {
            id,
            legs: [BetLeg::new(legs[0]), BetLeg::new(legs[1])],
            placed_at: now,
            placed_at_ns: now_ns(),
            is_live: self.live,
            status: BetSetStatus::Placing,
        });
        info!(
            bet_set = id,
            leg0 = ?legs[0],
            leg1 = ?legs[1],
            live = self.live,
            "[PLACE] bet set opened"
        );
        Ok(id)
    }

    /// Result of the leg submission task. A failed placement drops the set.
    /// Legs accepted after their round already went live are monitored
    /// right away.
    pub fn placement_done(&mut self, id: u64, result: &Result<(), PlacementError>) -> bool {
        let Some(set) = self.active.as_mut().filter(|s| s.id == id) else {
            debug!(bet_set = id, "[PLACE] stale placement result ignored");
            return false;
        };
        if set.status != BetSetStatus::Placing {
            return false;
        }
        match result {
            Ok(()) if self.live_while_placing => {
                set.status = BetSetStatus::Monitoring;
                info!(bet_set = id, "[PLACE] both legs accepted, round already live, monitoring legs");
            }
            Ok(()) => {
                set.status = BetSetStatus::Armed;
                info!(bet_set = id, "[PLACE] both legs accepted, armed for next round");
            }
            Err(e) => {
                warn!(bet_set = id, "[PLACE] placement failed: {e}");
                self.active = None;
            }
        }
        true
    }

    /// A Live phase began. Returns true when an armed set starts monitoring.
    pub fn on_round_started(&mut self) -> bool {
        match self.active.as_mut() {
            Some(set) if set.status == BetSetStatus::Armed => {
                set.status = BetSetStatus::Monitoring;
                info!(bet_set = set.id, "[CASHOUT] round live, monitoring legs");
                true
            }
            Some(set) if set.status == BetSetStatus::Placing => {
                self.live_while_placing = true;
                debug!(bet_set = set.id, "[CASHOUT] round live while legs are still being placed");
                false
            }
            _ => false,
        }
    }

    /// Legs whose target was reached at `multiplier`. They are marked cashed
    /// out at this value and flagged in flight until the action answers.
    pub fn due_cashouts(&mut self, multiplier: f64) -> Vec<usize> {
        let Some(set) = self.active.as_mut() else {
            return Vec::new();
        };
        if set.status != BetSetStatus::Monitoring {
            return Vec::new();
        }
        let mut due = Vec::new();
        for (i, leg) in set.legs.iter_mut().enumerate() {
            if leg.cashed_out || leg.retired || leg.in_flight {
                continue;
            }
            if multiplier >= leg.target_multiplier {
                leg.cashed_out = true;
                leg.in_flight = true;
                leg.actual_multiplier = Some(multiplier);
                due.push(i);
            }
        }
        due
    }

    /// Outcome of a dispatched cash-out. A failure reverts the leg; if the
    /// platform no longer offers cash-out the leg is retired.
    pub fn cashout_result(&mut self, id: u64, leg: usize, ok: bool, can_cashout: bool) -> bool {
        let Some(set) = self.active.as_mut().filter(|s| s.id == id) else {
            debug!(bet_set = id, leg, "[CASHOUT] stale cash-out result ignored");
            return false;
        };
        let Some(l) = set.legs.get_mut(leg) else {
            return false;
        };
        l.in_flight = false;
        if !ok {
            l.cashed_out = false;
            l.actual_multiplier = None;
            if !can_cashout {
                l.retired = true;
                warn!(bet_set = id, leg, "[CASHOUT] cash-out no longer offered, leg retired");
            }
        }
        true
    }

    /// Both legs are done for this round; the monitor can stop.
    pub fn all_resolved(&self) -> bool {
        match &self.active {
            Some(set) if set.status == BetSetStatus::Monitoring => {
                set.legs.iter().all(BetLeg::is_resolved)
            }
            _ => false,
        }
    }

    /// Close the set at the end of its monitored round. Legs not cashed out
    /// are losses.
    pub fn settle(&mut self, round_multiplier: Option<f64>) -> Option<BetSetOutcome> {
        if !self.is_monitoring() {
            // That round ended before placement finished; wait for the next one.
            self.live_while_placing = false;
            return None;
        }
        let set = self.active.take()?;
        let legs = set
            .legs
            .iter()
            .map(|l| {
                let payout = match (l.cashed_out, l.actual_multiplier) {
                    (true, Some(m)) => l.amount * m,
                    _ => 0.0,
                };
                LegOutcome {
                    amount: l.amount,
                    target_multiplier: l.target_multiplier,
                    cashed_out: l.cashed_out,
                    actual_multiplier: l.actual_multiplier.filter(|_| l.cashed_out),
                    payout,
                }
            })
            .collect();
        let outcome = BetSetOutcome {
            bet_set_id: set.id,
            is_live: set.is_live,
            round_multiplier,
            legs,
            placed_at_ns: set.placed_at_ns,
            settled_at_ns: now_ns(),
        };
        info!(
            bet_set = set.id,
            round = ?round_multiplier,
            net = outcome.net(),
            "[CASHOUT] bet set settled"
        );
        Some(outcome)
    }
}

fn validate_leg(index: usize, leg: &LegRequest) -> Result<(), PlacementError> {
    if !leg.amount.is_finite() || leg.amount <= 0.0 {
        return Err(PlacementError::InvalidLeg { index, reason: "amount must be positive".to_string() });
    }
    if !leg.target.is_finite() || leg.target <= 1.0 {
        return Err(PlacementError::InvalidLeg { index, reason: "target must exceed 1.00".to_string() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legs() -> [LegRequest; 2] {
        [LegRequest { amount: 10.0, target: 1.5 }, LegRequest { amount: 5.0, target: 3.0 }]
    }

    fn monitoring_book() -> (BetBook, u64) {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let id = book.try_open(legs(), Phase::Betting, Instant::now()).unwrap();
        assert!(book.placement_done(id, &Ok(())));
        assert!(book.on_round_started());
        (book, id)
    }

    #[test]
    fn placement_needs_enabled_betting_phase() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let now = Instant::now();
        assert!(matches!(book.try_open(legs(), Phase::Live, now), Err(PlacementError::NotBettingPhase)));
        book.set_enabled(false);
        assert!(matches!(book.try_open(legs(), Phase::Betting, now), Err(PlacementError::Disabled)));
    }

    #[test]
    fn second_placement_inside_cooldown_is_rejected() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let t0 = Instant::now();
        let first = book.try_open(legs(), Phase::Betting, t0).unwrap();

        let err = book
            .try_open(legs(), Phase::Betting, t0 + Duration::from_millis(1200))
            .unwrap_err();
        match err {
            PlacementError::Cooldown { remaining_ms } => assert_eq!(remaining_ms, 1800),
            other => panic!("expected cooldown, got {other:?}"),
        }

        let set = book.active().unwrap();
        assert_eq!(set.id, first);
        assert_eq!(set.status, BetSetStatus::Placing);
        assert_eq!(set.legs[0].amount, 10.0);
    }

    #[test]
    fn invalid_leg_is_rejected() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let bad = [LegRequest { amount: 10.0, target: 1.5 }, LegRequest { amount: 0.0, target: 2.0 }];
        assert!(matches!(
            book.try_open(bad, Phase::Betting, Instant::now()),
            Err(PlacementError::InvalidLeg { index: 1, .. })
        ));
    }

    #[test]
    fn failed_placement_drops_the_set() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let id = book.try_open(legs(), Phase::Betting, Instant::now()).unwrap();
        book.placement_done(id, &Err(PlacementError::Cancelled));
        assert!(book.active().is_none());
        assert!(!book.on_round_started());
    }

    #[test]
    fn cashout_marks_crossing_leg_only() {
        let (mut book, id) = monitoring_book();
        for m in [1.0, 1.2, 1.49] {
            assert!(book.due_cashouts(m).is_empty());
        }
        assert_eq!(book.due_cashouts(1.53), vec![0]);
        assert!(book.cashout_result(id, 0, true, true));
        for m in [1.8, 2.4] {
            assert!(book.due_cashouts(m).is_empty());
        }

        let outcome = book.settle(Some(2.47)).unwrap();
        assert!(outcome.legs[0].cashed_out);
        assert_eq!(outcome.legs[0].actual_multiplier, Some(1.53));
        assert!(!outcome.legs[1].cashed_out);
        assert_eq!(outcome.legs[1].actual_multiplier, None);
        assert_eq!(outcome.legs[1].payout, 0.0);
        assert!(book.active().is_none());
    }

    #[test]
    fn failed_cashout_reverts_then_retries() {
        let (mut book, id) = monitoring_book();
        assert_eq!(book.due_cashouts(1.6), vec![0]);
        assert!(book.due_cashouts(1.7).is_empty(), "in flight legs are not re-dispatched");
        book.cashout_result(id, 0, false, true);
        assert!(!book.active().unwrap().legs[0].cashed_out);
        assert_eq!(book.due_cashouts(1.75), vec![0]);
        assert_eq!(book.active().unwrap().legs[0].actual_multiplier, Some(1.75));
    }

    #[test]
    fn refused_cashout_retires_the_leg() {
        let (mut book, id) = monitoring_book();
        book.due_cashouts(1.6);
        book.cashout_result(id, 0, false, false);
        assert!(book.active().unwrap().legs[0].retired);
        assert!(book.due_cashouts(2.0).is_empty());
    }

    #[test]
    fn both_legs_resolved_stops_monitor() {
        let (mut book, id) = monitoring_book();
        assert_eq!(book.due_cashouts(3.1), vec![0, 1]);
        assert!(!book.all_resolved());
        book.cashout_result(id, 0, true, true);
        book.cashout_result(id, 1, true, true);
        assert!(book.all_resolved());
    }

    #[test]
    fn stale_results_are_ignored_after_disable() {
        let (mut book, id) = monitoring_book();
        book.due_cashouts(1.6);
        assert_eq!(book.set_enabled(false), Some(id));
        assert!(!book.cashout_result(id, 0, true, true));
        assert!(book.settle(Some(2.0)).is_none());
    }

    #[test]
    fn set_placed_into_a_live_round_monitors_it() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let id = book.try_open(legs(), Phase::Betting, Instant::now()).unwrap();
        assert!(!book.on_round_started());
        assert!(book.placement_done(id, &Ok(())));
        assert!(book.is_monitoring());
        assert_eq!(book.due_cashouts(1.8), vec![0]);
    }

    #[test]
    fn set_placed_after_its_round_ended_waits_for_the_next() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let id = book.try_open(legs(), Phase::Betting, Instant::now()).unwrap();
        book.on_round_started();
        assert!(book.settle(Some(1.2)).is_none());
        book.placement_done(id, &Ok(()));
        assert_eq!(book.active().unwrap().status, BetSetStatus::Armed);
    }

    #[test]
    fn armed_set_is_not_settled_by_the_current_round() {
        let mut book = BetBook::new(Duration::from_secs(3), false);
        let id = book.try_open(legs(), Phase::Betting, Instant::now()).unwrap();
        book.placement_done(id, &Ok(()));
        assert!(book.settle(Some(1.9)).is_none());
        assert_eq!(book.active().unwrap().status, BetSetStatus::Armed);
    }
}
