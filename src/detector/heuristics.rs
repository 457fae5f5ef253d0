//! Pure round-end heuristics. Each one looks at the previous detector memory
//! and the current snapshot and says whether, and at what multiplier, a round
//! may have just ended. None of them mutate anything.

use std::time::{Duration, Instant};

use crate::config::thresholds::{
    BET_DROP_MAX_HEAD, BET_DROP_MIN_COUNT, INSTANT_CRASH, MULTIPLIER_BASELINE, PROFIT_FLOOR,
};

const EPS: f64 = 1e-9;

fn same(a: f64, b: f64) -> bool {
    (a - b).abs() < EPS
}

/// True if `next` carries at least one result that `prev` did not.
///
/// A new entry shows up either as a different head, or as the whole strip
/// shifting right by one (two identical crash points in a row). An all-equal
/// strip that did not grow is indistinguishable from "unchanged" and counts
/// as unchanged.
pub fn history_advanced(prev: &[f64], next: &[f64]) -> bool {
    let (Some(&next_head), Some(&prev_head)) = (next.first(), prev.first()) else {
        return false;
    };
    if !same(next_head, prev_head) {
        return true;
    }
    if next.len() == prev.len() && next.iter().zip(prev).all(|(a, b)| same(*a, *b)) {
        return false;
    }
    next.len() >= 2
        && next.len() >= prev.len()
        && next[1..].iter().zip(prev).all(|(a, b)| same(*a, *b))
}

/// Crash point to report when running flips to false.
///
/// Priority: the value on screen if it has not reset yet, else the last
/// non-zero value seen while running, else the peak, else an instant crash.
pub fn settled_multiplier(current: f64, running: f64, max_running: f64) -> f64 {
    if current >= MULTIPLIER_BASELINE {
        current.max(1.0)
    } else if running > 0.0 {
        running.max(1.0)
    } else if max_running > 0.0 {
        max_running.max(1.0)
    } else {
        INSTANT_CRASH
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEdge {
    /// Countdown disappeared: betting closed, round starting.
    Hidden,
    /// Countdown reappeared: next betting phase open.
    Shown,
    None,
}

pub fn countdown_edge(was_visible: bool, is_visible: bool) -> CountdownEdge {
    match (was_visible, is_visible) {
        (true, false) => CountdownEdge::Hidden,
        (false, true) => CountdownEdge::Shown,
        _ => CountdownEdge::None,
    }
}

/// The countdown went away and came back without a multiplier ever being
/// readable: the round crashed at 1.00 before any tick caught it.
pub fn countdown_instant_crash(
    hidden_at: Option<Instant>,
    now: Instant,
    saw_multiplier: bool,
    ceiling: Duration,
) -> bool {
    if saw_multiplier {
        return false;
    }
    let Some(hidden_at) = hidden_at else {
        return false;
    };
    let elapsed = now.saturating_duration_since(hidden_at);
    !elapsed.is_zero() && elapsed < ceiling
}

/// Crowd of bets vanished at once while a very low result just landed.
/// Returns the fresh head if the pattern matches.
pub fn bet_count_drop(prev_bet_count: u32, bet_count: u32, fresh_head: Option<f64>) -> Option<f64> {
    let head = fresh_head?;
    if prev_bet_count >= BET_DROP_MIN_COUNT && bet_count == 0 && head <= BET_DROP_MAX_HEAD {
        Some(head)
    } else {
        None
    }
}

/// Nobody can have cashed out profitably in a round this short.
pub fn paid_for(multiplier: f64, total_paid: f64) -> f64 {
    if multiplier <= PROFIT_FLOOR {
        0.0
    } else {
        total_paid
    }
}
