use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One read of the remote view's visible fields. Replaced every tick.
#[derive(Debug, Clone)]
pub struct GameSnapshot {
    /// Current multiplier; 0 after a running round means the view already reset.
    pub multiplier: f64,
    pub is_round_running: bool,
    /// Most recent first.
    pub history: Vec<f64>,
    pub bet_count: u32,
    pub total_staked: f64,
    pub total_paid: f64,
    pub is_countdown_visible: bool,
    /// Nanosecond UTC epoch timestamp.
    pub captured_at_ns: u64,
    /// For phase timing and latency measurement.
    pub captured_at: Instant,
}

impl GameSnapshot {
    pub fn history_head(&self) -> Option<f64> {
        self.history.first().copied()
    }
}

/// Opaque reference to the re-acquired per-round view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewHandle(pub String);

impl std::fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Round events
// ---------------------------------------------------------------------------

/// Which heuristic produced an emitted round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedBy {
    HistoryDiff,
    StateTransition,
    CountdownTransition,
    BetCountDrop,
}

impl std::fmt::Display for DetectedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DetectedBy::HistoryDiff => "history_diff",
            DetectedBy::StateTransition => "state_transition",
            DetectedBy::CountdownTransition => "countdown_transition",
            DetectedBy::BetCountDrop => "bet_count_drop",
        };
        write!(f, "{s}")
    }
}

/// A round-end guess from one heuristic, not yet through the guard.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundCandidate {
    pub multiplier: f64,
    pub bet_count: u32,
    pub total_staked: f64,
    pub total_paid: f64,
    pub detected_by: DetectedBy,
}

impl RoundCandidate {
    pub fn into_round(self, created_at_ns: u64) -> RoundCompleted {
        RoundCompleted {
            multiplier: self.multiplier,
            bet_count: self.bet_count,
            total_staked: self.total_staked,
            total_paid: self.total_paid,
            detected_by: self.detected_by,
            created_at_ns,
        }
    }
}

/// Canonical "a round just ended" event. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundCompleted {
    /// Always >= 1.0.
    pub multiplier: f64,
    pub bet_count: u32,
    pub total_staked: f64,
    pub total_paid: f64,
    pub detected_by: DetectedBy,
    /// Nanosecond UTC epoch timestamp.
    pub created_at_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BettingPhaseStarted {
    pub last_multiplier: Option<f64>,
    pub timestamp_ns: u64,
}

/// Coarse phase of the game as seen by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing observed yet.
    Unknown,
    Betting,
    Live,
    /// Running just turned false, crash point not confirmed yet.
    Settling,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Unknown => "unknown",
            Phase::Betting => "betting",
            Phase::Live => "live",
            Phase::Settling => "settling",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Requested stake and target for one leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegRequest {
    pub amount: f64,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetLeg {
    pub amount: f64,
    pub target_multiplier: f64,
    pub cashed_out: bool,
    pub actual_multiplier: Option<f64>,
    /// A cash-out action for this leg has been dispatched and not answered yet.
    pub in_flight: bool,
    /// The platform refused further cash-out attempts for this leg.
    pub retired: bool,
}

impl BetLeg {
    pub fn new(req: LegRequest) -> Self {
        Self {
            amount: req.amount,
            target_multiplier: req.target,
            cashed_out: false,
            actual_multiplier: None,
            in_flight: false,
            retired: false,
        }
    }

    /// Cashed out, or nothing more can be done for it this round.
    pub fn is_resolved(&self) -> bool {
        (self.cashed_out && !self.in_flight) || self.retired
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSetStatus {
    /// Leg actions are being submitted.
    Placing,
    /// Both legs accepted, waiting for the next Live phase.
    Armed,
    /// Live phase running, cash-out monitor active.
    Monitoring,
}

impl std::fmt::Display for BetSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BetSetStatus::Placing => "placing",
            BetSetStatus::Armed => "armed",
            BetSetStatus::Monitoring => "monitoring",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct ActiveBetSet {
    /// Generation tag; action results carrying another id are stale.
    pub id: u64,
    pub legs: [BetLeg; 2],
    pub placed_at: Instant,
    pub placed_at_ns: u64,
    /// Whether actions have real-world effect.
    pub is_live: bool,
    pub status: BetSetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegOutcome {
    pub amount: f64,
    pub target_multiplier: f64,
    pub cashed_out: bool,
    pub actual_multiplier: Option<f64>,
    /// Gross return; 0 for a lost leg.
    pub payout: f64,
}

/// Result of a bet set once its round has ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetSetOutcome {
    pub bet_set_id: u64,
    pub is_live: bool,
    pub round_multiplier: Option<f64>,
    pub legs: Vec<LegOutcome>,
    pub placed_at_ns: u64,
    pub settled_at_ns: u64,
}

impl BetSetOutcome {
    pub fn net(&self) -> f64 {
        self.legs.iter().map(|l| l.payout - l.amount).sum()
    }
}

// ---------------------------------------------------------------------------
// Events handed to the publisher's channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ObserverEvent {
    RoundCompleted(RoundCompleted),
    BettingPhaseStarted(BettingPhaseStarted),
    BetSetSettled(BetSetOutcome),
    ObserverFatal(String),
}

pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
