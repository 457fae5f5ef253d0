use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const WEBDRIVER_URL: &str = "http://127.0.0.1:4444";
pub const PUSH_LISTEN_ADDR: &str = "127.0.0.1:8765";

/// Round-detection poll period (milliseconds).
pub const POLL_INTERVAL_MS: u64 = 100;

/// Cash-out monitor poll period while a bet is live (milliseconds).
pub const CASHOUT_INTERVAL_MS: u64 = 50;

/// Periodic failure-signature scan (seconds).
pub const RECOVERY_CHECK_INTERVAL_SECS: u64 = 10;

/// Heartbeat / standby check period (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Wall-clock gap between ticks that is treated as host standby (seconds).
pub const STANDBY_GAP_SECS: u64 = 30;

/// Pause after running→stopped before the confirming read (milliseconds).
pub const SETTLE_DELAY_MS: u64 = 60;

/// Two emissions closer than this with near-equal multipliers are the same round (milliseconds).
pub const EMIT_COOLDOWN_MS: u64 = 2_500;

/// Minimum gap between two accepted bet placements (milliseconds).
pub const PLACEMENT_COOLDOWN_MS: u64 = 3_000;

/// Pause between placing leg 0 and leg 1 so the page registers the first (milliseconds).
pub const LEG_SETTLE_PAUSE_MS: u64 = 300;

/// Countdown hidden longer than this is not a plausible instant crash (seconds).
pub const COUNTDOWN_CEILING_SECS: u64 = 30;

/// Minimum gap between two recovery checks triggered by a Live-phase start (seconds).
pub const LIVE_CHECK_MIN_GAP_SECS: u64 = 5;

/// Upper bound on any single call into the telemetry source (milliseconds).
pub const SOURCE_TIMEOUT_MS: u64 = 2_000;

/// Upper bound on any single platform action (milliseconds).
pub const ACTION_TIMEOUT_MS: u64 = 1_500;

/// Wait after a reload before trying to re-acquire the view (milliseconds).
pub const RESYNC_STABILIZE_MS: u64 = 3_000;

/// Re-acquire backoff; its length is the retry budget.
pub const REACQUIRE_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 4_000, 8_000];

/// Push snapshots older than this mean the capture agent is gone (milliseconds).
pub const PUSH_STALE_MS: u64 = 2_000;

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Multiplier thresholds used by round detection.
pub mod thresholds {
    /// A settled multiplier at or above this is a real crash point, below it the view has reset.
    pub const MULTIPLIER_BASELINE: f64 = 0.99;
    /// Rounds at or below this paid nobody.
    pub const PROFIT_FLOOR: f64 = 1.05;
    /// Two multipliers closer than this are the same value.
    pub const DEDUP_TOLERANCE: f64 = 0.01;
    /// Bet-count drop corroboration: the count must have been at least this.
    pub const BET_DROP_MIN_COUNT: u32 = 10;
    /// Bet-count drop corroboration: the fresh history head must be at most this.
    pub const BET_DROP_MAX_HEAD: f64 = 1.10;
    /// Fallback crash point when no multiplier was ever read.
    pub const INSTANT_CRASH: f64 = 1.00;
}

// ---------------------------------------------------------------------------
// Platform profile: data only, one per platform
// ---------------------------------------------------------------------------

/// CSS selectors for the visible game fields. Each field lists candidates;
/// the first one that matches on the page wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSelectors {
    pub multiplier: Vec<String>,
    /// Present only while the round is live.
    pub running: Vec<String>,
    /// Items of the recent-results strip, most recent first.
    pub history: Vec<String>,
    pub bet_count: Vec<String>,
    pub total_staked: Vec<String>,
    pub total_paid: Vec<String>,
    pub countdown: Vec<String>,
    /// Dedicated error / session banner, scanned before falling back to body text.
    pub failure_banner: Vec<String>,
}

impl Default for SnapshotSelectors {
    fn default() -> Self {
        let v = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            multiplier: v(&[".crash-multiplier", "[data-role=multiplier]"]),
            running: v(&[".crash-game.is-running", "[data-state=running]"]),
            history: v(&[".crash-history .item", "[data-role=history] > *"]),
            bet_count: v(&[".bets-count", "[data-role=bet-count]"]),
            total_staked: v(&[".bets-total", "[data-role=total-staked]"]),
            total_paid: v(&[".bets-paid", "[data-role=total-paid]"]),
            countdown: v(&[".crash-countdown", "[data-role=countdown]"]),
            failure_banner: v(&[".session-error", ".modal-error", "[role=alert]"]),
        }
    }
}

/// Per-leg control selectors used by the WebDriver actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegSelectors {
    pub stake_input: String,
    pub submit_button: String,
    pub cashout_button: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformProfile {
    pub name: String,
    pub poll_interval_ms: u64,
    pub cashout_interval_ms: u64,
    pub emit_cooldown_ms: u64,
    pub placement_cooldown_ms: u64,
    /// Substrings that mark a session / authorization failure on the page.
    pub failure_signatures: Vec<String>,
    /// Candidate selectors for the per-round view (usually the game iframe).
    pub view_selectors: Vec<String>,
    pub selectors: SnapshotSelectors,
    pub legs: [LegSelectors; 2],
    /// Treat a sharp bet-count drop with a low fresh head as an instant crash.
    pub bet_drop_corroboration: bool,
}

impl Default for PlatformProfile {
    fn default() -> Self {
        let leg = |i: usize| LegSelectors {
            stake_input: format!(".bet-panel:nth-of-type({}) input.stake", i + 1),
            submit_button: format!(".bet-panel:nth-of-type({}) button.bet", i + 1),
            cashout_button: format!(".bet-panel:nth-of-type({}) button.cashout", i + 1),
        };
        Self {
            name: "default".to_string(),
            poll_interval_ms: POLL_INTERVAL_MS,
            cashout_interval_ms: CASHOUT_INTERVAL_MS,
            emit_cooldown_ms: EMIT_COOLDOWN_MS,
            placement_cooldown_ms: PLACEMENT_COOLDOWN_MS,
            failure_signatures: vec![
                "session expired".to_string(),
                "sesión expirada".to_string(),
                "unauthorized".to_string(),
                "no autorizado".to_string(),
                "please log in".to_string(),
                "inicie sesión".to_string(),
            ],
            view_selectors: vec![
                "iframe#game-frame".to_string(),
                "iframe[src*=crash]".to_string(),
                "iframe".to_string(),
            ],
            selectors: SnapshotSelectors::default(),
            legs: [leg(0), leg(1)],
            bet_drop_corroboration: false,
        }
    }
}

impl PlatformProfile {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let profile: PlatformProfile = serde_json::from_str(&raw)?;
        if profile.poll_interval_ms == 0 || profile.cashout_interval_ms == 0 {
            return Err(AppError::Config(format!(
                "profile {path}: poll intervals must be non-zero"
            )));
        }
        Ok(profile)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cashout_interval(&self) -> Duration {
        Duration::from_millis(self.cashout_interval_ms)
    }

    pub fn emit_cooldown(&self) -> Duration {
        Duration::from_millis(self.emit_cooldown_ms)
    }

    pub fn placement_cooldown(&self) -> Duration {
        Duration::from_millis(self.placement_cooldown_ms)
    }
}

// ---------------------------------------------------------------------------
// Process config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Drive a browser through a WebDriver endpoint and poll the page.
    WebDriver {
        url: String,
        /// Attach to an existing session instead of creating one.
        session: Option<String>,
        game_url: Option<String>,
    },
    /// Accept snapshots pushed by an in-page capture agent.
    Push { listen_addr: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub source: SourceKind,
    /// Actions have real-world effect (LIVE_TRADING=true); otherwise paper actions.
    pub live_trading: bool,
    pub profile: PlatformProfile,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let source = match std::env::var("SOURCE").unwrap_or_else(|_| "webdriver".to_string()).as_str() {
            "webdriver" => SourceKind::WebDriver {
                url: std::env::var("WEBDRIVER_URL").unwrap_or_else(|_| WEBDRIVER_URL.to_string()),
                session: std::env::var("WEBDRIVER_SESSION").ok().filter(|s| !s.is_empty()),
                game_url: std::env::var("GAME_URL").ok().filter(|s| !s.is_empty()),
            },
            "push" => SourceKind::Push {
                listen_addr: std::env::var("PUSH_LISTEN_ADDR")
                    .unwrap_or_else(|_| PUSH_LISTEN_ADDR.to_string())
                    .parse::<SocketAddr>()
                    .map_err(|_| AppError::Config("PUSH_LISTEN_ADDR must be host:port".to_string()))?,
            },
            other => {
                return Err(AppError::Config(format!(
                    "SOURCE must be 'webdriver' or 'push', got '{other}'"
                )))
            }
        };

        let mut profile = match std::env::var("PLATFORM_PROFILE") {
            Ok(path) if !path.is_empty() => PlatformProfile::load(&path)?,
            _ => PlatformProfile::default(),
        };
        if let Some(ms) = env_u64("POLL_INTERVAL_MS") {
            profile.poll_interval_ms = ms.max(1);
        }
        if let Some(ms) = env_u64("CASHOUT_INTERVAL_MS") {
            profile.cashout_interval_ms = ms.max(1);
        }

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "observer.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            source,
            live_trading: std::env::var("LIVE_TRADING")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            profile,
        })
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}
