mod api;
mod config;
mod db;
mod detector;
mod engine;
mod error;
mod execution;
mod platform;
mod poller;
mod publisher;
mod recovery;
mod scheduler;
mod source;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, SourceKind, CHANNEL_CAPACITY, PUSH_STALE_MS, SOURCE_TIMEOUT_MS};
use crate::db::RoundWriter;
use crate::engine::{Engine, EngineConfig, EngineDeps};
use crate::error::{AppError, Result};
use crate::platform::{AgentActions, PaperActions, PlatformActions, WebDriverActions};
use crate::publisher::ChannelPublisher;
use crate::recovery::SignatureMatcher;
use crate::source::{PushFeed, TelemetrySource, WebDriverClient, WebDriverSource};
use crate::types::{BetSetOutcome, ObserverEvent, RoundCompleted};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Telemetry source and platform actions ---
    let (source, live_actions) = build_source(&cfg).await?;
    let actions: Arc<dyn PlatformActions> = if cfg.live_trading {
        warn!("LIVE_TRADING is on: bet and cash-out actions have real effect");
        live_actions
    } else {
        info!("Paper trading: actions are logged only");
        Arc::new(PaperActions::new())
    };

    match tokio::time::timeout(Duration::from_millis(SOURCE_TIMEOUT_MS), source.reacquire()).await {
        Ok(Ok(view)) => info!(%view, "Initial view acquired"),
        Ok(Err(e)) => warn!("Initial view not acquired yet, recovery will retry: {e}"),
        Err(_) => warn!("Initial view acquisition timed out, recovery will retry"),
    }

    // --- Shared state and channels ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);

    // Event consumer: log + persist
    let consumer_pool = pool.clone();
    let consumer_health = Arc::clone(&health);
    tokio::spawn(async move {
        event_consumer(event_rx, consumer_pool, consumer_health).await;
    });

    // --- Engine ---
    let profile = &cfg.profile;
    info!(
        profile = %profile.name,
        signatures = profile.failure_signatures.len(),
        "Platform profile loaded"
    );
    let deps = EngineDeps {
        source,
        actions,
        publisher: Arc::new(ChannelPublisher::new(event_tx)),
        is_failure: Arc::new(SignatureMatcher::new(&profile.failure_signatures).into_predicate()),
        health: Arc::clone(&health),
        latency: Arc::clone(&latency),
    };
    let engine = Engine::new(EngineConfig::from_profile(profile, cfg.live_trading), deps, cmd_rx);
    let engine_task = tokio::spawn(engine.run());

    // --- HTTP API server ---
    let api_state = ApiState { pool: pool.clone(), health, latency, commands: cmd_tx };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // The engine only stops when recovery gives up; that ends the process.
    tokio::select! {
        res = engine_task => {
            // Let the fatal event reach the log and the writer.
            tokio::time::sleep(Duration::from_millis(200)).await;
            match res {
                Ok(result) => result,
                Err(e) => Err(AppError::ObserverFatal(format!("engine task failed: {e}"))),
            }
        }
        res = server => {
            match res {
                Ok(result) => result.map_err(AppError::from),
                Err(e) => Err(AppError::Config(format!("HTTP server task failed: {e}"))),
            }
        }
    }
}

/// Telemetry source plus the actions that reach the same page.
async fn build_source(cfg: &Config) -> Result<(Arc<dyn TelemetrySource>, Arc<dyn PlatformActions>)> {
    match &cfg.source {
        SourceKind::WebDriver { url, session, game_url } => {
            let client = Arc::new(WebDriverClient::connect(url, session.clone(), game_url.clone()).await?);
            info!(%url, "WebDriver source ready");
            let source = WebDriverSource::new(
                Arc::clone(&client),
                cfg.profile.selectors.clone(),
                cfg.profile.view_selectors.clone(),
            );
            let actions: Arc<dyn PlatformActions> =
                Arc::new(WebDriverActions::new(client, cfg.profile.legs.clone()));
            let source: Arc<dyn TelemetrySource> = Arc::new(source);
            Ok((source, actions))
        }
        SourceKind::Push { listen_addr } => {
            let feed = PushFeed::new(Duration::from_millis(PUSH_STALE_MS));
            let listener = tokio::net::TcpListener::bind(listen_addr).await?;
            info!(%listen_addr, "Waiting for capture agent");
            tokio::spawn(Arc::clone(&feed).serve(listener));
            let actions: Arc<dyn PlatformActions> = Arc::new(AgentActions::new(Arc::clone(&feed)));
            let source: Arc<dyn TelemetrySource> = feed;
            Ok((source, actions))
        }
    }
}

/// Consumes observer events: logs them and forwards the durable ones to the writer.
async fn event_consumer(mut rx: mpsc::Receiver<ObserverEvent>, pool: sqlx::SqlitePool, health: Arc<HealthState>) {
    let writer_tx = {
        let (tx, writer_rx) = mpsc::channel::<ObserverEvent>(CHANNEL_CAPACITY);
        let writer = RoundWriter::new(pool, writer_rx, Arc::clone(&health));
        tokio::spawn(async move { writer.run().await });
        tx
    };

    while let Some(event) = rx.recv().await {
        match &event {
            ObserverEvent::RoundCompleted(r) => log_round(r),
            ObserverEvent::BettingPhaseStarted(b) => {
                info!(last = ?b.last_multiplier, "[EVENT] betting phase started");
                continue;
            }
            ObserverEvent::BetSetSettled(o) => log_bet_set(o),
            ObserverEvent::ObserverFatal(reason) => {
                error!(%reason, "[EVENT] observer fatal, stopping");
                continue;
            }
        }
        health.inc_write_queue_pending();
        if let Err(e) = writer_tx.try_send(event) {
            health.dec_write_queue_pending();
            warn!("[EVENT] writer channel full, dropping event: {e}");
        }
    }
}

fn log_round(r: &RoundCompleted) {
    info!(
        "[ROUND] {:.2}x via {} | bets={} staked={:.2} paid={:.2}",
        r.multiplier, r.detected_by, r.bet_count, r.total_staked, r.total_paid,
    );
}

fn log_bet_set(o: &BetSetOutcome) {
    let legs: Vec<String> = o
        .legs
        .iter()
        .map(|l| match l.actual_multiplier {
            Some(m) => format!("{:.2}@{:.2}x (target {:.2}x)", l.amount, m, l.target_multiplier),
            None => format!("{:.2} lost (target {:.2}x)", l.amount, l.target_multiplier),
        })
        .collect();
    info!(
        "[BETS] set {} {} | round={} | {} | net={:+.2}",
        o.bet_set_id,
        if o.is_live { "live" } else { "paper" },
        o.round_multiplier.map(|m| format!("{m:.2}x")).unwrap_or_else(|| "?".to_string()),
        legs.join(", "),
        o.net(),
    );
}
