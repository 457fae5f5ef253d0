use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::api::health::HealthState;
use crate::db::models::RoundRow;
use crate::error::Result;
use crate::types::{BetSetOutcome, ObserverEvent, RoundCompleted};

/// Persists published rounds and settled bet sets to SQLite.
/// Runs as its own task so storage latency never reaches the engine.
pub struct RoundWriter {
    pool: sqlx::SqlitePool,
    rx: mpsc::Receiver<ObserverEvent>,
    health: Arc<HealthState>,
}

impl RoundWriter {
    pub fn new(pool: sqlx::SqlitePool, rx: mpsc::Receiver<ObserverEvent>, health: Arc<HealthState>) -> Self {
        Self { pool, rx, health }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            let result = match &event {
                ObserverEvent::RoundCompleted(round) => write_round(&self.pool, round).await,
                ObserverEvent::BetSetSettled(outcome) => write_bet_set(&self.pool, outcome).await,
                _ => Ok(()),
            };
            self.health.dec_write_queue_pending();
            if let Err(e) = result {
                error!("[DB] write error: {e}");
            }
        }
        debug!("[DB] writer channel closed");
    }
}

pub async fn write_round(pool: &sqlx::SqlitePool, r: &RoundCompleted) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO rounds (multiplier, bet_count, total_staked, total_paid, detected_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(r.multiplier)
    .bind(i64::from(r.bet_count))
    .bind(r.total_staked)
    .bind(r.total_paid)
    .bind(r.detected_by.to_string())
    .bind(r.created_at_ns as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn write_bet_set(pool: &sqlx::SqlitePool, o: &BetSetOutcome) -> Result<()> {
    let legs_json = serde_json::to_string(&o.legs)?;
    sqlx::query(
        r#"
        INSERT INTO bet_sets (bet_set_id, is_live, round_multiplier, legs_json, net, placed_at, settled_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(o.bet_set_id as i64)
    .bind(i64::from(o.is_live))
    .bind(o.round_multiplier)
    .bind(legs_json)
    .bind(o.net())
    .bind(o.placed_at_ns as i64)
    .bind(o.settled_at_ns as i64)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent rounds first.
pub async fn recent_rounds(pool: &sqlx::SqlitePool, limit: i64) -> Result<Vec<RoundRow>> {
    let rows = sqlx::query_as::<_, RoundRow>(
        r#"
        SELECT id, multiplier, bet_count, total_staked, total_paid, detected_by, created_at
        FROM rounds
        ORDER BY created_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::BetSetRow;
    use crate::types::{DetectedBy, LegOutcome};

    async fn memory_pool() -> sqlx::SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn round(multiplier: f64, at: u64) -> RoundCompleted {
        RoundCompleted {
            multiplier,
            bet_count: 37,
            total_staked: 412.5,
            total_paid: 0.0,
            detected_by: DetectedBy::CountdownTransition,
            created_at_ns: at,
        }
    }

    #[tokio::test]
    async fn recent_rounds_newest_first() {
        let pool = memory_pool().await;
        for (i, m) in [1.0, 4.2, 1.87].iter().enumerate() {
            write_round(&pool, &round(*m, 1_000 + i as u64)).await.unwrap();
        }
        let rows = recent_rounds(&pool, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].multiplier, 1.87);
        assert_eq!(rows[1].multiplier, 4.2);
        assert_eq!(rows[0].bet_count, 37);
        assert_eq!(rows[0].detected_by, "countdown_transition");
    }

    #[tokio::test]
    async fn writer_task_persists_bet_sets() {
        let pool = memory_pool().await;
        let (tx, rx) = mpsc::channel(4);
        let health = Arc::new(HealthState::new());
        let writer = RoundWriter::new(pool.clone(), rx, health);
        let outcome = BetSetOutcome {
            bet_set_id: 7,
            is_live: false,
            round_multiplier: Some(2.0),
            legs: vec![LegOutcome {
                amount: 4.0,
                target_multiplier: 1.5,
                cashed_out: true,
                actual_multiplier: Some(1.5),
                payout: 6.0,
            }],
            placed_at_ns: 1,
            settled_at_ns: 2,
        };
        tx.send(ObserverEvent::BetSetSettled(outcome)).await.unwrap();
        drop(tx);
        writer.run().await;

        let rows = sqlx::query_as::<_, BetSetRow>("SELECT * FROM bet_sets")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].bet_set_id, 7);
        assert!((rows[0].net - 2.0).abs() < 1e-9);
        assert!(rows[0].legs_json.contains("\"cashed_out\":true"));
    }
}
