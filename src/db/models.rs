//! Row types for the tables in migrations/0001_init.sql.
use serde::Serialize;

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct RoundRow {
    pub id: i64,
    pub multiplier: f64,
    pub bet_count: i64,
    pub total_staked: f64,
    pub total_paid: f64,
    pub detected_by: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct BetSetRow {
    pub id: i64,
    pub bet_set_id: i64,
    pub is_live: i64,
    pub round_multiplier: Option<f64>,
    pub legs_json: String,
    pub net: f64,
    pub placed_at: i64,
    pub settled_at: i64,
}
