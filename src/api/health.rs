//! Engine status shared with the /health endpoint.
//! The engine and the round writer store, the API only loads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct HealthState {
    pub enabled: AtomicBool,
    /// Recovery gave up; the engine loop has stopped.
    pub halted: AtomicBool,
    pub resyncing: AtomicBool,
    pub bet_active: AtomicBool,
    /// Nanosecond timestamps, 0 = never.
    pub last_snapshot_at_ns: AtomicU64,
    pub last_round_at_ns: AtomicU64,
    pub rounds_emitted: AtomicU64,
    /// Events handed to the writer and not yet stored.
    pub write_queue_pending: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub enabled: bool,
    pub halted: bool,
    pub resyncing: bool,
    pub bet_active: bool,
    pub last_snapshot_at_ns: Option<u64>,
    pub last_round_at_ns: Option<u64>,
    pub rounds_emitted: u64,
    pub write_queue_pending: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, v: bool) {
        self.enabled.store(v, Ordering::Relaxed);
    }

    pub fn set_halted(&self) {
        self.halted.store(true, Ordering::Relaxed);
    }

    pub fn set_resyncing(&self, v: bool) {
        self.resyncing.store(v, Ordering::Relaxed);
    }

    pub fn set_bet_active(&self, v: bool) {
        self.bet_active.store(v, Ordering::Relaxed);
    }

    pub fn mark_snapshot(&self, ns: u64) {
        self.last_snapshot_at_ns.store(ns, Ordering::Relaxed);
    }

    pub fn mark_round(&self, ns: u64) {
        self.last_round_at_ns.store(ns, Ordering::Relaxed);
        self.rounds_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_queue_pending(&self) {
        self.write_queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_write_queue_pending(&self) {
        let _ = self
            .write_queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> HealthReport {
        let ts = |a: &AtomicU64| Some(a.load(Ordering::Relaxed)).filter(|ns| *ns > 0);
        HealthReport {
            enabled: self.enabled.load(Ordering::Relaxed),
            halted: self.is_halted(),
            resyncing: self.resyncing.load(Ordering::Relaxed),
            bet_active: self.bet_active.load(Ordering::Relaxed),
            last_snapshot_at_ns: ts(&self.last_snapshot_at_ns),
            last_round_at_ns: ts(&self.last_round_at_ns),
            rounds_emitted: self.rounds_emitted.load(Ordering::Relaxed),
            write_queue_pending: self.write_queue_pending.load(Ordering::Relaxed),
        }
    }
}
