use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::error::ActionError;
use crate::platform::PlatformActions;

/// Actions with no real-world effect. Every control is always available.
#[derive(Default)]
pub struct PaperActions {
    actions: AtomicU64,
}

impl PaperActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action_count(&self) -> u64 {
        self.actions.load(Ordering::Relaxed)
    }

    fn record(&self) -> u64 {
        self.actions.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[async_trait]
impl PlatformActions for PaperActions {
    async fn set_stake(&self, leg: usize, amount: f64) -> Result<(), ActionError> {
        let n = self.record();
        info!(leg, amount, n, "[PAPER] set stake");
        Ok(())
    }

    async fn submit(&self, leg: usize) -> Result<(), ActionError> {
        let n = self.record();
        info!(leg, n, "[PAPER] submit");
        Ok(())
    }

    async fn cashout(&self, leg: usize) -> Result<(), ActionError> {
        let n = self.record();
        info!(leg, n, "[PAPER] cashout");
        Ok(())
    }

    async fn can_bet(&self, _leg: usize) -> bool {
        true
    }

    async fn can_cashout(&self, _leg: usize) -> bool {
        true
    }
}
