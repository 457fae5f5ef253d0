use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ActionError;
use crate::platform::PlatformActions;
use crate::source::messages::AgentCmd;
use crate::source::push::{Ack, PushFeed};

/// Controls driven by the in-page capture agent over the push socket.
pub struct AgentActions {
    feed: Arc<PushFeed>,
}

impl AgentActions {
    pub fn new(feed: Arc<PushFeed>) -> Self {
        Self { feed }
    }

    async fn act(&self, cmd: AgentCmd) -> Result<(), ActionError> {
        match self.feed.request(cmd).await? {
            Ack { ok: true, .. } => Ok(()),
            Ack { ok: false, error } => Err(ActionError::Rejected(error.unwrap_or_else(|| "rejected by agent".to_string()))),
        }
    }

    async fn ask(&self, cmd: AgentCmd) -> bool {
        match self.feed.request(cmd.clone()).await {
            Ok(ack) => ack.ok,
            Err(e) => {
                debug!(?cmd, "[AGENT] query failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl PlatformActions for AgentActions {
    async fn set_stake(&self, leg: usize, amount: f64) -> Result<(), ActionError> {
        self.act(AgentCmd::SetStake { leg, amount }).await
    }

    async fn submit(&self, leg: usize) -> Result<(), ActionError> {
        self.act(AgentCmd::Submit { leg }).await
    }

    async fn cashout(&self, leg: usize) -> Result<(), ActionError> {
        self.act(AgentCmd::Cashout { leg }).await
    }

    async fn can_bet(&self, leg: usize) -> bool {
        self.ask(AgentCmd::CanBet { leg }).await
    }

    async fn can_cashout(&self, leg: usize) -> bool {
        self.ask(AgentCmd::CanCashout { leg }).await
    }
}
