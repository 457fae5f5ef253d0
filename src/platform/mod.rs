pub mod agent;
pub mod paper;
pub mod webdriver;

use async_trait::async_trait;

use crate::error::ActionError;

pub use agent::AgentActions;
pub use paper::PaperActions;
pub use webdriver::WebDriverActions;

/// Bet and cash-out controls on the platform. `leg` is 0 or 1.
#[async_trait]
pub trait PlatformActions: Send + Sync {
    async fn set_stake(&self, leg: usize, amount: f64) -> Result<(), ActionError>;

    async fn submit(&self, leg: usize) -> Result<(), ActionError>;

    async fn cashout(&self, leg: usize) -> Result<(), ActionError>;

    async fn can_bet(&self, leg: usize) -> bool;

    async fn can_cashout(&self, leg: usize) -> bool;
}
