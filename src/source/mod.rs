pub mod messages;
pub mod parse;
pub mod push;
pub mod webdriver;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::{GameSnapshot, ViewHandle};

pub use push::PushFeed;
pub use webdriver::{WebDriverClient, WebDriverSource};

/// Provider of the remote view's visible state.
///
/// The core never sees selectors or transport details, only typed snapshots.
/// Every call may suspend; callers bound them with a timeout.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Read the currently visible fields.
    async fn snapshot(&self) -> Result<GameSnapshot, SourceError>;

    /// Re-find the per-round view after a reload.
    async fn reacquire(&self) -> Result<ViewHandle, SourceError>;

    /// Force the underlying page to refresh.
    async fn reload(&self) -> Result<(), SourceError>;

    /// Text to scan for failure signatures: a dedicated error element if one
    /// exists, otherwise the whole visible page.
    async fn page_text(&self) -> Result<String, SourceError>;
}
