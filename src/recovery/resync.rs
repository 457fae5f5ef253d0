use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::SourceError;
use crate::source::TelemetrySource;
use crate::types::ViewHandle;

#[derive(Debug, Clone)]
pub struct ResyncPlan {
    pub call_timeout: Duration,
    /// Wait after reload before the first reacquire attempt.
    pub stabilize: Duration,
    /// Delay before each reacquire attempt; its length is the retry budget.
    pub backoff: Vec<Duration>,
}

/// Reload the source, let it settle, then reacquire the view within the
/// backoff budget. The error is the last reacquire failure.
pub async fn resync(source: Arc<dyn TelemetrySource>, plan: ResyncPlan) -> Result<ViewHandle, SourceError> {
    match tokio::time::timeout(plan.call_timeout, source.reload()).await {
        Ok(Ok(())) => info!("[RECOVERY] source reloaded"),
        Ok(Err(e)) => warn!("[RECOVERY] reload failed, reacquiring anyway: {e}"),
        Err(_) => warn!(timeout_ms = plan.call_timeout.as_millis() as u64, "[RECOVERY] reload timed out"),
    }
    tokio::time::sleep(plan.stabilize).await;

    let mut last_err = SourceError::ViewLost("no reacquire attempt made".to_string());
    for (attempt, delay) in plan.backoff.iter().enumerate() {
        tokio::time::sleep(*delay).await;
        let result = match tokio::time::timeout(plan.call_timeout, source.reacquire()).await {
            Ok(r) => r,
            Err(_) => Err(SourceError::Timeout(plan.call_timeout.as_millis() as u64)),
        };
        match result {
            Ok(handle) => {
                info!(attempt = attempt + 1, view = %handle, "[RECOVERY] view reacquired");
                return Ok(handle);
            }
            Err(e) => {
                warn!(attempt = attempt + 1, budget = plan.backoff.len(), "[RECOVERY] reacquire failed: {e}");
                last_err = e;
            }
        }
    }
    Err(last_err)
}
