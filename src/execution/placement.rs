use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{ActionError, PlacementError};
use crate::platform::PlatformActions;
use crate::types::LegRequest;

/// Bound one platform action; timing out is a retryable failure.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, ActionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ActionError::Timeout(limit.as_millis() as u64)),
    }
}

/// Submit both legs in order. The platform UI must register the first leg
/// before it accepts the second, hence the pause between them.
pub async fn place_legs(
    actions: Arc<dyn PlatformActions>,
    legs: [LegRequest; 2],
    leg_pause: Duration,
    action_timeout: Duration,
) -> Result<(), PlacementError> {
    let started = Instant::now();
    for (i, leg) in legs.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(leg_pause).await;
        }
        let can_bet = tokio::time::timeout(action_timeout, actions.can_bet(i))
            .await
            .unwrap_or(false);
        if !can_bet {
            return Err(ActionError::Unavailable(format!("betting closed for leg {i}")).into());
        }
        bounded(action_timeout, actions.set_stake(i, leg.amount)).await?;
        bounded(action_timeout, actions.submit(i)).await?;
        debug!(leg = i, amount = leg.amount, target = leg.target, "[PLACE] leg submitted");
    }
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "[PLACE] legs submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        closed_leg: Option<usize>,
        slow_submit: bool,
    }

    #[async_trait]
    impl PlatformActions for Recorder {
        async fn set_stake(&self, leg: usize, amount: f64) -> Result<(), ActionError> {
            self.calls.lock().unwrap().push(format!("stake{leg}:{amount}"));
            Ok(())
        }
        async fn submit(&self, leg: usize) -> Result<(), ActionError> {
            if self.slow_submit {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            self.calls.lock().unwrap().push(format!("submit{leg}"));
            Ok(())
        }
        async fn cashout(&self, _leg: usize) -> Result<(), ActionError> {
            Ok(())
        }
        async fn can_bet(&self, leg: usize) -> bool {
            self.closed_leg != Some(leg)
        }
        async fn can_cashout(&self, _leg: usize) -> bool {
            true
        }
    }

    fn legs() -> [LegRequest; 2] {
        [LegRequest { amount: 2.0, target: 1.4 }, LegRequest { amount: 1.0, target: 4.0 }]
    }

    #[tokio::test(start_paused = true)]
    async fn legs_are_submitted_in_order() {
        let rec = Arc::new(Recorder::default());
        place_legs(rec.clone(), legs(), Duration::from_millis(300), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            *rec.calls.lock().unwrap(),
            vec!["stake0:2", "submit0", "stake1:1", "submit1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_second_leg_fails_placement() {
        let rec = Arc::new(Recorder { closed_leg: Some(1), ..Default::default() });
        let err = place_legs(rec.clone(), legs(), Duration::from_millis(300), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::Action(ActionError::Unavailable(_))));
        assert_eq!(rec.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_action_times_out() {
        let rec = Arc::new(Recorder { slow_submit: true, ..Default::default() });
        let err = place_legs(rec, legs(), Duration::from_millis(300), Duration::from_millis(1500))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::Action(ActionError::Timeout(1500))));
    }
}
