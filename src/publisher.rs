use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::types::{BetSetOutcome, BettingPhaseStarted, ObserverEvent, RoundCompleted};

/// Sink for everything the observer reports. Calls come from the engine task
/// and must not block it.
pub trait EventPublisher: Send + Sync {
    fn on_round_completed(&self, round: RoundCompleted);

    fn on_betting_phase_started(&self, event: BettingPhaseStarted);

    fn on_bet_set_settled(&self, outcome: BetSetOutcome);

    fn on_observer_fatal(&self, reason: String);
}

/// Forwards events into a bounded channel for the logging and persistence task.
pub struct ChannelPublisher {
    tx: mpsc::Sender<ObserverEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<ObserverEvent>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: ObserverEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("[PUBLISH] event channel full or closed, dropping event: {e}");
        }
    }
}

impl EventPublisher for ChannelPublisher {
    fn on_round_completed(&self, round: RoundCompleted) {
        self.forward(ObserverEvent::RoundCompleted(round));
    }

    fn on_betting_phase_started(&self, event: BettingPhaseStarted) {
        self.forward(ObserverEvent::BettingPhaseStarted(event));
    }

    fn on_bet_set_settled(&self, outcome: BetSetOutcome) {
        self.forward(ObserverEvent::BetSetSettled(outcome));
    }

    fn on_observer_fatal(&self, reason: String) {
        error!(%reason, "[PUBLISH] observer fatal");
        // Fatal must not be lost to a full queue.
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(ObserverEvent::ObserverFatal(reason)).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DetectedBy;

    #[tokio::test]
    async fn events_reach_the_channel_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let publisher = ChannelPublisher::new(tx);
        publisher.on_round_completed(RoundCompleted {
            multiplier: 2.5,
            bet_count: 40,
            total_staked: 120.0,
            total_paid: 80.0,
            detected_by: DetectedBy::HistoryDiff,
            created_at_ns: 1,
        });
        publisher.on_betting_phase_started(BettingPhaseStarted { last_multiplier: Some(2.5), timestamp_ns: 2 });

        assert!(matches!(rx.recv().await, Some(ObserverEvent::RoundCompleted(r)) if r.multiplier == 2.5));
        assert!(matches!(rx.recv().await, Some(ObserverEvent::BettingPhaseStarted(_))));
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = ChannelPublisher::new(tx);
        publisher.on_betting_phase_started(BettingPhaseStarted { last_multiplier: None, timestamp_ns: 1 });
        publisher.on_betting_phase_started(BettingPhaseStarted { last_multiplier: None, timestamp_ns: 2 });
        assert!(matches!(rx.recv().await, Some(ObserverEvent::BettingPhaseStarted(e)) if e.timestamp_ns == 1));
        assert!(rx.try_recv().is_err());
    }
}
