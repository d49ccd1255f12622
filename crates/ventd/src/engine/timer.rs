//! Single-slot decay timer owned by the engine's event loop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::integration::FromIntegrationSender;
use super::message::FromIntegrationMessage;

/// At most one pending motion decay exists at a time. Scheduling replaces
/// any previous schedule, and a fire from a superseded schedule carries a
/// stale generation that the engine ignores.
#[derive(Debug, Default)]
pub struct DecayTimer {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl DecayTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, replacing any pending schedule.
    pub fn schedule(&mut self, after: Duration, tx: &FromIntegrationSender) {
        self.cancel();
        let generation = self.generation;
        let tx = tx.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if tx
                .send(FromIntegrationMessage::MotionDecayElapsed { generation })
                .await
                .is_err()
            {
                debug!("Engine gone, dropping decay fire");
            }
        }));
    }

    /// Drop any pending schedule and invalidate fires already in flight.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Whether a fire message belongs to the live schedule.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_full_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timer = DecayTimer::new();

        let start = tokio::time::Instant::now();
        timer.schedule(Duration::from_secs(10), &tx);

        let msg = rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        match msg {
            FromIntegrationMessage::MotionDecayElapsed { generation } => {
                assert!(timer.is_current(generation));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_fire() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timer = DecayTimer::new();

        let start = tokio::time::Instant::now();
        timer.schedule(Duration::from_secs(10), &tx);
        tokio::time::advance(Duration::from_secs(3)).await;
        timer.cancel();
        timer.schedule(Duration::from_secs(10), &tx);

        // Only one fire arrives, at 13s, not at the first deadline of 10s.
        let msg = rx.recv().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(13));
        match msg {
            FromIntegrationMessage::MotionDecayElapsed { generation } => {
                assert!(timer.is_current(generation));
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_fire() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut timer = DecayTimer::new();

        timer.schedule(Duration::from_secs(10), &tx);
        let scheduled_generation = timer.generation;
        timer.cancel();

        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_current(scheduled_generation));
    }
}
