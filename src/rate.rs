use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Paces a single worker to a fixed number of batch sends per second.
pub struct RateController {
    interval: Duration,
    next_send: Option<Instant>,
}

impl RateController {
    /// Returns `None` for non-positive or non-finite rates, meaning "unpaced".
    pub fn new(batches_per_second: f64) -> Option<Self> {
        if !batches_per_second.is_finite() || batches_per_second <= 0.0 {
            return None;
        }
        Some(Self {
            interval: Duration::from_secs_f64(1.0 / batches_per_second),
            next_send: None,
        })
    }

    /// Wait until the next send slot. The first call never waits.
    pub async fn wait_for_next(&mut self) {
        let now = Instant::now();
        if let Some(at) = self.next_send {
            if at > now {
                sleep_until(at).await;
            }
        }
        // Schedule from the later of now and the slot we just used so a slow
        // send does not cause a burst to catch up.
        let base = self.next_send.map_or(now, |at| at.max(now));
        self.next_send = Some(base + self.interval);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unpaced_rates() {
        assert!(RateController::new(0.0).is_none());
        assert!(RateController::new(-3.0).is_none());
        assert!(RateController::new(f64::NAN).is_none());
        let rc = RateController::new(4.0).unwrap();
        assert_eq!(rc.interval(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn spaces_sends_by_interval() {
        let mut rc = RateController::new(10.0).unwrap();
        let start = Instant::now();
        rc.wait_for_next().await;
        rc.wait_for_next().await;
        rc.wait_for_next().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }
}
