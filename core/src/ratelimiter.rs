use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Spaces out callers so that at most `per_sec` acquisitions complete per
/// second. Must be created inside a Tokio runtime.
pub struct RateLimiter {
    ticker: Mutex<Interval>,
}

impl RateLimiter {
    pub fn new(per_sec: u32) -> Self {
        let micros = (1_000_000 / u64::from(per_sec.max(1))).max(1);
        let mut ticker = interval(Duration::from_micros(micros));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        RateLimiter { ticker: Mutex::new(ticker) }
    }

    pub async fn acquire(&self) {
        self.ticker.lock().await.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn paces_acquisitions() {
        let rl = RateLimiter::new(50);
        let start = Instant::now();
        for _ in 0..4 {
            rl.acquire().await;
        }
        // first tick is immediate, the next three are 20ms apart
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}
