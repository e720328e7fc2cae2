use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Per-process token bucket pacing gateway calls.
///
/// Tokens refill continuously at `rate` per second up to `burst` capacity.
/// [`TokenBucket::acquire`] blocks until a token is available, sleeping for
/// exactly the time the deficit takes to accrue rather than busy-waiting.
/// The bucket state is held under a tokio [`Mutex`], which hands the lock to
/// waiters roughly in arrival order, so concurrent acquirers are served
/// approximately FIFO.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<State>,
    rate: f64,
    burst: f64,
}

#[derive(Debug)]
struct State {
    available: f64,
    refreshed_at: Instant,
}

impl State {
    fn refill(&mut self, now: Instant, rate: f64, burst: f64) {
        let elapsed = now.saturating_duration_since(self.refreshed_at);
        self.available = burst.min(self.available + elapsed.as_secs_f64() * rate);
        self.refreshed_at = now;
    }
}

impl TokenBucket {
    /// A bucket refilling `rate` tokens per second with `burst` capacity.
    /// Starts full. Rates at or below zero are clamped to a trickle rather
    /// than dividing by zero in the wait computation.
    pub fn new(rate: f64, burst: f64) -> Self {
        let rate = if rate > 0.0 { rate } else { 0.001 };
        let burst = burst.max(1.0);
        Self {
            state: Mutex::new(State {
                available: burst,
                refreshed_at: Instant::now(),
            }),
            rate,
            burst,
        }
    }

    /// Take one token, waiting for it to accrue if none is available.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        state.refill(Instant::now(), self.rate, self.burst);
        if state.available < 1.0 {
            let deficit = 1.0 - state.available;
            // The lock is held across this sleep on purpose: it serializes
            // waiters in arrival order.
            tokio::time::sleep(Duration::from_secs_f64(deficit / self.rate)).await;
            state.refill(Instant::now(), self.rate, self.burst);
        }
        state.available -= 1.0;
    }

    /// Current token count, refilled to now. Diagnostic only.
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        state.refill(Instant::now(), self.rate, self.burst);
        state.available
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_granted_without_waiting() {
        let bucket = TokenBucket::new(5.0, 10.0);
        let started = Instant::now();
        for _ in 0..10 {
            bucket.acquire().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(5.0, 10.0);
        for _ in 0..10 {
            bucket.acquire().await;
        }
        let started = Instant::now();
        bucket.acquire().await;
        // One token at 5/s accrues in 200ms.
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn window_admissions_never_exceed_burst_plus_rate() {
        let bucket = TokenBucket::new(5.0, 10.0);
        let window = Duration::from_secs(4);
        let started = Instant::now();
        let mut admitted = 0u32;
        while started.elapsed() < window {
            bucket.acquire().await;
            admitted += 1;
        }
        // burst + rate * T = 10 + 5 * 4 = 30
        assert!(admitted <= 30, "admitted {admitted} in {window:?}");
        assert!(admitted >= 29, "bucket under-admitted: {admitted}");
    }

    #[tokio::test(start_paused = true)]
    async fn refill_caps_at_burst() {
        let bucket = TokenBucket::new(5.0, 10.0);
        for _ in 0..10 {
            bucket.acquire().await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!((bucket.available().await - 10.0).abs() < 1e-6);
    }
}
