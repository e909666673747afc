use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket allowing bursts up to `capacity` and refilling continuously at `rate`
/// tokens per second.
///
/// Refill is lazy: tokens are topped up from the elapsed time whenever the bucket is
/// consulted. The token count never goes below zero or above capacity.
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a full bucket.
    ///
    /// `capacity` and `rate` are clamped to at least one token and a positive rate.
    #[must_use]
    pub fn new(capacity: u32, rate_per_second: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        let rate = if rate_per_second.is_finite() && rate_per_second > 0.0 {
            rate_per_second
        } else {
            1.0
        };
        Self {
            capacity,
            rate,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let tokens_to_add = elapsed.as_secs_f64() * self.rate;
        if tokens_to_add > 0.0 {
            state.tokens = (state.tokens + tokens_to_add).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Current token count after refilling.
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Takes `n` tokens if they are available right now.
    #[must_use]
    pub fn try_acquire(&self, n: u32) -> bool {
        let wanted = f64::from(n);
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= wanted {
            state.tokens -= wanted;
            true
        } else {
            false
        }
    }

    /// Waits until `n` tokens have been taken and returns the time spent waiting.
    ///
    /// Requests larger than the capacity are taken in capacity-sized chunks.
    pub async fn acquire(&self, n: u32) -> Duration {
        let started = Instant::now();
        let mut remaining = f64::from(n);

        while remaining > 0.0 {
            let chunk = remaining.min(self.capacity);
            loop {
                let wait = {
                    let mut state = self.state.lock();
                    self.refill(&mut state);
                    if state.tokens >= chunk {
                        state.tokens -= chunk;
                        None
                    } else {
                        Some(Duration::from_secs_f64((chunk - state.tokens) / self.rate))
                    }
                };
                match wait {
                    None => break,
                    Some(delay) => {
                        tracing::trace!(wait_ms = delay.as_millis(), tokens = chunk, "rate limiter waiting");
                        tokio::time::sleep(delay.max(Duration::from_millis(1))).await;
                    }
                }
            }
            remaining -= chunk;
        }

        started.elapsed()
    }
}
