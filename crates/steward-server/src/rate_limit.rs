use std::sync::Arc;

/// Millisecond time source.
pub type NowFn = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Continuously refilling token bucket: `rps` tokens per second up to `burst`.
pub struct TokenBucket {
    capacity: f64,
    refill_per_ms: f64,
    tokens: f64,
    last_ms: u64,
    now: NowFn,
}

impl TokenBucket {
    pub fn new(rps: f64, burst: f64, now: NowFn) -> Self {
        let last_ms = now();
        Self {
            capacity: burst,
            refill_per_ms: rps / 1000.0,
            tokens: burst,
            last_ms,
            now,
        }
    }

    fn refill(&mut self) {
        let t = (self.now)();
        // a clock that went backwards only resets the baseline
        if t > self.last_ms {
            let dt = (t - self.last_ms) as f64;
            self.tokens = self.capacity.min(self.tokens + dt * self.refill_per_ms);
        }
        self.last_ms = t;
    }

    pub fn try_take(&mut self, n: f64) -> bool {
        if !n.is_finite() || n <= 0.0 {
            return false;
        }
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// `(tokens, capacity)` after refilling.
    pub fn snapshot(&mut self) -> (f64, f64) {
        self.refill();
        (self.tokens, self.capacity)
    }
}
