use rand::Rng;
use std::time::Duration;

/// Delay between passes that still had work to do.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: bool) -> Self {
        Self { base, max, jitter }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, false)
    }

    /// `streak` counts consecutive passes that attempted work, starting at 0.
    pub fn delay(&self, streak: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(streak, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, streak: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let exp = base_ms
            .saturating_mul(1u64 << streak.min(16))
            .min(max_ms);
        if self.jitter && exp > 0 {
            // Keep at least half the delay so jitter never collapses it to zero.
            Duration::from_millis(rng.gen_range(exp / 2..=exp))
        } else {
            Duration::from_millis(exp)
        }
    }
}
