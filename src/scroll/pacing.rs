//! Humanized timing parameters for scroll gestures

use std::time::Duration;

use rand::Rng;

/// A randomized pause drawn uniformly from `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    pub fn from_secs(min_secs: u64, max_secs: u64) -> Self {
        Self::new(Duration::from_secs(min_secs), Duration::from_secs(max_secs))
    }

    /// No pause at all
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
    }

    /// Sleep for a sampled duration
    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Pause bounds per gesture type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between two scroll steps inside a batch
    pub step_pause: Jitter,
    /// After a batch, before harvesting
    pub settle: Jitter,
}

impl Pacing {
    /// Pacing without any waits, for deterministic runs
    pub fn immediate() -> Self {
        Self {
            step_pause: Jitter::none(),
            settle: Jitter::none(),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            step_pause: Jitter::from_millis(80, 200),
            settle: Jitter::from_millis(1200, 2200),
        }
    }
}
