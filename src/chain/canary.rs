//! Canary sampling and shadow execution records.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chain::executor::Outcome;
use crate::filters::FilterId;

/// Decides which requests get shadow invocations.
///
/// The rate is stored as `f64` bits so a config reload can change it without
/// locking request threads.
#[derive(Debug)]
pub struct ShadowSampler {
    rate_bits: AtomicU64,
}

impl ShadowSampler {
    pub fn new(rate: f64) -> Self {
        Self {
            rate_bits: AtomicU64::new(clamp(rate).to_bits()),
        }
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate_bits.store(clamp(rate).to_bits(), Ordering::Relaxed);
    }

    pub fn sample(&self) -> bool {
        let rate = self.rate();
        if rate <= 0.0 {
            false
        } else if rate >= 1.0 {
            true
        } else {
            fastrand::f64() < rate
        }
    }
}

impl Default for ShadowSampler {
    fn default() -> Self {
        Self::new(0.0)
    }
}

fn clamp(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

/// Result of one shadow invocation next to the primary it mirrored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowRecord {
    pub filter_id: FilterId,
    pub primary_revision: u64,
    pub canary_revision: u64,
    pub primary: Outcome,
    pub shadow: Outcome,
    /// True when outcomes differ or the shadow produced a different response.
    pub diverged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_bounds() {
        let sampler = ShadowSampler::new(0.0);
        assert!((0..100).all(|_| !sampler.sample()));

        sampler.set_rate(1.0);
        assert!((0..100).all(|_| sampler.sample()));

        sampler.set_rate(7.5);
        assert_eq!(sampler.rate(), 1.0);
        sampler.set_rate(f64::NAN);
        assert_eq!(sampler.rate(), 0.0);
    }
}
