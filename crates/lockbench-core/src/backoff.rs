//! Bounded random delays for acquisition retries and staggered restarts

use rand::prelude::*;

use crate::error::{Error, Result};

/// Uniform delay source over `[0, range)`
#[derive(Debug, Clone)]
pub struct Backoff {
    range: u32,
    rng: StdRng,
}

impl Backoff {
    /// Create a backoff generator with its own random source
    ///
    /// Fails fast when `range` is zero, since no delay could be drawn.
    pub fn new(range: u32, rng: StdRng) -> Result<Self> {
        if range == 0 {
            return Err(Error::InvalidBackoffRange(range));
        }
        Ok(Self { range, rng })
    }

    /// Create a generator with a fixed seed (for reproducibility in tests)
    pub fn with_seed(range: u32, seed: u64) -> Result<Self> {
        Self::new(range, StdRng::seed_from_u64(seed))
    }

    /// Exclusive upper bound of drawn delays
    pub fn range(&self) -> u32 {
        self.range
    }

    /// Draw the next delay
    pub fn next_delay(&mut self) -> u64 {
        u64::from(self.rng.gen_range(0..self.range))
    }
}
