// src/utils/random.rs
//! Seedable random source
//!
//! All randomized decisions (budget draws, neighborhood sampling, generator
//! shuffling, waits) go through a [`RandomSource`] owned by the component
//! that makes them, so tests can pin a seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Random source backed by `StdRng`
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    /// Deterministic source for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Source seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Derive an independent child source (e.g. one per worker or topic)
    pub fn fork(&mut self) -> Self {
        Self::seeded(self.rng.gen())
    }

    /// Uniform integer in `[low, high]`; returns `low` when the range is empty
    pub fn int_in(&mut self, low: i64, high: i64) -> i64 {
        if high <= low {
            return low;
        }
        self.rng.gen_range(low..=high)
    }

    /// Pick one element uniformly
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Distinct values drawn from `[low, high)` without replacement
    pub fn distinct_in(&mut self, low: usize, high: usize, amount: usize) -> Vec<usize> {
        if high <= low {
            return Vec::new();
        }
        let span = high - low;
        rand::seq::index::sample(&mut self.rng, span, amount.min(span))
            .into_iter()
            .map(|i| low + i)
            .collect()
    }

    /// Fair coin
    pub fn flip(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}
