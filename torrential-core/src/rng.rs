//! Seeded random number generation for reproducible simulations.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic random number generator driving every stochastic
/// decision in the simulator.
///
/// Uses ChaCha8 for fast, high-quality pseudorandom numbers. The seed is
/// recorded so a run can be reproduced exactly.
#[derive(Debug, Clone)]
pub struct SimRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl SimRng {
    /// Creates a generator from an explicit seed.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    /// Creates a generator seeded from system entropy.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random::<u64>())
    }

    /// Returns the seed this generator was built from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generates a random number in `[0, 1)`.
    pub fn random_f64(&mut self) -> f64 {
        // 53 bits of mantissa, the usual ldexp construction
        (self.rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Draws a Bernoulli trial with the given success probability.
    ///
    /// `probability >= 1.0` is a certainty and `<= 0.0` an impossibility,
    /// exactly.
    pub fn random_bool(&mut self, probability: f64) -> bool {
        if probability >= 1.0 {
            return true;
        }
        self.random_f64() < probability
    }

    /// Generates a random number in `[min, max)`.
    pub fn random_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + (self.rng.next_u64() % (max - min))
    }

    /// Samples uniformly from the inclusive range `[min, max]`.
    pub fn sample_inclusive(&mut self, min: u32, max: u32) -> u32 {
        self.random_range(u64::from(min), u64::from(max) + 1) as u32
    }

    /// Shuffles a mutable slice in place.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        use rand::seq::SliceRandom;
        slice.shuffle(&mut self.rng);
    }
}
