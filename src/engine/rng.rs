//! Deterministic random number generation.
//!
//! Implements PCG (Permuted Congruential Generator) with per-task seeds
//! derived from a single run seed.
//!
//! # Reproducibility Guarantee
//!
//! Given the same run seed, every task's random sequence is bitwise-identical
//! across:
//! - Different runs
//! - Different lane counts and dispatch orders
//! - Different execution units (CPU lane or GPU-block lane)

use rand::prelude::*;
use rand_pcg::Pcg64;

/// Golden-ratio increment used to spread stream indices across the seed space.
const STREAM_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Derive the seed of stream `stream` from a run seed.
///
/// Two different streams of the same run never share a seed, since the
/// multiplier is odd and therefore a bijection on `u64`.
#[must_use]
pub const fn derive_seed(run_seed: u64, stream: u64) -> u64 {
    run_seed.wrapping_add(stream.wrapping_mul(STREAM_MIX))
}

/// Deterministic, reproducible random number generator owned by one task.
///
/// There is no shared generator: each task builds its own from its seed, so
/// lanes never contend on RNG state.
#[derive(Debug, Clone)]
pub struct TaskRng {
    /// Seed this generator was built from.
    seed: u64,
    /// Internal PCG state.
    rng: Pcg64,
}

impl TaskRng {
    /// Create a generator from a task seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Pcg64::seed_from_u64(seed),
        }
    }

    /// Create the generator for stream `stream` of a run.
    ///
    /// # Example
    ///
    /// ```rust
    /// use montepi::engine::rng::TaskRng;
    ///
    /// let mut a = TaskRng::for_stream(42, 3);
    /// let mut b = TaskRng::for_stream(42, 3);
    /// assert_eq!(a.gen_f64(), b.gen_f64());
    /// ```
    #[must_use]
    pub fn for_stream(run_seed: u64, stream: u64) -> Self {
        Self::new(derive_seed(run_seed, stream))
    }

    /// Get the seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random f64 in [0, 1).
    pub fn gen_f64(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Generate a point in the unit square. `x` is drawn before `y`.
    pub fn gen_point(&mut self) -> (f64, f64) {
        let x = self.gen_f64();
        let y = self.gen_f64();
        (x, y)
    }

    /// Generate a random u64.
    pub fn gen_u64(&mut self) -> u64 {
        self.rng.gen()
    }

    /// Fill `xs` and `ys` with the next `xs.len()` points of the stream.
    ///
    /// Consumes the stream in exactly the order repeated [`Self::gen_point`]
    /// calls would.
    pub fn fill_points(&mut self, xs: &mut [f64], ys: &mut [f64]) {
        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            *x = self.gen_f64();
            *y = self.gen_f64();
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Falsification test: reproducibility holds for any seed.
        #[test]
        fn prop_reproducibility(seed in 0u64..u64::MAX) {
            let mut rng1 = TaskRng::new(seed);
            let mut rng2 = TaskRng::new(seed);

            let seq1: Vec<f64> = (0..100).map(|_| rng1.gen_f64()).collect();
            let seq2: Vec<f64> = (0..100).map(|_| rng2.gen_f64()).collect();

            prop_assert_eq!(seq1, seq2);
        }

        /// Falsification test: values in [0, 1) for any seed.
        #[test]
        fn prop_unit_interval(seed in 0u64..u64::MAX) {
            let mut rng = TaskRng::new(seed);

            for _ in 0..100 {
                let v = rng.gen_f64();
                prop_assert!((0.0..1.0).contains(&v), "Value {} not in [0, 1)", v);
            }
        }

        /// Falsification test: distinct streams of one run get distinct seeds.
        #[test]
        fn prop_distinct_stream_seeds(
            run_seed in 0u64..u64::MAX,
            a in 0u64..10_000,
            b in 0u64..10_000
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(derive_seed(run_seed, a), derive_seed(run_seed, b));
        }
    }
}
