//! Jitter RNG port for backoff randomization.

use rand::Rng;

/// Uniform random source.
pub trait JitterRng: Send + Sync {
    /// A uniform sample from `[a, b)`. Callers guarantee `a < b`.
    fn uniform(&self, a: f64, b: f64) -> f64;
}

/// Production source backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadJitterRng;

impl JitterRng for ThreadJitterRng {
    fn uniform(&self, a: f64, b: f64) -> f64 {
        if a >= b {
            return a;
        }
        rand::thread_rng().gen_range(a..b)
    }
}
