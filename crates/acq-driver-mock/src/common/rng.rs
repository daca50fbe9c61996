//! Reproducible randomness for failure injection.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;

/// ChaCha8 stream behind a lock, shared by one device's error config.
pub struct MockRng {
    stream: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded stream, or OS entropy when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let stream = seed.map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Draw once and report whether a call with failure probability `rate`
    /// fails. Rates outside `(0, 1)` never draw.
    pub fn should_fail(&self, rate: f64) -> bool {
        match rate {
            r if r <= 0.0 => false,
            r if r >= 1.0 => true,
            r => self.stream.lock().gen_bool(r),
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for MockRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MockRng")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_failures() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        let draws_a: Vec<bool> = (0..64).map(|_| a.should_fail(0.3)).collect();
        let draws_b: Vec<bool> = (0..64).map(|_| b.should_fail(0.3)).collect();
        assert_eq!(draws_a, draws_b);
        assert!(draws_a.contains(&true) && draws_a.contains(&false));
    }

    #[test]
    fn rate_bounds() {
        let rng = MockRng::new(Some(7));
        assert!((0..100).all(|_| !rng.should_fail(0.0)));
        assert!((0..100).all(|_| rng.should_fail(1.0)));
    }
}
