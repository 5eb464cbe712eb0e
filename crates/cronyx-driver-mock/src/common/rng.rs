//! Seeded RNG shared by the simulated adapter.
//!
//! Traffic payloads, random line errors and injected failures all draw from
//! one [`MockRng`] so that a fixed seed replays the same run.

use bytes::Bytes;
use parking_lot::Mutex;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe ChaCha8 generator.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Seeded generator; `None` seeds from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// `true` with probability `rate` (clamped to `[0, 1]`).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().r#gen::<f64>() < rate
    }

    /// A frame of `len` random octets.
    pub fn payload(&self, len: usize) -> Bytes {
        let mut buf = vec![0u8; len];
        self.inner.lock().fill_bytes(&mut buf);
        Bytes::from(buf)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let a = MockRng::new(Some(42));
        let b = MockRng::new(Some(42));
        assert_eq!(a.payload(16), b.payload(16));
        assert_eq!(a.should_fail(0.5), b.should_fail(0.5));
    }

    #[test]
    fn test_should_fail_bounds() {
        let rng = MockRng::new(Some(7));
        for _ in 0..100 {
            assert!(!rng.should_fail(0.0));
            assert!(rng.should_fail(1.0));
        }
    }

    #[test]
    fn test_should_fail_probability() {
        let rng = MockRng::new(Some(42));
        let failures = (0..10_000).filter(|_| rng.should_fail(0.3)).count();
        assert!((2700..3300).contains(&failures), "got {failures}");
    }

    #[test]
    fn test_payload_len() {
        let rng = MockRng::new(Some(1));
        assert_eq!(rng.payload(64).len(), 64);
        assert!(rng.payload(0).is_empty());
    }
}
