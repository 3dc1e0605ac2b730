//! Single randomness source for response selection, reaction chance and
//! timing jitter. Seedable so pipeline outcomes are deterministic in
//! tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct RngHandle {
    inner: Arc<Mutex<StdRng>>,
}

impl RngHandle {
    pub fn from_entropy() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    /// Uniform pick from a slice; `None` for an empty slice.
    pub fn pick<'a, T>(&self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.lock().gen_range(0..items.len());
        Some(&items[idx])
    }

    /// Uniform delay in `[min_ms, max_ms]`. Degenerate ranges collapse
    /// to `min_ms`.
    pub fn delay_ms(&self, min_ms: u64, max_ms: u64) -> u64 {
        if min_ms >= max_ms {
            return min_ms;
        }
        self.lock().gen_range(min_ms..=max_ms)
    }

    /// True with the given probability, clamped to `[0, 1]`.
    pub fn chance(&self, probability: f64) -> bool {
        let p = probability.clamp(0.0, 1.0);
        self.lock().gen_bool(p)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StdRng> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
