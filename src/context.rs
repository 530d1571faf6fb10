use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::tensor::pool::TensorPool;

/// Hands out independently seeded generators from a shared counter, so
/// parallel call sites never contend on a single RNG. Deterministic for a
/// fixed base seed and call order.
pub struct SeedSource {
    base: u64,
    counter: AtomicU64,
}

impl SeedSource {
    pub fn new(base: u64) -> Self {
        SeedSource {
            base,
            counter: AtomicU64::new(0),
        }
    }

    pub fn rng(&self) -> StdRng {
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        // splitmix64 over (base, ticket) decorrelates consecutive seeds
        let mut z = self.base ^ ticket.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        StdRng::seed_from_u64(z ^ (z >> 31))
    }
}

/// Explicit engine context: the tensor pool and the seed source. Passed to
/// graph construction and training entry points; the crate keeps no hidden
/// process-wide state.
pub struct Context {
    pub pool: TensorPool,
    pub seeds: SeedSource,
}

impl Context {
    pub fn new() -> Self {
        Context::with_seed(0x6e65_7572_6974_65)
    }

    pub fn with_seed(seed: u64) -> Self {
        Context {
            pool: TensorPool::new(),
            seeds: SeedSource::new(seed),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}
