//! Deterministic random number generation.
//!
//! RULE: Nothing on the learning path may call a platform RNG.
//! All randomness flows through TenantRng instances derived
//! from the master seed on the engine configuration.
//!
//! Each tenant gets its own RNG stream, seeded from
//! (master_seed, stable_hash(tenant_id)). This means:
//!   - Adding a tenant never changes existing tenants' streams.
//!   - Each tenant's exploration is reproducible in isolation.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// A deterministic RNG owned by one bandit instance.
#[derive(Debug, Clone)]
pub struct TenantRng {
    inner: Pcg64Mcg,
}

impl TenantRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Derive a tenant stream from the master seed. The tenant id is hashed
    /// with a platform-independent hash so streams survive process restarts.
    pub fn for_tenant(master_seed: u64, tenant_id: &str) -> Self {
        Self::from_seed(stable_hash64(master_seed, tenant_id))
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// FNV-1a over the bytes, then a SplitMix64 finalizer.
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(seed ^ h)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
