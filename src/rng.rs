use rand::{rngs::StdRng, Rng, SeedableRng};

/// Seed used when neither a config nor the `SEED` variable provides one.
pub const DEFAULT_SEED: u64 = 42;

/// Create a deterministic [`StdRng`] from an explicit seed.
///
/// Every initializer, dropout layer and shuffle takes a generator handle
/// built here; there is no process-wide random state.
pub fn rng_from_seed(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Read the base seed from the `SEED` environment variable, falling back to
/// `default` when unset or unparsable.
pub fn seed_from_env(default: u64) -> u64 {
    std::env::var("SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Derive an independent child generator, e.g. for a layer that draws
/// randomness after construction.
pub fn fork<R: Rng + ?Sized>(rng: &mut R) -> StdRng {
    StdRng::seed_from_u64(rng.gen())
}
