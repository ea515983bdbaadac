pub mod record_sampler;
pub mod replicate_set;

use rand::rngs::StdRng;
use rand::SeedableRng;

pub use record_sampler::{draw_index_sets, plan_file_sample, sample_file, SamplePlan};
pub use replicate_set::{build_replicate_set, copy_replicate_set, ReplicateSet};

/// Mix a run seed with the coordinates of one draw (splitmix64 finalizer).
pub(crate) fn derive_seed(seed: u64, parts: &[u64]) -> u64 {
    let mut z = seed;
    for &p in parts {
        z = z.wrapping_add(0x9E37_79B9_7F4A_7C15).wrapping_add(p);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
    }
    z
}

/// RNG for one draw: deterministic with a run seed, entropy otherwise.
pub(crate) fn draw_rng(seed: Option<u64>, parts: &[u64]) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(derive_seed(s, parts)),
        None => StdRng::from_entropy(),
    }
}
