use rand::{RngCore, SeedableRng, rngs::StdRng};
use serde::Serialize;

/// Seedable random number generator.
///
/// Wraps StdRng so that randomized row placement can be replayed from the
/// seed recorded in a report.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Rng {
    seed: u64,
    #[serde(skip_serializing)]
    rng: StdRng,
}

impl Rng {
    /// Creates a new RNG from a seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derives an independent generator for one channel.
    pub fn for_channel(seed: u64, channel: usize) -> Self {
        Self::from_seed(seed ^ (channel as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RngCore for Rng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}

impl Clone for Rng {
    fn clone(&self) -> Self {
        Self::from_seed(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use crate::util::Rng;
    use rand::RngCore;

    #[test]
    fn test_rng_clone_replays() {
        let mut rng = Rng::from_seed(0x42);
        let a = rng.next_u64();
        let mut cloned_rng = rng.clone();
        let b = cloned_rng.next_u64();
        assert_eq!(cloned_rng.seed(), 0x42);
        assert_eq!(a, b, "Cloned Rng should start with the same seed");
    }

    #[test]
    fn test_channel_streams_differ() {
        let mut a = Rng::for_channel(7, 0);
        let mut b = Rng::for_channel(7, 1);
        assert_eq!(a.seed(), 7);
        assert_ne!(b.seed(), 7);
        assert_ne!(a.next_u64(), b.next_u64());
    }
}
