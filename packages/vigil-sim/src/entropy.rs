//! Random-source capability injected into the service.
//!
//! Every run draws from its own generator. Production uses OS entropy; tests
//! pass [`Seeded`] to make probability triggers and noise reproducible.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

pub type SimRng = Box<dyn RngCore + Send>;

pub trait EntropySource: Send + Sync {
    /// A fresh generator for one run.
    fn rng(&self) -> SimRng;
}

pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn rng(&self) -> SimRng {
        Box::new(StdRng::from_entropy())
    }
}

/// Same seed for every run.
pub struct Seeded(pub u64);

impl EntropySource for Seeded {
    fn rng(&self) -> SimRng {
        Box::new(StdRng::seed_from_u64(self.0))
    }
}
