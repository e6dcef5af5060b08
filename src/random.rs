//! Random sessions: the cryptographic DRBG and the pseudo-random class.

use crate::crypto;
use crate::error::Result;
use crate::processor::SecureProcessor;
use crate::types::RandomAlgorithm;
use rand::RngCore;

pub struct RandomSession {
    algorithm: RandomAlgorithm,
}

impl SecureProcessor {
    pub fn random(&self, algorithm: RandomAlgorithm) -> RandomSession {
        RandomSession { algorithm }
    }
}

impl RandomSession {
    pub fn algorithm(&self) -> RandomAlgorithm {
        self.algorithm
    }

    pub fn fill(&mut self, out: &mut [u8]) -> Result<()> {
        match self.algorithm {
            RandomAlgorithm::True => crypto::random_bytes(out),
            RandomAlgorithm::Prng => {
                rand::thread_rng().fill_bytes(out);
                Ok(())
            }
        }
    }
}
