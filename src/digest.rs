//! Digest sessions over SHA-1 and SHA-256.

use crate::error::Result;
use crate::keys::KeyHandle;
use crate::processor::SecureProcessor;
use crate::types::DigestAlgorithm;
use openssl::hash::Hasher;

/// A three-call digest session: create, update, finish.
pub struct DigestSession {
    algorithm: DigestAlgorithm,
    hasher: Hasher,
}

impl SecureProcessor {
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Result<DigestSession> {
        Ok(DigestSession {
            algorithm,
            hasher: Hasher::new(algorithm.message_digest())?,
        })
    }

    /// One-shot digest convenience.
    pub fn digest_once(&self, algorithm: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
        let mut session = self.digest(algorithm)?;
        session.update(data)?;
        session.finish()
    }
}

impl DigestSession {
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.hasher.update(data)?;
        Ok(())
    }

    /// Absorb a key handle's clear bytes. The unwrapped buffer never
    /// leaves this call.
    pub fn update_with_key(&mut self, proc: &SecureProcessor, key: &KeyHandle) -> Result<()> {
        let clear = proc.clear_symmetric_key(&key.record)?;
        self.hasher.update(&clear)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        Ok(self.hasher.finish()?.to_vec())
    }
}
