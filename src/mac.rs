//! MAC sessions: HMAC-SHA-1, HMAC-SHA-256, and CMAC-AES-128.

use crate::error::{Result, SecError};
use crate::keys::KeyHandle;
use crate::processor::SecureProcessor;
use crate::types::{KeyType, MacAlgorithm};
use openssl::md::Md;
use openssl::md_ctx::MdCtx;
use openssl::pkey::PKey;
use openssl::symm::Cipher;

/// A three-call MAC session: create, update, finish.
pub struct MacSession {
    algorithm: MacAlgorithm,
    ctx: MdCtx,
}

impl SecureProcessor {
    /// Open a MAC session over a key handle. HMAC algorithms take HMAC
    /// keys; CMAC takes an AES-128 key.
    pub fn mac(&self, algorithm: MacAlgorithm, key: &KeyHandle) -> Result<MacSession> {
        validate_mac_key(algorithm, key.key_type())?;

        let clear = self.clear_symmetric_key(&key.record)?;
        let mut ctx = MdCtx::new()?;
        match algorithm {
            MacAlgorithm::HmacSha1 => {
                let pkey = PKey::hmac(&clear)?;
                ctx.digest_sign_init(Some(Md::sha1()), &pkey)?;
            }
            MacAlgorithm::HmacSha256 => {
                let pkey = PKey::hmac(&clear)?;
                ctx.digest_sign_init(Some(Md::sha256()), &pkey)?;
            }
            MacAlgorithm::CmacAes128 => {
                let pkey = PKey::cmac(&Cipher::aes_128_cbc(), &clear)?;
                ctx.digest_sign_init(None, &pkey)?;
            }
        }

        Ok(MacSession { algorithm, ctx })
    }

    /// One-shot MAC convenience.
    pub fn mac_once(
        &self,
        algorithm: MacAlgorithm,
        key: &KeyHandle,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        let mut session = self.mac(algorithm, key)?;
        session.update(data)?;
        session.finish()
    }
}

impl MacSession {
    pub fn algorithm(&self) -> MacAlgorithm {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.ctx.digest_sign_update(data)?;
        Ok(())
    }

    /// Absorb a key handle's clear bytes. The unwrapped buffer never
    /// leaves this call.
    pub fn update_with_key(&mut self, proc: &SecureProcessor, key: &KeyHandle) -> Result<()> {
        let clear = proc.clear_symmetric_key(&key.record)?;
        self.ctx.digest_sign_update(&clear)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        let len = self.ctx.digest_sign_final(None)?;
        let mut out = vec![0u8; len];
        let written = self.ctx.digest_sign_final(Some(&mut out))?;
        out.truncate(written);
        Ok(out)
    }
}

fn validate_mac_key(algorithm: MacAlgorithm, key_type: KeyType) -> Result<()> {
    let valid = match algorithm {
        MacAlgorithm::HmacSha1 | MacAlgorithm::HmacSha256 => key_type.is_hmac(),
        MacAlgorithm::CmacAes128 => key_type == KeyType::Aes128,
    };
    if !valid {
        return Err(SecError::InvalidParameters(
            "key type is not valid for this MAC algorithm".into(),
        ));
    }
    Ok(())
}
