//! RSA-PKCS#1 signature sessions over SHA-1 and SHA-256, in "data"
//! (message hashed inside) and "digest" (caller supplies the hash)
//! flavors.

use crate::error::{Result, SecError};
use crate::keys::{KeyHandle, RsaKeyMaterial};
use crate::processor::SecureProcessor;
use crate::types::{DigestAlgorithm, KeyType, SignatureAlgorithm, SignatureMode};
use log::error;
use openssl::md::{Md, MdRef};
use openssl::pkey::{PKey, Private, Public};
use openssl::pkey_ctx::PkeyCtx;
use openssl::rsa::Padding;

enum SessionKey {
    Private(PKey<Private>),
    Public(PKey<Public>),
}

pub struct SignatureSession {
    algorithm: SignatureAlgorithm,
    mode: SignatureMode,
    key: SessionKey,
}

impl SecureProcessor {
    /// Open a signature session over an RSA key handle. Signing requires a
    /// private key; verification accepts either half.
    pub fn signature(
        &self,
        algorithm: SignatureAlgorithm,
        mode: SignatureMode,
        key: &KeyHandle,
    ) -> Result<SignatureSession> {
        validate_signature_key(mode, key.key_type())?;

        let key = match self.rsa_material(&key.record)? {
            RsaKeyMaterial::Private(rsa) => SessionKey::Private(PKey::from_rsa(rsa)?),
            RsaKeyMaterial::Public(rsa) => SessionKey::Public(PKey::from_rsa(rsa)?),
        };

        Ok(SignatureSession {
            algorithm,
            mode,
            key,
        })
    }
}

impl SignatureSession {
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Produce a signature over the input (or over the caller-supplied
    /// digest for the digest-flavored algorithms).
    pub fn sign(&self, input: &[u8]) -> Result<Vec<u8>> {
        if self.mode != SignatureMode::Sign {
            return Err(SecError::InvalidParameters(
                "session was opened for verification".into(),
            ));
        }

        let digest = self.digest_input(input)?;
        let SessionKey::Private(pkey) = &self.key else {
            return Err(SecError::InvalidParameters(
                "signing requires a private key".into(),
            ));
        };

        let mut ctx = PkeyCtx::new(pkey)?;
        ctx.sign_init()?;
        ctx.set_rsa_padding(Padding::PKCS1)?;
        ctx.set_signature_md(self.md())?;

        let len = ctx.sign(&digest, None)?;
        let mut signature = vec![0u8; len];
        let written = ctx.sign(&digest, Some(&mut signature))?;
        signature.truncate(written);
        Ok(signature)
    }

    /// Check a signature over the input (or caller-supplied digest).
    pub fn verify(&self, input: &[u8], signature: &[u8]) -> Result<()> {
        if self.mode != SignatureMode::Verify {
            return Err(SecError::InvalidParameters(
                "session was opened for signing".into(),
            ));
        }

        let digest = self.digest_input(input)?;

        let verified = match &self.key {
            SessionKey::Private(pkey) => verify_digest(pkey, self.md(), &digest, signature),
            SessionKey::Public(pkey) => verify_digest(pkey, self.md(), &digest, signature),
        };

        match verified {
            Ok(true) => Ok(()),
            Ok(false) => Err(SecError::VerificationFailed),
            Err(err) => {
                error!("signature verification failed: {err}");
                Err(SecError::VerificationFailed)
            }
        }
    }

    fn digest_input(&self, input: &[u8]) -> Result<Vec<u8>> {
        let algorithm = self.algorithm.digest_algorithm();
        if self.algorithm.is_digest() {
            if input.len() != algorithm.digest_len() {
                return Err(SecError::InvalidInputSize(
                    "supplied digest has the wrong length for the algorithm".into(),
                ));
            }
            return Ok(input.to_vec());
        }
        Ok(openssl::hash::hash(algorithm.message_digest(), input)?.to_vec())
    }

    fn md(&self) -> &'static MdRef {
        match self.algorithm.digest_algorithm() {
            DigestAlgorithm::Sha1 => Md::sha1(),
            DigestAlgorithm::Sha256 => Md::sha256(),
        }
    }
}

fn verify_digest<T: openssl::pkey::HasPublic>(
    pkey: &PKey<T>,
    md: &'static MdRef,
    digest: &[u8],
    signature: &[u8],
) -> std::result::Result<bool, openssl::error::ErrorStack> {
    let mut ctx = PkeyCtx::new(pkey)?;
    ctx.verify_init()?;
    ctx.set_rsa_padding(Padding::PKCS1)?;
    ctx.set_signature_md(md)?;
    ctx.verify(digest, signature)
}

fn validate_signature_key(mode: SignatureMode, key_type: KeyType) -> Result<()> {
    if !key_type.is_rsa() {
        return Err(SecError::InvalidParameters(
            "signature algorithms require an RSA key".into(),
        ));
    }
    if mode == SignatureMode::Sign && !key_type.is_rsa_private() {
        return Err(SecError::InvalidParameters(
            "signing requires a private key".into(),
        ));
    }
    Ok(())
}
