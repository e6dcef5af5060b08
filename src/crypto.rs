//! Thin contracts over the OpenSSL primitives the processor is built on:
//! AES block/stream ciphers, SHA digests, HMAC/CMAC, raw RSA layouts and
//! the cryptographic DRBG.
//!
//! Everything here is stateless; sessions with observable state live in the
//! operation modules.

use crate::error::{Result, SecError};
use crate::types::{DigestAlgorithm, KeyType, AES_BLOCK_LEN};
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::{Rsa, RsaPrivateKeyBuilder};
use openssl::sign::Signer;
use openssl::symm::{Cipher, Crypter, Mode};
use zeroize::Zeroize;

/// One AES-ECB block encryption, the primitive behind the key ladder.
pub(crate) fn aes_ecb_encrypt_block(key: &[u8], block: &[u8; AES_BLOCK_LEN]) -> Result<[u8; AES_BLOCK_LEN]> {
    let cipher = match key.len() {
        16 => Cipher::aes_128_ecb(),
        32 => Cipher::aes_256_ecb(),
        n => {
            return Err(SecError::InvalidParameters(format!(
                "unsupported AES key length {n}"
            )))
        }
    };

    let mut crypter = Crypter::new(cipher, Mode::Encrypt, key, None)?;
    crypter.pad(false);

    let mut out = [0u8; AES_BLOCK_LEN * 2];
    let mut written = crypter.update(block, &mut out)?;
    written += crypter.finalize(&mut out[written..])?;
    debug_assert_eq!(written, AES_BLOCK_LEN);

    let mut result = [0u8; AES_BLOCK_LEN];
    result.copy_from_slice(&out[..AES_BLOCK_LEN]);
    out.zeroize();
    Ok(result)
}

impl DigestAlgorithm {
    pub(crate) fn message_digest(&self) -> MessageDigest {
        match self {
            DigestAlgorithm::Sha1 => MessageDigest::sha1(),
            DigestAlgorithm::Sha256 => MessageDigest::sha256(),
        }
    }
}

/// One-shot digest.
pub(crate) fn digest(alg: DigestAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
    Ok(openssl::hash::hash(alg.message_digest(), data)?.to_vec())
}

/// One-shot HMAC under a clear key.
pub(crate) fn hmac(alg: DigestAlgorithm, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let pkey = PKey::hmac(key)?;
    let mut signer = Signer::new(alg.message_digest(), &pkey)?;
    signer.update(data)?;
    Ok(signer.sign_to_vec()?)
}

/// Cryptographic DRBG fill.
pub(crate) fn random_bytes(out: &mut [u8]) -> Result<()> {
    openssl::rand::rand_bytes(out)?;
    Ok(())
}

/* ------------------------------ Raw RSA ---------------------------------- */

/// Raw RSA private key layout:
/// `modulus_len(4, BE) || n(modulus_len) || e(4) || d(modulus_len)`,
/// all integers big-endian and left-padded to the modulus size.
pub struct RsaRawPrivateKey {
    pub modulus: Vec<u8>,
    pub public_exponent: [u8; 4],
    pub private_exponent: Vec<u8>,
}

impl RsaRawPrivateKey {
    pub fn encoded_len(key_type: KeyType) -> usize {
        4 + 2 * key_type.key_len() + 4
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.modulus.len() * 2 + 4);
        out.extend_from_slice(&(self.modulus.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&self.public_exponent);
        out.extend_from_slice(&self.private_exponent);
        out
    }

    pub fn from_bytes(data: &[u8], key_type: KeyType) -> Result<Self> {
        if data.len() != Self::encoded_len(key_type) {
            return Err(SecError::InvalidParameters(
                "raw RSA private key has the wrong length".into(),
            ));
        }

        let modulus_len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
        if modulus_len != key_type.key_len() {
            return Err(SecError::InvalidParameters(
                "raw RSA private key modulus length mismatch".into(),
            ));
        }

        let n_end = 4 + modulus_len;
        let mut public_exponent = [0u8; 4];
        public_exponent.copy_from_slice(&data[n_end..n_end + 4]);

        Ok(Self {
            modulus: data[4..n_end].to_vec(),
            public_exponent,
            private_exponent: data[n_end + 4..].to_vec(),
        })
    }

    pub fn from_rsa(rsa: &Rsa<openssl::pkey::Private>) -> Result<Self> {
        let modulus_len = rsa.size() as usize;
        let mut public_exponent = [0u8; 4];
        public_exponent.copy_from_slice(&rsa.e().to_vec_padded(4)?);

        Ok(Self {
            modulus: rsa.n().to_vec_padded(modulus_len as i32)?,
            public_exponent,
            private_exponent: rsa.d().to_vec_padded(modulus_len as i32)?,
        })
    }

    pub fn to_rsa(&self) -> Result<Rsa<openssl::pkey::Private>> {
        let n = BigNum::from_slice(&self.modulus)?;
        let e = BigNum::from_slice(&self.public_exponent)?;
        let d = BigNum::from_slice(&self.private_exponent)?;
        Ok(RsaPrivateKeyBuilder::new(n, e, d)?.build())
    }

    pub fn public_half(&self) -> RsaRawPublicKey {
        RsaRawPublicKey {
            modulus: self.modulus.clone(),
            public_exponent: self.public_exponent,
        }
    }
}

impl Drop for RsaRawPrivateKey {
    fn drop(&mut self) {
        self.modulus.zeroize();
        self.private_exponent.zeroize();
    }
}

/// Raw RSA public key layout:
/// `modulus_len(4, BE) || n(modulus_len) || e(4)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RsaRawPublicKey {
    pub modulus: Vec<u8>,
    pub public_exponent: [u8; 4],
}

impl RsaRawPublicKey {
    pub fn encoded_len(key_type: KeyType) -> usize {
        4 + key_type.key_len() + 4
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.modulus.len() + 4);
        out.extend_from_slice(&(self.modulus.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.modulus);
        out.extend_from_slice(&self.public_exponent);
        out
    }

    pub fn from_bytes(data: &[u8], key_type: KeyType) -> Result<Self> {
        if data.len() != Self::encoded_len(key_type) {
            return Err(SecError::InvalidParameters(
                "raw RSA public key has the wrong length".into(),
            ));
        }

        let modulus_len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
        if modulus_len != key_type.key_len() {
            return Err(SecError::InvalidParameters(
                "raw RSA public key modulus length mismatch".into(),
            ));
        }

        let n_end = 4 + modulus_len;
        let mut public_exponent = [0u8; 4];
        public_exponent.copy_from_slice(&data[n_end..n_end + 4]);

        Ok(Self {
            modulus: data[4..n_end].to_vec(),
            public_exponent,
        })
    }

    pub fn from_rsa<T: openssl::pkey::HasPublic>(rsa: &Rsa<T>) -> Result<Self> {
        let modulus_len = rsa.size() as usize;
        let mut public_exponent = [0u8; 4];
        public_exponent.copy_from_slice(&rsa.e().to_vec_padded(4)?);

        Ok(Self {
            modulus: rsa.n().to_vec_padded(modulus_len as i32)?,
            public_exponent,
        })
    }

    pub fn to_rsa(&self) -> Result<Rsa<openssl::pkey::Public>> {
        let n = BigNum::from_slice(&self.modulus)?;
        let e = BigNum::from_slice(&self.public_exponent)?;
        Ok(Rsa::from_public_components(n, e)?)
    }
}
