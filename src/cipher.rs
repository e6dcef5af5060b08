//! Cipher sessions: AES ECB/CBC with explicit PKCS#7 handling, AES-CTR,
//! and single-shot RSA encryption.
//!
//! The library's own padding is disabled; the pad block is built and
//! validated here so that inconsistent padding is reported as such instead
//! of an opaque library failure.

use crate::error::{Result, SecError};
use crate::keys::{KeyHandle, RsaKeyMaterial};
use crate::processor::SecureProcessor;
use crate::types::{CipherAlgorithm, CipherMode, KeyType, AES_BLOCK_LEN};
use openssl::rsa::Padding;
use openssl::symm::{Cipher, Crypter, Mode};

// RSA padding overheads in bytes.
const RSA_PKCS1_OVERHEAD: usize = 11;
const RSA_OAEP_OVERHEAD: usize = 41;

enum CipherState {
    /// ECB/CBC with library padding disabled.
    Block(Crypter),
    Ctr(Crypter),
    Rsa(RsaKeyMaterial),
}

/// A three-call cipher session: create, process any number of times, drop.
///
/// The first call with `last` set finalizes the stream; any call after it
/// fails.
pub struct CipherSession {
    algorithm: CipherAlgorithm,
    mode: CipherMode,
    state: CipherState,
    last_processed: bool,
}

impl SecureProcessor {
    /// Open a cipher session over a key handle. CBC and CTR require a
    /// 16-byte IV; ECB and RSA take none.
    pub fn cipher(
        &self,
        algorithm: CipherAlgorithm,
        mode: CipherMode,
        key: &KeyHandle,
        iv: Option<&[u8]>,
    ) -> Result<CipherSession> {
        validate_cipher_key(algorithm, mode, key.key_type())?;

        if algorithm.needs_iv() && iv.map(|iv| iv.len()) != Some(AES_BLOCK_LEN) {
            return Err(SecError::InvalidParameters(
                "algorithm requires a 16-byte IV".into(),
            ));
        }

        let state = match algorithm {
            CipherAlgorithm::AesEcbNoPadding
            | CipherAlgorithm::AesEcbPkcs7
            | CipherAlgorithm::AesCbcNoPadding
            | CipherAlgorithm::AesCbcPkcs7 => {
                let clear = self.clear_symmetric_key(&key.record)?;
                let cipher = block_cipher(algorithm, key.key_type());
                let iv = if algorithm.needs_iv() { iv } else { None };
                let mut crypter = Crypter::new(cipher, symm_mode(mode), &clear, iv)?;
                crypter.pad(false);
                CipherState::Block(crypter)
            }

            CipherAlgorithm::AesCtr => {
                let clear = self.clear_symmetric_key(&key.record)?;
                let cipher = match key.key_type() {
                    KeyType::Aes128 => Cipher::aes_128_ctr(),
                    _ => Cipher::aes_256_ctr(),
                };
                CipherState::Ctr(Crypter::new(cipher, symm_mode(mode), &clear, iv)?)
            }

            CipherAlgorithm::RsaPkcs1 | CipherAlgorithm::RsaOaep => {
                CipherState::Rsa(self.rsa_material(&key.record)?)
            }
        };

        Ok(CipherSession {
            algorithm,
            mode,
            state,
            last_processed: false,
        })
    }
}

impl CipherSession {
    /// Process one span of input, producing the corresponding output.
    pub fn process(&mut self, input: &[u8], last: bool) -> Result<Vec<u8>> {
        if self.last_processed {
            return Err(SecError::Failure(
                "the last block of this session has already been processed".into(),
            ));
        }
        self.last_processed = last;

        match (&mut self.state, self.algorithm) {
            (CipherState::Block(crypter), algorithm) if !algorithm.is_pkcs7() => {
                if input.len() % AES_BLOCK_LEN != 0 {
                    return Err(SecError::InvalidInputSize(
                        "input is not block aligned".into(),
                    ));
                }
                let mut out = vec![0u8; input.len() + AES_BLOCK_LEN];
                let mut written = crypter.update(input, &mut out)?;
                if last {
                    written += crypter.finalize(&mut out[written..])?;
                }
                out.truncate(written);
                Ok(out)
            }

            (CipherState::Block(crypter), _) => match self.mode {
                CipherMode::Encrypt => {
                    if !last && input.len() % AES_BLOCK_LEN != 0 {
                        return Err(SecError::InvalidInputSize(
                            "non-final input is not block aligned".into(),
                        ));
                    }

                    let full = input.len() / AES_BLOCK_LEN * AES_BLOCK_LEN;
                    let mut out = vec![0u8; input.len() + 2 * AES_BLOCK_LEN];
                    let mut written = crypter.update(&input[..full], &mut out)?;

                    if last {
                        // One full pad block is appended even when the
                        // input is block aligned.
                        let remainder = &input[full..];
                        let pad_val = (AES_BLOCK_LEN - remainder.len()) as u8;
                        let mut block = [pad_val; AES_BLOCK_LEN];
                        block[..remainder.len()].copy_from_slice(remainder);

                        written += crypter.update(&block, &mut out[written..])?;
                        written += crypter.finalize(&mut out[written..])?;
                    }

                    out.truncate(written);
                    Ok(out)
                }
                CipherMode::Decrypt => {
                    if input.len() % AES_BLOCK_LEN != 0 {
                        return Err(SecError::InvalidInputSize(
                            "ciphertext is not block aligned".into(),
                        ));
                    }

                    let mut out = vec![0u8; input.len() + AES_BLOCK_LEN];
                    let mut written = crypter.update(input, &mut out)?;
                    if last {
                        written += crypter.finalize(&mut out[written..])?;
                    }
                    out.truncate(written);

                    if last && out.len() >= AES_BLOCK_LEN {
                        let pad_val = out[out.len() - 1];
                        if pad_val == 0 || pad_val as usize > AES_BLOCK_LEN {
                            return Err(SecError::InvalidPadding);
                        }
                        let expected = vec![pad_val; pad_val as usize];
                        let tail = &out[out.len() - pad_val as usize..];
                        if !openssl::memcmp::eq(&expected, tail) {
                            return Err(SecError::InvalidPadding);
                        }
                        let unpadded = out.len() - pad_val as usize;
                        out.truncate(unpadded);
                    }
                    Ok(out)
                }
            },

            (CipherState::Ctr(crypter), _) => {
                let mut out = vec![0u8; input.len() + AES_BLOCK_LEN];
                let mut written = crypter.update(input, &mut out)?;
                if last {
                    written += crypter.finalize(&mut out[written..])?;
                }
                out.truncate(written);
                Ok(out)
            }

            (CipherState::Rsa(material), algorithm) => {
                let padding = if algorithm == CipherAlgorithm::RsaPkcs1 {
                    Padding::PKCS1
                } else {
                    Padding::PKCS1_OAEP
                };
                rsa_process(material, self.mode, padding, input)
            }
        }
    }

    /// Apply the cipher to repeated `(offset, size)` windows of every
    /// `period`-sized span of the input, copying the gaps through.
    pub fn process_fragmented(
        &mut self,
        input: &[u8],
        last: bool,
        fragment_offset: usize,
        fragment_size: usize,
        fragment_period: usize,
    ) -> Result<Vec<u8>> {
        if self.algorithm.is_rsa() {
            return Err(SecError::UnimplementedFeature(
                "fragmented processing is only available for AES algorithms",
            ));
        }
        if self.algorithm.is_pkcs7() {
            return Err(SecError::InvalidParameters(
                "fragmented processing requires a size-preserving algorithm".into(),
            ));
        }
        if fragment_period == 0
            || fragment_size == 0
            || fragment_offset + fragment_size > fragment_period
        {
            return Err(SecError::InvalidParameters(
                "fragment window does not fit its period".into(),
            ));
        }
        if input.len() % fragment_period != 0 {
            return Err(SecError::InvalidInputSize(
                "input is not a whole number of fragment periods".into(),
            ));
        }
        if self.algorithm != CipherAlgorithm::AesCtr && fragment_size % AES_BLOCK_LEN != 0 {
            return Err(SecError::InvalidInputSize(
                "fragment window is not block aligned".into(),
            ));
        }

        let mut out = input.to_vec();
        let fragments = input.len() / fragment_period;
        for i in 0..fragments {
            let start = i * fragment_period + fragment_offset;
            let window = out[start..start + fragment_size].to_vec();
            let processed = self.process(&window, last && i == fragments - 1)?;
            if processed.len() != fragment_size {
                return Err(SecError::Failure(
                    "fragment window changed size during processing".into(),
                ));
            }
            out[start..start + fragment_size].copy_from_slice(&processed);
        }

        Ok(out)
    }
}

fn symm_mode(mode: CipherMode) -> Mode {
    match mode {
        CipherMode::Encrypt => Mode::Encrypt,
        CipherMode::Decrypt => Mode::Decrypt,
    }
}

fn block_cipher(algorithm: CipherAlgorithm, key_type: KeyType) -> Cipher {
    let aes128 = key_type == KeyType::Aes128;
    match algorithm {
        CipherAlgorithm::AesEcbNoPadding | CipherAlgorithm::AesEcbPkcs7 => {
            if aes128 {
                Cipher::aes_128_ecb()
            } else {
                Cipher::aes_256_ecb()
            }
        }
        _ => {
            if aes128 {
                Cipher::aes_128_cbc()
            } else {
                Cipher::aes_256_cbc()
            }
        }
    }
}

fn validate_cipher_key(
    algorithm: CipherAlgorithm,
    mode: CipherMode,
    key_type: KeyType,
) -> Result<()> {
    if algorithm.is_aes() {
        if !key_type.is_aes() {
            return Err(SecError::InvalidParameters(
                "AES cipher algorithms require an AES key".into(),
            ));
        }
        return Ok(());
    }

    if !key_type.is_rsa() {
        return Err(SecError::InvalidParameters(
            "RSA cipher algorithms require an RSA key".into(),
        ));
    }
    if mode == CipherMode::Decrypt && !key_type.is_rsa_private() {
        return Err(SecError::InvalidParameters(
            "RSA decryption requires a private key".into(),
        ));
    }
    Ok(())
}

fn rsa_process(
    material: &RsaKeyMaterial,
    mode: CipherMode,
    padding: Padding,
    input: &[u8],
) -> Result<Vec<u8>> {
    let overhead = if padding == Padding::PKCS1 {
        RSA_PKCS1_OVERHEAD
    } else {
        RSA_OAEP_OVERHEAD
    };

    match mode {
        CipherMode::Encrypt => {
            let written = match material {
                RsaKeyMaterial::Private(rsa) => {
                    let modulus = rsa.size() as usize;
                    check_rsa_encrypt_len(input.len(), modulus, overhead)?;
                    let mut out = vec![0u8; modulus];
                    let n = rsa.public_encrypt(input, &mut out, padding)?;
                    out.truncate(n);
                    out
                }
                RsaKeyMaterial::Public(rsa) => {
                    let modulus = rsa.size() as usize;
                    check_rsa_encrypt_len(input.len(), modulus, overhead)?;
                    let mut out = vec![0u8; modulus];
                    let n = rsa.public_encrypt(input, &mut out, padding)?;
                    out.truncate(n);
                    out
                }
            };
            Ok(written)
        }
        CipherMode::Decrypt => match material {
            RsaKeyMaterial::Private(rsa) => {
                let modulus = rsa.size() as usize;
                if input.len() != modulus {
                    return Err(SecError::InvalidInputSize(
                        "RSA ciphertext must be exactly one modulus long".into(),
                    ));
                }
                let mut out = vec![0u8; modulus];
                let n = rsa.private_decrypt(input, &mut out, padding)?;
                out.truncate(n);
                Ok(out)
            }
            RsaKeyMaterial::Public(_) => Err(SecError::InvalidParameters(
                "RSA decryption requires a private key".into(),
            )),
        },
    }
}

fn check_rsa_encrypt_len(input_len: usize, modulus: usize, overhead: usize) -> Result<()> {
    if input_len + overhead > modulus {
        return Err(SecError::InvalidInputSize(format!(
            "plaintext of {input_len} bytes does not fit the RSA modulus"
        )));
    }
    Ok(())
}
