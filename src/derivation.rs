//! Key-derivation engine.
//!
//! Every derivation starts by provisioning the per-nonce base key pair:
//! four ladder inputs are computed from the nonce, chained through AES-ECB
//! encryptions starting at the device root key, and the final value is
//! provisioned as both the AES and the HMAC base key. The KDFs then run
//! over the base keys and provision their output as a new key object bound
//! to the nonce. Identical inputs always reproduce identical keys.

use crate::crypto;
use crate::error::{Result, SecError};
use crate::processor::SecureProcessor;
use crate::types::{
    CipherAlgorithm, CipherMode, DigestAlgorithm, KeyContainer, KeyLadderRoot, KeyType,
    MacAlgorithm, ObjectId, StorageLocation, AES_BLOCK_LEN, OBJECT_ID_BASE_KEY_AES,
    OBJECT_ID_BASE_KEY_MAC, OBJECT_ID_DERIVE_TMP,
};
use hkdf::Hkdf;
use hmac::Hmac;
use pbkdf2::pbkdf2;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

// Semantic tags naming how the ladder inputs are computed; they are part
// of the derivation, not negotiated.
const INPUT_DERIVATION_TAG: &str = "sivSha1";
const INPUT_CIPHER_TAG: &str = "aesEcbNone";
const INPUT_DIGEST_MARKER: u8 = 1; // SHA-1

/// The four 16-byte ladder inputs for a base-key derivation:
/// `c_i = SHA-1(tags || marker || nonce || BE32(i))` truncated to one block.
fn base_key_ladder_inputs(nonce: &[u8]) -> [[u8; AES_BLOCK_LEN]; 4] {
    let mut out = [[0u8; AES_BLOCK_LEN]; 4];
    for (i, input) in out.iter_mut().enumerate() {
        let mut hasher = Sha1::new();
        hasher.update(INPUT_DERIVATION_TAG.as_bytes());
        hasher.update(INPUT_CIPHER_TAG.as_bytes());
        hasher.update([INPUT_DIGEST_MARKER]);
        hasher.update(nonce);
        hasher.update((i as u32 + 1).to_be_bytes());
        input.copy_from_slice(&hasher.finalize()[..AES_BLOCK_LEN]);
    }
    out
}

impl SecureProcessor {
    /// Walk the emulated key ladder for `nonce` and provision the result
    /// as the AES and HMAC base keys. Each ladder step runs through the
    /// regular cipher pipeline under the scratch identifier, which is
    /// deleted again before returning.
    pub(crate) fn provision_base_key(&mut self, nonce: &[u8]) -> Result<()> {
        let inputs = base_key_ladder_inputs(nonce);

        let mut step = Zeroizing::new(self.root_key.to_vec());
        for input in &inputs {
            self.provision_key(
                OBJECT_ID_DERIVE_TMP,
                StorageLocation::Ram,
                KeyContainer::RawAes128,
                &step,
            )?;
            let handle = self.key(OBJECT_ID_DERIVE_TMP)?;
            let mut cipher = self.cipher(
                CipherAlgorithm::AesEcbNoPadding,
                CipherMode::Encrypt,
                &handle,
                None,
            )?;
            let next = Zeroizing::new(cipher.process(input, true)?);
            drop(cipher);
            self.delete_key(OBJECT_ID_DERIVE_TMP)?;
            step = next;
        }

        self.provision_key(
            OBJECT_ID_BASE_KEY_AES,
            StorageLocation::RamSoftWrapped,
            KeyContainer::RawAes128,
            &step,
        )?;
        self.provision_key(
            OBJECT_ID_BASE_KEY_MAC,
            StorageLocation::RamSoftWrapped,
            KeyContainer::RawHmac128,
            &step,
        )
    }

    /// HKDF over the HMAC base key: extract keyed by the base key with
    /// `salt` as message, then the standard expand recurrence truncated to
    /// the derived type's length.
    pub fn derive_hkdf(
        &mut self,
        id: ObjectId,
        key_type: KeyType,
        location: StorageLocation,
        mac_algorithm: MacAlgorithm,
        nonce: &[u8],
        salt: &[u8],
        info: &[u8],
    ) -> Result<()> {
        let digest_algorithm = check_kdf_target(key_type, mac_algorithm)?;
        self.provision_base_key(nonce)?;

        let base_mac = self.base_key_clear(OBJECT_ID_BASE_KEY_MAC)?;
        let prk = Zeroizing::new(crypto::hmac(digest_algorithm, &base_mac, salt)?);

        let mut okm = Zeroizing::new(vec![0u8; key_type.key_len()]);
        let expanded = match digest_algorithm {
            DigestAlgorithm::Sha1 => Hkdf::<Sha1>::from_prk(&prk)
                .ok()
                .and_then(|kdf| kdf.expand(info, &mut okm).ok()),
            DigestAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(&prk)
                .ok()
                .and_then(|kdf| kdf.expand(info, &mut okm).ok()),
        };
        if expanded.is_none() {
            return Err(SecError::Failure("HKDF expansion failed".into()));
        }

        self.provision_key(id, location, KeyContainer::raw_for(key_type), &okm)
    }

    /// Concat-KDF over the AES base key:
    /// `H_i = digest(BE32(i) || base_key || other_info)`, concatenated and
    /// truncated to the derived type's length.
    pub fn derive_concat_kdf(
        &mut self,
        id: ObjectId,
        key_type: KeyType,
        location: StorageLocation,
        digest_algorithm: DigestAlgorithm,
        nonce: &[u8],
        other_info: &[u8],
    ) -> Result<()> {
        if !key_type.is_symmetric() {
            return Err(SecError::InvalidParameters(
                "only symmetric keys can be derived".into(),
            ));
        }
        self.provision_base_key(nonce)?;

        let base_aes = self.base_key_clear(OBJECT_ID_BASE_KEY_AES)?;
        let key_len = key_type.key_len();
        let digest_len = digest_algorithm.digest_len();
        let rounds = (key_len + digest_len - 1) / digest_len;

        let mut out = Zeroizing::new(Vec::with_capacity(rounds * digest_len));
        for round in 1..=rounds as u32 {
            let hash = Zeroizing::new(match digest_algorithm {
                DigestAlgorithm::Sha1 => {
                    let mut hasher = Sha1::new();
                    hasher.update(round.to_be_bytes());
                    hasher.update(&base_aes);
                    hasher.update(other_info);
                    hasher.finalize().to_vec()
                }
                DigestAlgorithm::Sha256 => {
                    let mut hasher = Sha256::new();
                    hasher.update(round.to_be_bytes());
                    hasher.update(&base_aes);
                    hasher.update(other_info);
                    hasher.finalize().to_vec()
                }
            });
            out.extend_from_slice(&hash);
        }
        out.truncate(key_len);

        self.provision_key(id, location, KeyContainer::raw_for(key_type), &out)
    }

    /// PBKDF2 with the HMAC base key as password.
    pub fn derive_pbkdf2(
        &mut self,
        id: ObjectId,
        key_type: KeyType,
        location: StorageLocation,
        mac_algorithm: MacAlgorithm,
        nonce: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> Result<()> {
        let digest_algorithm = check_kdf_target(key_type, mac_algorithm)?;
        if iterations == 0 {
            return Err(SecError::InvalidParameters(
                "PBKDF2 needs at least one iteration".into(),
            ));
        }
        self.provision_base_key(nonce)?;

        let base_mac = self.base_key_clear(OBJECT_ID_BASE_KEY_MAC)?;
        let mut out = Zeroizing::new(vec![0u8; key_type.key_len()]);
        let derived = match digest_algorithm {
            DigestAlgorithm::Sha1 => {
                pbkdf2::<Hmac<Sha1>>(&base_mac, salt, iterations, &mut out).is_ok()
            }
            DigestAlgorithm::Sha256 => {
                pbkdf2::<Hmac<Sha256>>(&base_mac, salt, iterations, &mut out).is_ok()
            }
        };
        if !derived {
            return Err(SecError::Failure("PBKDF2 derivation failed".into()));
        }

        self.provision_key(id, location, KeyContainer::raw_for(key_type), &out)
    }

    /// Vendor AES-128 derivation: SHA-256 of the input split into the two
    /// ladder inputs of a derived container.
    pub fn derive_vendor_aes128(
        &mut self,
        id: ObjectId,
        location: StorageLocation,
        input: &[u8],
    ) -> Result<()> {
        let digest = Zeroizing::new(self.digest_once(DigestAlgorithm::Sha256, input)?);
        self.provision_key(id, location, KeyContainer::Derived, &digest)
    }

    /// Store two caller-supplied ladder inputs as a derived container
    /// rooted in the device-unique key.
    pub fn derive_key_ladder_aes128(
        &mut self,
        id: ObjectId,
        location: StorageLocation,
        root: KeyLadderRoot,
        input1: Option<&[u8]>,
        input2: Option<&[u8]>,
        input3: Option<&[u8]>,
        input4: Option<&[u8]>,
    ) -> Result<()> {
        if root != KeyLadderRoot::Unique {
            return Err(SecError::UnimplementedFeature(
                "only the device-unique ladder root is available",
            ));
        }

        let input1 = input1.ok_or_else(|| {
            SecError::InvalidParameters("ladder input1 is required".into())
        })?;
        let input2 = input2.ok_or_else(|| {
            SecError::InvalidParameters("ladder input2 is required".into())
        })?;
        if input3.is_some() || input4.is_some() {
            return Err(SecError::InvalidParameters(
                "the ladder takes exactly two inputs".into(),
            ));
        }
        if input1.len() != AES_BLOCK_LEN || input2.len() != AES_BLOCK_LEN {
            return Err(SecError::InvalidParameters(
                "ladder inputs must be one AES block each".into(),
            ));
        }

        let mut payload = Zeroizing::new(Vec::with_capacity(2 * AES_BLOCK_LEN));
        payload.extend_from_slice(input1);
        payload.extend_from_slice(input2);
        self.provision_key(id, location, KeyContainer::Derived, &payload)
    }

    /// Digest of the clear base key for the given nonce.
    pub fn compute_base_key_digest(
        &mut self,
        nonce: &[u8],
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<u8>> {
        self.provision_base_key(nonce)?;
        let base = self.base_key_clear(OBJECT_ID_BASE_KEY_MAC)?;
        self.digest_once(algorithm, &base)
    }

    fn base_key_clear(&self, id: ObjectId) -> Result<Zeroizing<Vec<u8>>> {
        let (record, _) = self.keys.retrieve(id)?;
        self.clear_symmetric_key(&record)
    }
}

fn check_kdf_target(key_type: KeyType, mac_algorithm: MacAlgorithm) -> Result<DigestAlgorithm> {
    if !key_type.is_symmetric() {
        return Err(SecError::InvalidParameters(
            "only symmetric keys can be derived".into(),
        ));
    }
    mac_algorithm.digest_algorithm().ok_or_else(|| {
        SecError::InvalidParameters("CMAC cannot drive this derivation".into())
    })
}
