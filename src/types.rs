//! Core identifiers, enumerations and size constants of the secure
//! processor.
//!
//! Intention: keep every tag that crosses a persistence boundary (envelope
//! header, info sidecars) behind a stable numeric encoding so that on-disk
//! records survive recompilation and enum reordering.

use crate::error::{Result, SecError};
use std::fmt;

/* ------------------------------ Object ids ------------------------------- */

/// Stable 64-bit name of a key, certificate, or bundle within a processor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// File stem used by the file-backed storage tier.
    pub fn file_stem(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#018x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Sentinel rejected by all provisioning entry points.
pub const OBJECT_ID_INVALID: ObjectId = ObjectId(u64::MAX);

/// Wrapped AES key protecting every key-store envelope payload.
pub const OBJECT_ID_STORE_AES_KEY: ObjectId = ObjectId(u64::MAX - 1);

/// Wrapped HMAC key authenticating every key-store envelope.
pub const OBJECT_ID_STORE_MAC_KEY: ObjectId = ObjectId(u64::MAX - 2);

/// HMAC-SHA-256 key sealing certificate records.
pub const OBJECT_ID_CERT_MAC_KEY: ObjectId = ObjectId(u64::MAX - 3);

/// Per-nonce AES base key produced by the key-ladder emulation.
pub const OBJECT_ID_BASE_KEY_AES: ObjectId = ObjectId(u64::MAX - 4);

/// Per-nonce HMAC base key produced by the key-ladder emulation.
pub const OBJECT_ID_BASE_KEY_MAC: ObjectId = ObjectId(u64::MAX - 5);

/// Scratch slot used while walking the key ladder.
pub const OBJECT_ID_DERIVE_TMP: ObjectId = ObjectId(u64::MAX - 6);

/* ------------------------------ Storage ---------------------------------- */

/// Where an object lives.
///
/// The soft-wrapped variants behave exactly like their plain counterparts on
/// this platform; they are kept distinct for parity with hardware backends
/// whose callers branch on them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    Ram,
    RamSoftWrapped,
    File,
    FileSoftWrapped,
    Oem,
}

impl StorageLocation {
    pub fn is_ram(&self) -> bool {
        matches!(self, StorageLocation::Ram | StorageLocation::RamSoftWrapped)
    }

    pub fn is_file(&self) -> bool {
        matches!(
            self,
            StorageLocation::File | StorageLocation::FileSoftWrapped
        )
    }
}

/* ------------------------------ Key types -------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyType {
    Aes128,
    Aes256,
    Hmac128,
    Hmac160,
    Hmac256,
    Rsa1024,
    Rsa2048,
    Rsa1024Public,
    Rsa2048Public,
}

impl KeyType {
    /// Key length in bytes; for RSA types this is the modulus size.
    pub fn key_len(&self) -> usize {
        match self {
            KeyType::Aes128 | KeyType::Hmac128 => 16,
            KeyType::Hmac160 => 20,
            KeyType::Aes256 | KeyType::Hmac256 => 32,
            KeyType::Rsa1024 | KeyType::Rsa1024Public => 128,
            KeyType::Rsa2048 | KeyType::Rsa2048Public => 256,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            KeyType::Aes128
                | KeyType::Aes256
                | KeyType::Hmac128
                | KeyType::Hmac160
                | KeyType::Hmac256
        )
    }

    pub fn is_aes(&self) -> bool {
        matches!(self, KeyType::Aes128 | KeyType::Aes256)
    }

    pub fn is_hmac(&self) -> bool {
        matches!(self, KeyType::Hmac128 | KeyType::Hmac160 | KeyType::Hmac256)
    }

    pub fn is_rsa(&self) -> bool {
        self.is_rsa_private() || self.is_rsa_public()
    }

    pub fn is_rsa_private(&self) -> bool {
        matches!(self, KeyType::Rsa1024 | KeyType::Rsa2048)
    }

    pub fn is_rsa_public(&self) -> bool {
        matches!(self, KeyType::Rsa1024Public | KeyType::Rsa2048Public)
    }

    pub(crate) fn tag(&self) -> u32 {
        match self {
            KeyType::Aes128 => 1,
            KeyType::Aes256 => 2,
            KeyType::Hmac128 => 3,
            KeyType::Hmac160 => 4,
            KeyType::Hmac256 => 5,
            KeyType::Rsa1024 => 6,
            KeyType::Rsa2048 => 7,
            KeyType::Rsa1024Public => 8,
            KeyType::Rsa2048Public => 9,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Result<Self> {
        Ok(match tag {
            1 => KeyType::Aes128,
            2 => KeyType::Aes256,
            3 => KeyType::Hmac128,
            4 => KeyType::Hmac160,
            5 => KeyType::Hmac256,
            6 => KeyType::Rsa1024,
            7 => KeyType::Rsa2048,
            8 => KeyType::Rsa1024Public,
            9 => KeyType::Rsa2048Public,
            other => {
                return Err(SecError::Failure(format!(
                    "unknown key type tag {other}"
                )))
            }
        })
    }
}

/* ------------------------------ Containers ------------------------------- */

/// Encoding of the bytes handed to key provisioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyContainer {
    RawAes128,
    RawAes256,
    RawHmac128,
    RawHmac160,
    RawHmac256,
    RawRsa1024,
    RawRsa2048,
    RawRsa1024Public,
    RawRsa2048Public,
    DerRsa1024,
    DerRsa2048,
    DerRsa1024Public,
    DerRsa2048Public,
    PemRsa1024,
    PemRsa2048,
    PemRsa1024Public,
    PemRsa2048Public,
    /// A pre-wrapped key-store envelope, accepted verbatim after validation.
    Store,
    /// Two 16-byte key-ladder inputs expanded under the device root key on
    /// every unwrap.
    Derived,
    /// A container tag the core does not understand; routed to the
    /// processor's custom container handler when one is configured.
    Other(u32),
}

impl KeyContainer {
    /// The raw container that carries a clear key of the given type.
    pub fn raw_for(key_type: KeyType) -> KeyContainer {
        match key_type {
            KeyType::Aes128 => KeyContainer::RawAes128,
            KeyType::Aes256 => KeyContainer::RawAes256,
            KeyType::Hmac128 => KeyContainer::RawHmac128,
            KeyType::Hmac160 => KeyContainer::RawHmac160,
            KeyType::Hmac256 => KeyContainer::RawHmac256,
            KeyType::Rsa1024 => KeyContainer::RawRsa1024,
            KeyType::Rsa2048 => KeyContainer::RawRsa2048,
            KeyType::Rsa1024Public => KeyContainer::RawRsa1024Public,
            KeyType::Rsa2048Public => KeyContainer::RawRsa2048Public,
        }
    }

    pub(crate) fn tag(&self) -> u32 {
        match self {
            KeyContainer::RawAes128 => 1,
            KeyContainer::RawAes256 => 2,
            KeyContainer::RawHmac128 => 3,
            KeyContainer::RawHmac160 => 4,
            KeyContainer::RawHmac256 => 5,
            KeyContainer::RawRsa1024 => 6,
            KeyContainer::RawRsa2048 => 7,
            KeyContainer::RawRsa1024Public => 8,
            KeyContainer::RawRsa2048Public => 9,
            KeyContainer::DerRsa1024 => 10,
            KeyContainer::DerRsa2048 => 11,
            KeyContainer::DerRsa1024Public => 12,
            KeyContainer::DerRsa2048Public => 13,
            KeyContainer::PemRsa1024 => 14,
            KeyContainer::PemRsa2048 => 15,
            KeyContainer::PemRsa1024Public => 16,
            KeyContainer::PemRsa2048Public => 17,
            KeyContainer::Store => 18,
            KeyContainer::Derived => 19,
            KeyContainer::Other(tag) => *tag,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Self {
        match tag {
            1 => KeyContainer::RawAes128,
            2 => KeyContainer::RawAes256,
            3 => KeyContainer::RawHmac128,
            4 => KeyContainer::RawHmac160,
            5 => KeyContainer::RawHmac256,
            6 => KeyContainer::RawRsa1024,
            7 => KeyContainer::RawRsa2048,
            8 => KeyContainer::RawRsa1024Public,
            9 => KeyContainer::RawRsa2048Public,
            10 => KeyContainer::DerRsa1024,
            11 => KeyContainer::DerRsa2048,
            12 => KeyContainer::DerRsa1024Public,
            13 => KeyContainer::DerRsa2048Public,
            14 => KeyContainer::PemRsa1024,
            15 => KeyContainer::PemRsa2048,
            16 => KeyContainer::PemRsa1024Public,
            17 => KeyContainer::PemRsa2048Public,
            18 => KeyContainer::Store,
            19 => KeyContainer::Derived,
            other => KeyContainer::Other(other),
        }
    }
}

/// What the payload inside a key-store envelope holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InnerKind {
    /// The clear key material itself.
    Raw,
    /// Two ladder inputs; the key is re-derived from the root key on unwrap.
    Derived,
}

impl InnerKind {
    pub(crate) fn tag(&self) -> u32 {
        match self {
            InnerKind::Raw => 0,
            InnerKind::Derived => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(InnerKind::Raw),
            1 => Ok(InnerKind::Derived),
            other => Err(SecError::Failure(format!(
                "unknown inner container tag {other}"
            ))),
        }
    }
}

/// Encoding of the bytes handed to certificate provisioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateContainer {
    X509Der,
    X509Pem,
}

/* ------------------------------ Algorithms ------------------------------- */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherAlgorithm {
    AesEcbNoPadding,
    AesEcbPkcs7,
    AesCbcNoPadding,
    AesCbcPkcs7,
    AesCtr,
    RsaPkcs1,
    RsaOaep,
}

impl CipherAlgorithm {
    pub fn is_aes(&self) -> bool {
        !self.is_rsa()
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, CipherAlgorithm::RsaPkcs1 | CipherAlgorithm::RsaOaep)
    }

    pub fn needs_iv(&self) -> bool {
        matches!(
            self,
            CipherAlgorithm::AesCbcNoPadding
                | CipherAlgorithm::AesCbcPkcs7
                | CipherAlgorithm::AesCtr
        )
    }

    pub fn is_pkcs7(&self) -> bool {
        matches!(
            self,
            CipherAlgorithm::AesEcbPkcs7 | CipherAlgorithm::AesCbcPkcs7
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherMode {
    Encrypt,
    Decrypt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn digest_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacAlgorithm {
    HmacSha1,
    HmacSha256,
    CmacAes128,
}

impl MacAlgorithm {
    pub fn mac_len(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
            MacAlgorithm::CmacAes128 => 16,
        }
    }

    /// Digest behind the HMAC construction; CMAC has none.
    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        match self {
            MacAlgorithm::HmacSha1 => Some(DigestAlgorithm::Sha1),
            MacAlgorithm::HmacSha256 => Some(DigestAlgorithm::Sha256),
            MacAlgorithm::CmacAes128 => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha1Pkcs,
    RsaSha1PkcsDigest,
    RsaSha256Pkcs,
    RsaSha256PkcsDigest,
}

impl SignatureAlgorithm {
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        match self {
            SignatureAlgorithm::RsaSha1Pkcs | SignatureAlgorithm::RsaSha1PkcsDigest => {
                DigestAlgorithm::Sha1
            }
            SignatureAlgorithm::RsaSha256Pkcs | SignatureAlgorithm::RsaSha256PkcsDigest => {
                DigestAlgorithm::Sha256
            }
        }
    }

    /// True when the caller supplies the digest instead of the message.
    pub fn is_digest(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::RsaSha1PkcsDigest | SignatureAlgorithm::RsaSha256PkcsDigest
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureMode {
    Sign,
    Verify,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RandomAlgorithm {
    /// Cryptographic DRBG.
    True,
    /// Pseudo-random generator.
    Prng,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyLadderRoot {
    /// Device-unique root key; the only root this platform implements.
    Unique,
    Shared,
}

/* ------------------------------ Limits ----------------------------------- */

pub const AES_BLOCK_LEN: usize = 16;
pub const SYMMETRIC_KEY_MAX_LEN: usize = 32;
pub const MAC_MAX_LEN: usize = 32;
pub const DIGEST_MAX_LEN: usize = 32;
pub const DEVICE_ID_LEN: usize = 16;
pub const ROOT_KEY_LEN: usize = 16;

/// Largest key container accepted at provisioning.
pub const KEY_CONTAINER_MAX_LEN: usize = 2048;

/// Largest certificate accepted at provisioning (DER bytes).
pub const CERTIFICATE_MAX_LEN: usize = 65536;

/// Largest opaque bundle accepted at provisioning.
pub const BUNDLE_MAX_LEN: usize = 4096;

/// Longest accepted storage directory path.
pub const STORAGE_PATH_MAX_LEN: usize = 4096;
