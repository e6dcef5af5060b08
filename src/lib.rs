//! secproc – a software secure processor.
//!
//! Emulates, on a general-purpose host, the services a hardware security
//! engine exposes to an application: provisioning and lifecycle of opaque
//! key, certificate, and bundle objects named by stable identifiers, and
//! the cipher, digest, MAC, signature, and random primitives that operate
//! through those handles without surfacing key material.

pub mod bundle;
pub mod certificate;
pub mod cipher;
pub mod crypto;
pub mod derivation;
pub mod digest;
pub mod error;
pub mod keys;
pub mod mac;
pub mod processor;
pub mod random;
pub mod signature;
mod storage;
mod store;
pub mod types;

pub use error::{Result, SecError};

pub use processor::{CustomContainerHandler, ProcessorConfig, SecureProcessor};

pub use bundle::BundleHandle;
pub use certificate::CertificateHandle;
pub use cipher::CipherSession;
pub use crypto::{RsaRawPrivateKey, RsaRawPublicKey};
pub use digest::DigestSession;
pub use keys::{KeyHandle, KeyInfo};
pub use mac::MacSession;
pub use random::RandomSession;
pub use signature::SignatureSession;

pub use types::{
    CertificateContainer, CipherAlgorithm, CipherMode, DigestAlgorithm, InnerKind, KeyContainer,
    KeyLadderRoot, KeyType, MacAlgorithm, ObjectId, RandomAlgorithm, SignatureAlgorithm,
    SignatureMode, StorageLocation, OBJECT_ID_BASE_KEY_AES, OBJECT_ID_BASE_KEY_MAC,
    OBJECT_ID_CERT_MAC_KEY, OBJECT_ID_DERIVE_TMP, OBJECT_ID_INVALID, OBJECT_ID_STORE_AES_KEY,
    OBJECT_ID_STORE_MAC_KEY,
};
