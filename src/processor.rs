//! The processor handle: configuration, boot-time provisioning of the
//! internal ladder keys, and release semantics.

use crate::bundle::BundleRecord;
use crate::certificate::CertificateRecord;
use crate::error::{Result, SecError};
use crate::keys::KeyRecord;
use crate::storage::ObjectStore;
use crate::store;
use crate::types::{
    DigestAlgorithm, InnerKind, KeyContainer, KeyType, ObjectId, StorageLocation,
    DEVICE_ID_LEN, OBJECT_ID_CERT_MAC_KEY, OBJECT_ID_STORE_AES_KEY, OBJECT_ID_STORE_MAC_KEY,
    ROOT_KEY_LEN, STORAGE_PATH_MAX_LEN,
};
use log::debug;
use std::fs;
use std::path::PathBuf;
use zeroize::{Zeroize, Zeroizing};

/// Handler invoked for key container types the core does not understand.
/// Returns the clear key type and payload to provision in its place.
pub type CustomContainerHandler =
    Box<dyn Fn(u32, &[u8], ObjectId) -> Result<(KeyType, Zeroizing<Vec<u8>>)> + Send + Sync>;

const DEFAULT_KEY_DIR: &str = "/opt/secproc/keys";
const DEFAULT_CERT_DIR: &str = "/opt/secproc/certs";
const DEFAULT_BUNDLE_DIR: &str = "/opt/secproc/bundles";

const STORE_AES_LADDER_LABEL: &str = "aesKeyLadderInput";
const STORE_MAC_LADDER_LABEL: &str = "macKeyLadderInput";

// Seed of the certificate-MAC key derived at boot.
const CERT_MAC_NONCE: &[u8] = b"abcdefghijklmnopqr\0\0";
const CERT_MAC_OTHER_INFO: &[u8] = b"certMacKeyhmacSha256concatKdfSha1";

/// Construction parameters for a [`SecureProcessor`].
///
/// Absent storage directories fall back to per-platform defaults; absent
/// device id / root key fall back to the fixed software-platform values
/// (a hardware backend would draw both from fuses).
#[derive(Default)]
pub struct ProcessorConfig {
    pub key_dir: Option<PathBuf>,
    pub cert_dir: Option<PathBuf>,
    pub bundle_dir: Option<PathBuf>,
    pub device_id: Option<[u8; DEVICE_ID_LEN]>,
    pub root_key: Option<[u8; ROOT_KEY_LEN]>,
    pub custom_container: Option<CustomContainerHandler>,
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = Some(dir.into());
        self
    }

    pub fn cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    pub fn bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    pub fn device_id(mut self, device_id: [u8; DEVICE_ID_LEN]) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn root_key(mut self, root_key: [u8; ROOT_KEY_LEN]) -> Self {
        self.root_key = Some(root_key);
        self
    }

    pub fn custom_container(mut self, handler: CustomContainerHandler) -> Self {
        self.custom_container = Some(handler);
        self
    }
}

fn default_device_id() -> [u8; DEVICE_ID_LEN] {
    let mut id = [0u8; DEVICE_ID_LEN];
    for (i, byte) in id.iter_mut().take(8).enumerate() {
        *byte = i as u8;
    }
    id
}

fn default_root_key() -> [u8; ROOT_KEY_LEN] {
    let mut key = [0u8; ROOT_KEY_LEN];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = i as u8;
    }
    key
}

/// A software secure processor: the namespace of key, certificate, and
/// bundle objects plus the cryptographic services operating through them.
///
/// Operations on one processor observe each other in program order; sharing
/// a processor across threads requires external mutual exclusion, and two
/// processors must not point at overlapping storage directories.
pub struct SecureProcessor {
    pub(crate) device_id: [u8; DEVICE_ID_LEN],
    pub(crate) root_key: [u8; ROOT_KEY_LEN],
    pub(crate) keys: ObjectStore<KeyRecord>,
    pub(crate) certs: ObjectStore<CertificateRecord>,
    pub(crate) bundles: ObjectStore<BundleRecord>,
    pub(crate) custom_container: Option<CustomContainerHandler>,
}

impl SecureProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        openssl::init();

        let mut proc = Self {
            device_id: config.device_id.unwrap_or_else(default_device_id),
            root_key: config.root_key.unwrap_or_else(default_root_key),
            keys: ObjectStore::new(resolve_storage_dir(config.key_dir, DEFAULT_KEY_DIR)?),
            certs: ObjectStore::new(resolve_storage_dir(config.cert_dir, DEFAULT_CERT_DIR)?),
            bundles: ObjectStore::new(resolve_storage_dir(
                config.bundle_dir,
                DEFAULT_BUNDLE_DIR,
            )?),
            custom_container: config.custom_container,
        };

        proc.provision_store_key(OBJECT_ID_STORE_AES_KEY, STORE_AES_LADDER_LABEL)?;
        proc.provision_store_key(OBJECT_ID_STORE_MAC_KEY, STORE_MAC_LADDER_LABEL)?;

        proc.derive_concat_kdf(
            OBJECT_ID_CERT_MAC_KEY,
            KeyType::Hmac256,
            StorageLocation::RamSoftWrapped,
            DigestAlgorithm::Sha256,
            CERT_MAC_NONCE,
            CERT_MAC_OTHER_INFO,
        )?;

        debug!("secure processor ready, device id {}", hex::encode(proc.device_id));
        Ok(proc)
    }

    /// The fixed 16-byte device identifier.
    pub fn device_id(&self) -> [u8; DEVICE_ID_LEN] {
        self.device_id
    }

    /// Loggable one-line summary of this processor.
    pub fn info(&self) -> String {
        format!(
            "device id: {}, platform: openssl, version: {}",
            hex::encode(self.device_id),
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Provision one of the two envelope-protection keys: a derived-inner
    /// record whose ladder inputs are a deterministic function of the
    /// device identity. It is stored through the unprotected envelope path
    /// since these keys are what protect every other envelope.
    fn provision_store_key(&mut self, id: ObjectId, label: &str) -> Result<()> {
        let inputs = store::store_key_ladder_inputs(label, &self.device_id);
        let blob = store::seal_unprotected(
            KeyContainer::Derived,
            InnerKind::Derived,
            KeyType::Aes128,
            &inputs,
        );
        self.provision_key(id, StorageLocation::RamSoftWrapped, KeyContainer::Store, &blob)
    }
}

impl Drop for SecureProcessor {
    fn drop(&mut self) {
        // Release drops every RAM record; file-backed records stay behind.
        self.keys.clear_ram();
        self.certs.clear_ram();
        self.bundles.clear_ram();
        self.root_key.zeroize();
    }
}

fn resolve_storage_dir(provided: Option<PathBuf>, default: &str) -> Result<PathBuf> {
    let dir = provided.unwrap_or_else(|| PathBuf::from(default));
    if dir.as_os_str().len() > STORAGE_PATH_MAX_LEN {
        return Err(SecError::InvalidParameters(
            "storage directory path is too long".into(),
        ));
    }
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
