//! Key records, the multi-encoding container provisioner, and the key half
//! of the processor API.
//!
//! Every key that reaches a storage tier is wrapped in the key-store
//! envelope first; clear key material only ever lives in zeroizing stack
//! buffers while an operation needs it.

use crate::crypto::{self, RsaRawPrivateKey, RsaRawPublicKey};
use crate::error::{Result, SecError};
use crate::processor::SecureProcessor;
use crate::storage::Record;
use crate::store;
use crate::types::{
    InnerKind, KeyContainer, KeyLadderRoot, KeyType, ObjectId, StorageLocation, AES_BLOCK_LEN,
    KEY_CONTAINER_MAX_LEN, OBJECT_ID_INVALID, OBJECT_ID_STORE_AES_KEY, OBJECT_ID_STORE_MAC_KEY,
};
use log::error;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use zeroize::Zeroizing;

/* ------------------------------ Records ---------------------------------- */

/// Metadata kept next to a wrapped key.
#[derive(Clone, Copy, Debug)]
pub struct KeyInfo {
    pub key_type: KeyType,
    /// Container the wrapped payload was provisioned from.
    pub container: KeyContainer,
    /// Whether the payload is clear key material or ladder inputs.
    pub inner: InnerKind,
}

impl KeyInfo {
    const ENCODED_LEN: usize = 12;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.key_type.tag().to_le_bytes());
        out.extend_from_slice(&self.container.tag().to_le_bytes());
        out.extend_from_slice(&self.inner.tag().to_le_bytes());
        out
    }

    fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::ENCODED_LEN {
            return Err(SecError::Failure("key info sidecar has the wrong size".into()));
        }
        Ok(Self {
            key_type: KeyType::from_tag(u32::from_le_bytes(data[0..4].try_into().unwrap()))?,
            container: KeyContainer::from_tag(u32::from_le_bytes(data[4..8].try_into().unwrap())),
            inner: InnerKind::from_tag(u32::from_le_bytes(data[8..12].try_into().unwrap()))?,
        })
    }
}

/// A wrapped key as it sits in a storage tier.
#[derive(Clone)]
pub(crate) struct KeyRecord {
    pub info: KeyInfo,
    pub envelope: Vec<u8>,
}

impl Record for KeyRecord {
    const KIND: &'static str = "key";
    const DATA_EXT: &'static str = "key";
    const INFO_EXT: Option<&'static str> = Some("keyinfo");

    fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        (self.envelope.clone(), Some(self.info.encode()))
    }

    fn decode(data: Vec<u8>, info: Option<Vec<u8>>) -> Result<Self> {
        let info = info.ok_or_else(|| SecError::Failure("key info sidecar missing".into()))?;
        Ok(Self {
            info: KeyInfo::decode(&info)?,
            envelope: data,
        })
    }
}

/// Immutable snapshot of a key at lookup time. Later provisioning under the
/// same identifier does not invalidate an existing handle.
pub struct KeyHandle {
    pub(crate) id: ObjectId,
    pub(crate) location: StorageLocation,
    pub(crate) record: KeyRecord,
}

impl KeyHandle {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn location(&self) -> StorageLocation {
        self.location
    }

    pub fn key_type(&self) -> KeyType {
        self.record.info.key_type
    }
}

pub(crate) enum RsaKeyMaterial {
    Private(Rsa<Private>),
    Public(Rsa<Public>),
}

/* ------------------------------ Processor API ----------------------------- */

impl SecureProcessor {
    /// Provision a key object from one of the supported container
    /// encodings and store it at the requested location.
    pub fn provision_key(
        &mut self,
        id: ObjectId,
        location: StorageLocation,
        container: KeyContainer,
        data: &[u8],
    ) -> Result<()> {
        let record = self.process_key_container(id, container, data)?;
        self.keys.store(id, location, record)
    }

    /// Generate a fresh key of the given type and provision it.
    pub fn generate_key(
        &mut self,
        id: ObjectId,
        key_type: KeyType,
        location: StorageLocation,
    ) -> Result<()> {
        match self.key(id) {
            Ok(_) => return Err(SecError::ItemAlreadyProvisioned),
            Err(SecError::NoSuchItem) => {}
            Err(err) => return Err(err),
        }

        if key_type.is_symmetric() {
            let mut clear = Zeroizing::new(vec![0u8; key_type.key_len()]);
            crypto::random_bytes(&mut clear)?;
            return self.provision_key(id, location, KeyContainer::raw_for(key_type), &clear);
        }

        if key_type.is_rsa_private() {
            let rsa = Rsa::generate(key_type.key_len() as u32 * 8)?;
            let raw = RsaRawPrivateKey::from_rsa(&rsa)?;
            let encoded = Zeroizing::new(raw.to_bytes());
            return self.provision_key(id, location, KeyContainer::raw_for(key_type), &encoded);
        }

        Err(SecError::UnimplementedFeature(
            "only symmetric and RSA private keys can be generated",
        ))
    }

    /// Look up a key by identifier.
    pub fn key(&self, id: ObjectId) -> Result<KeyHandle> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters("invalid object id".into()));
        }
        let (record, location) = self.keys.retrieve(id)?;

        // A tampered envelope never hands out a handle.
        self.open_envelope(&record.envelope)
            .map_err(|_| SecError::VerificationFailed)?;

        Ok(KeyHandle {
            id,
            location,
            record,
        })
    }

    pub fn delete_key(&mut self, id: ObjectId) -> Result<()> {
        self.keys.delete(id)
    }

    pub fn list_keys(&self) -> Vec<ObjectId> {
        self.keys.list()
    }

    /// Extract the public half of an RSA key in the raw public layout.
    /// Works for private and public records alike.
    pub fn extract_public_key(&self, key: &KeyHandle) -> Result<RsaRawPublicKey> {
        match self.rsa_material(&key.record)? {
            RsaKeyMaterial::Private(rsa) => RsaRawPublicKey::from_rsa(&rsa),
            RsaKeyMaterial::Public(rsa) => RsaRawPublicKey::from_rsa(&rsa),
        }
    }

    /// Shallowest key ladder this platform can walk for the given root.
    pub fn key_ladder_min_depth(&self, root: KeyLadderRoot) -> usize {
        // The emulated ladder always has exactly two levels.
        match root {
            KeyLadderRoot::Unique => 2,
            _ => 0,
        }
    }

    /// Deepest key ladder this platform can walk for the given root.
    pub fn key_ladder_max_depth(&self, root: KeyLadderRoot) -> usize {
        match root {
            KeyLadderRoot::Unique => 2,
            _ => 0,
        }
    }

    /* -------------------------- Container parsing ------------------------- */

    fn process_key_container(
        &self,
        id: ObjectId,
        container: KeyContainer,
        data: &[u8],
    ) -> Result<KeyRecord> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters(
                "cannot provision the invalid object id".into(),
            ));
        }
        if data.len() > KEY_CONTAINER_MAX_LEN {
            return Err(SecError::InvalidInputSize(format!(
                "key container of {} bytes exceeds the {KEY_CONTAINER_MAX_LEN} byte limit",
                data.len()
            )));
        }

        match container {
            KeyContainer::RawAes128
            | KeyContainer::RawAes256
            | KeyContainer::RawHmac128
            | KeyContainer::RawHmac160
            | KeyContainer::RawHmac256 => {
                let key_type = raw_symmetric_type(container);
                if data.len() != key_type.key_len() {
                    return Err(SecError::InvalidParameters(
                        "raw symmetric container has the wrong length".into(),
                    ));
                }
                self.wrap(container, InnerKind::Raw, key_type, data)
            }

            KeyContainer::RawRsa1024 | KeyContainer::RawRsa2048 => {
                let key_type = if container == KeyContainer::RawRsa1024 {
                    KeyType::Rsa1024
                } else {
                    KeyType::Rsa2048
                };
                let raw = RsaRawPrivateKey::from_bytes(data, key_type)?;
                let rsa = raw.to_rsa()?;
                if rsa.size() as usize != key_type.key_len() {
                    return Err(SecError::InvalidParameters(
                        "RSA modulus size does not match the container type".into(),
                    ));
                }
                self.wrap(container, InnerKind::Raw, key_type, data)
            }

            KeyContainer::RawRsa1024Public | KeyContainer::RawRsa2048Public => {
                let key_type = if container == KeyContainer::RawRsa1024Public {
                    KeyType::Rsa1024Public
                } else {
                    KeyType::Rsa2048Public
                };
                let raw = RsaRawPublicKey::from_bytes(data, key_type)?;
                let rsa = raw.to_rsa()?;
                if rsa.size() as usize != key_type.key_len() {
                    return Err(SecError::InvalidParameters(
                        "RSA modulus size does not match the container type".into(),
                    ));
                }
                self.wrap(container, InnerKind::Raw, key_type, data)
            }

            KeyContainer::DerRsa1024 | KeyContainer::DerRsa2048 => {
                let key_type = if container == KeyContainer::DerRsa1024 {
                    KeyType::Rsa1024
                } else {
                    KeyType::Rsa2048
                };
                // PKCS#8 first, then auto-detected DER private key.
                let pkey = PKey::private_key_from_pkcs8(data)
                    .or_else(|_| PKey::private_key_from_der(data))
                    .map_err(|err| {
                        error!("DER RSA private key parse failed: {err}");
                        SecError::InvalidParameters("invalid DER RSA private key".into())
                    })?;
                let rsa = pkey.rsa().map_err(|_| {
                    SecError::InvalidParameters("DER container does not hold an RSA key".into())
                })?;
                self.reprocess_rsa_private(id, key_type, &rsa)
            }

            KeyContainer::PemRsa1024 | KeyContainer::PemRsa2048 => {
                let key_type = if container == KeyContainer::PemRsa1024 {
                    KeyType::Rsa1024
                } else {
                    KeyType::Rsa2048
                };
                // Encrypted PEM is not provisionable; the callback refuses
                // to supply a passphrase.
                let rsa = Rsa::private_key_from_pem_callback(data, |_| Ok(0)).map_err(|err| {
                    error!("PEM RSA private key parse failed: {err}");
                    SecError::InvalidParameters("invalid PEM RSA private key".into())
                })?;
                self.reprocess_rsa_private(id, key_type, &rsa)
            }

            KeyContainer::DerRsa1024Public | KeyContainer::DerRsa2048Public => {
                let key_type = if container == KeyContainer::DerRsa1024Public {
                    KeyType::Rsa1024Public
                } else {
                    KeyType::Rsa2048Public
                };
                // Bare RSAPublicKey first, then SubjectPublicKeyInfo.
                let rsa = Rsa::public_key_from_der_pkcs1(data)
                    .or_else(|_| Rsa::public_key_from_der(data))
                    .map_err(|err| {
                        error!("DER RSA public key parse failed: {err}");
                        SecError::InvalidParameters("invalid DER RSA public key".into())
                    })?;
                self.reprocess_rsa_public(id, key_type, &rsa)
            }

            KeyContainer::PemRsa1024Public | KeyContainer::PemRsa2048Public => {
                let key_type = if container == KeyContainer::PemRsa1024Public {
                    KeyType::Rsa1024Public
                } else {
                    KeyType::Rsa2048Public
                };
                let rsa = Rsa::public_key_from_pem(data).map_err(|err| {
                    error!("PEM RSA public key parse failed: {err}");
                    SecError::InvalidParameters("invalid PEM RSA public key".into())
                })?;
                self.reprocess_rsa_public(id, key_type, &rsa)
            }

            KeyContainer::Derived => {
                if data.len() != 2 * AES_BLOCK_LEN {
                    return Err(SecError::InvalidParameters(
                        "derived container must hold exactly two ladder inputs".into(),
                    ));
                }
                self.wrap(container, InnerKind::Derived, KeyType::Aes128, data)
            }

            KeyContainer::Store => self.adopt_store(data),

            KeyContainer::Other(tag) => match &self.custom_container {
                Some(handler) => {
                    let (key_type, payload) = handler(tag, data, id)?;
                    self.process_key_container(id, KeyContainer::raw_for(key_type), &payload)
                }
                None => Err(SecError::UnimplementedFeature(
                    "unknown key container type",
                )),
            },
        }
    }

    fn reprocess_rsa_private(
        &self,
        id: ObjectId,
        key_type: KeyType,
        rsa: &Rsa<Private>,
    ) -> Result<KeyRecord> {
        if rsa.size() as usize != key_type.key_len() {
            return Err(SecError::InvalidParameters(
                "RSA modulus size does not match the container type".into(),
            ));
        }
        let raw = RsaRawPrivateKey::from_rsa(rsa)?;
        let encoded = Zeroizing::new(raw.to_bytes());
        self.process_key_container(id, KeyContainer::raw_for(key_type), &encoded)
    }

    fn reprocess_rsa_public(
        &self,
        id: ObjectId,
        key_type: KeyType,
        rsa: &Rsa<Public>,
    ) -> Result<KeyRecord> {
        if rsa.size() as usize != key_type.key_len() {
            return Err(SecError::InvalidParameters(
                "RSA modulus size does not match the container type".into(),
            ));
        }
        let raw = RsaRawPublicKey::from_rsa(rsa)?;
        self.process_key_container(id, KeyContainer::raw_for(key_type), &raw.to_bytes())
    }

    fn wrap(
        &self,
        container: KeyContainer,
        inner: InnerKind,
        key_type: KeyType,
        payload: &[u8],
    ) -> Result<KeyRecord> {
        let (store_key, mac_key) = self.store_keys()?;
        let envelope = store::seal(&store_key, &mac_key, container, inner, key_type, payload)?;
        Ok(KeyRecord {
            info: KeyInfo {
                key_type,
                container,
                inner,
            },
            envelope,
        })
    }

    /// Accept a pre-wrapped store blob after validating its self-described
    /// length and, when protected, its MAC.
    fn adopt_store(&self, data: &[u8]) -> Result<KeyRecord> {
        if store::store_len(data)? != data.len() {
            return Err(SecError::Failure(
                "store blob length does not match its self-described length".into(),
            ));
        }

        let header = if store::is_protected(data)? {
            let (store_key, mac_key) = self.store_keys()?;
            store::open(data, Some((&store_key, &mac_key)))?.0
        } else {
            store::open(data, None)?.0
        };

        Ok(KeyRecord {
            info: KeyInfo {
                key_type: header.key_type,
                // The header still names the container the blob was
                // originally sealed from.
                container: header.container,
                inner: header.inner,
            },
            envelope: data.to_vec(),
        })
    }

    /* -------------------------- Unwrapping -------------------------------- */

    /// The two clear store keys, expanded from their ladder-input records.
    pub(crate) fn store_keys(&self) -> Result<(Zeroizing<[u8; 16]>, Zeroizing<[u8; 16]>)> {
        Ok((
            self.store_key_clear(OBJECT_ID_STORE_AES_KEY)?,
            self.store_key_clear(OBJECT_ID_STORE_MAC_KEY)?,
        ))
    }

    fn store_key_clear(&self, id: ObjectId) -> Result<Zeroizing<[u8; 16]>> {
        let (record, _) = self.keys.retrieve(id)?;
        let (header, payload) = store::open(&record.envelope, None)?;
        if header.inner != InnerKind::Derived {
            return Err(SecError::Failure(
                "store key record does not hold ladder inputs".into(),
            ));
        }
        store::expand_derived(&self.root_key, &payload)
    }

    /// Unwrap a symmetric key into a zeroizing buffer.
    pub(crate) fn clear_symmetric_key(&self, record: &KeyRecord) -> Result<Zeroizing<Vec<u8>>> {
        if !record.info.key_type.is_symmetric() {
            return Err(SecError::InvalidParameters("not a symmetric key".into()));
        }

        let payload = self.open_envelope(&record.envelope)?.1;

        match record.info.inner {
            InnerKind::Derived => {
                if record.info.key_type.key_len() != AES_BLOCK_LEN {
                    return Err(SecError::Failure(
                        "derived keys are always one AES block long".into(),
                    ));
                }
                let expanded = store::expand_derived(&self.root_key, &payload)?;
                Ok(Zeroizing::new(expanded.to_vec()))
            }
            InnerKind::Raw => {
                if payload.len() != record.info.key_type.key_len() {
                    return Err(SecError::Failure(
                        "unwrapped key length does not match the key type".into(),
                    ));
                }
                Ok(payload)
            }
        }
    }

    /// Rebuild RSA key material from a wrapped record.
    pub(crate) fn rsa_material(&self, record: &KeyRecord) -> Result<RsaKeyMaterial> {
        if !record.info.key_type.is_rsa() {
            return Err(SecError::InvalidParameters("not an RSA key".into()));
        }

        let payload = self.open_envelope(&record.envelope)?.1;

        if record.info.key_type.is_rsa_private() {
            let raw = RsaRawPrivateKey::from_bytes(&payload, record.info.key_type)?;
            Ok(RsaKeyMaterial::Private(raw.to_rsa()?))
        } else {
            let raw = RsaRawPublicKey::from_bytes(&payload, record.info.key_type)?;
            Ok(RsaKeyMaterial::Public(raw.to_rsa()?))
        }
    }

    fn open_envelope(&self, envelope: &[u8]) -> Result<(store::StoreHeader, Zeroizing<Vec<u8>>)> {
        if store::is_protected(envelope)? {
            let (store_key, mac_key) = self.store_keys()?;
            store::open(envelope, Some((&store_key, &mac_key)))
        } else {
            store::open(envelope, None)
        }
    }
}

fn raw_symmetric_type(container: KeyContainer) -> KeyType {
    match container {
        KeyContainer::RawAes128 => KeyType::Aes128,
        KeyContainer::RawAes256 => KeyType::Aes256,
        KeyContainer::RawHmac128 => KeyType::Hmac128,
        KeyContainer::RawHmac160 => KeyType::Hmac160,
        KeyContainer::RawHmac256 => KeyType::Hmac256,
        _ => unreachable!("caller matched a raw symmetric container"),
    }
}
