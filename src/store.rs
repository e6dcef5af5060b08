//! The key-store envelope wrapped around every persisted key payload.
//!
//! Layout:
//!
//! ```text
//! magic(8) || header(16) || iv(16) || ciphertext || mac(32)
//! ```
//!
//! The header records the container type, the inner payload kind (raw or
//! derived), the key type, the payload length, and the total blob length.
//! The payload is AES-128-CBC encrypted with PKCS#7 padding under the store
//! AES key and the whole prefix is authenticated with HMAC-SHA-256 under
//! the store MAC key. The two store keys themselves are persisted through
//! the same layout with the protection flags cleared; their payloads are
//! ladder inputs, not clear keys, so nothing secret is written in the open.

use crate::crypto;
use crate::error::{Result, SecError};
use crate::types::{DigestAlgorithm, InnerKind, KeyContainer, KeyType, AES_BLOCK_LEN};
use openssl::symm::Cipher;
use zeroize::Zeroizing;

pub(crate) const STORE_MAGIC: &[u8; 8] = b"SECSTORE";
pub(crate) const STORE_HEADER_LEN: usize = 16;
pub(crate) const STORE_IV_LEN: usize = 16;
pub(crate) const STORE_MAC_LEN: usize = 32;

const FLAG_ENCRYPTED: u8 = 0x01;
const FLAG_MACED: u8 = 0x02;

const PAYLOAD_OFFSET: usize = STORE_MAGIC.len() + STORE_HEADER_LEN + STORE_IV_LEN;

#[derive(Clone, Copy, Debug)]
pub(crate) struct StoreHeader {
    pub container: KeyContainer,
    pub inner: InnerKind,
    pub key_type: KeyType,
    pub protected: bool,
    pub payload_len: usize,
    pub total_len: usize,
}

impl StoreHeader {
    fn encode(&self) -> [u8; STORE_HEADER_LEN] {
        let mut out = [0u8; STORE_HEADER_LEN];
        out[0..4].copy_from_slice(&self.container.tag().to_le_bytes());
        out[4] = self.inner.tag() as u8;
        out[5] = self.key_type.tag() as u8;
        out[6] = if self.protected {
            FLAG_ENCRYPTED | FLAG_MACED
        } else {
            0
        };
        out[8..12].copy_from_slice(&(self.payload_len as u32).to_le_bytes());
        out[12..16].copy_from_slice(&(self.total_len as u32).to_le_bytes());
        out
    }

    fn parse(blob: &[u8]) -> Result<Self> {
        if blob.len() < PAYLOAD_OFFSET {
            return Err(SecError::Failure("key store blob is truncated".into()));
        }
        if &blob[..STORE_MAGIC.len()] != STORE_MAGIC {
            return Err(SecError::Failure("key store magic mismatch".into()));
        }

        let header = &blob[STORE_MAGIC.len()..STORE_MAGIC.len() + STORE_HEADER_LEN];
        let container =
            KeyContainer::from_tag(u32::from_le_bytes(header[0..4].try_into().unwrap()));
        let inner = InnerKind::from_tag(header[4] as u32)?;
        let key_type = KeyType::from_tag(header[5] as u32)?;
        let flags = header[6];

        // Partial protection is never written; reject it rather than guess.
        let protected = match flags {
            0 => false,
            f if f == FLAG_ENCRYPTED | FLAG_MACED => true,
            _ => {
                return Err(SecError::Failure(
                    "key store protection flags are inconsistent".into(),
                ))
            }
        };

        Ok(Self {
            container,
            inner,
            key_type,
            protected,
            payload_len: u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize,
            total_len: u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize,
        })
    }
}

/// Total length the blob declares for itself.
pub(crate) fn store_len(blob: &[u8]) -> Result<usize> {
    Ok(StoreHeader::parse(blob)?.total_len)
}

fn ciphertext_len(payload_len: usize, protected: bool) -> usize {
    if protected {
        (payload_len / AES_BLOCK_LEN + 1) * AES_BLOCK_LEN
    } else {
        payload_len
    }
}

fn total_len(payload_len: usize, protected: bool) -> usize {
    PAYLOAD_OFFSET
        + ciphertext_len(payload_len, protected)
        + if protected { STORE_MAC_LEN } else { 0 }
}

/// Seal a payload into an envelope under the two store keys.
pub(crate) fn seal(
    store_key: &[u8; 16],
    mac_key: &[u8; 16],
    container: KeyContainer,
    inner: InnerKind,
    key_type: KeyType,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let header = StoreHeader {
        container,
        inner,
        key_type,
        protected: true,
        payload_len: payload.len(),
        total_len: total_len(payload.len(), true),
    };

    let mut iv = [0u8; STORE_IV_LEN];
    crypto::random_bytes(&mut iv)?;

    let mut blob = Vec::with_capacity(header.total_len);
    blob.extend_from_slice(STORE_MAGIC);
    blob.extend_from_slice(&header.encode());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&openssl::symm::encrypt(
        Cipher::aes_128_cbc(),
        store_key,
        Some(&iv),
        payload,
    )?);

    let mac = crypto::hmac(DigestAlgorithm::Sha256, mac_key, &blob)?;
    blob.extend_from_slice(&mac);
    debug_assert_eq!(blob.len(), header.total_len);

    Ok(blob)
}

/// Seal a payload without encryption or authentication. Only the two
/// boot-time store keys go through this path; their payloads are ladder
/// inputs that protect themselves.
pub(crate) fn seal_unprotected(
    container: KeyContainer,
    inner: InnerKind,
    key_type: KeyType,
    payload: &[u8],
) -> Vec<u8> {
    let header = StoreHeader {
        container,
        inner,
        key_type,
        protected: false,
        payload_len: payload.len(),
        total_len: total_len(payload.len(), false),
    };

    let mut blob = Vec::with_capacity(header.total_len);
    blob.extend_from_slice(STORE_MAGIC);
    blob.extend_from_slice(&header.encode());
    blob.extend_from_slice(&[0u8; STORE_IV_LEN]);
    blob.extend_from_slice(payload);
    blob
}

/// Whether opening this blob requires the store keys.
pub(crate) fn is_protected(blob: &[u8]) -> Result<bool> {
    Ok(StoreHeader::parse(blob)?.protected)
}

/// Validate and open an envelope, returning its header and payload.
///
/// The MAC is checked in constant time before anything is decrypted; any
/// mismatch between declared and actual lengths is a verification failure.
pub(crate) fn open(
    blob: &[u8],
    keys: Option<(&[u8; 16], &[u8; 16])>,
) -> Result<(StoreHeader, Zeroizing<Vec<u8>>)> {
    let header = StoreHeader::parse(blob)?;

    if header.total_len != blob.len()
        || header.total_len != total_len(header.payload_len, header.protected)
    {
        return Err(SecError::VerificationFailed);
    }

    if !header.protected {
        let payload = &blob[PAYLOAD_OFFSET..];
        return Ok((header, Zeroizing::new(payload.to_vec())));
    }

    let (store_key, mac_key) = keys.ok_or_else(|| {
        SecError::Failure("protected key store blob needs the store keys".into())
    })?;

    let mac_offset = blob.len() - STORE_MAC_LEN;
    let expected = crypto::hmac(DigestAlgorithm::Sha256, mac_key, &blob[..mac_offset])?;
    if !openssl::memcmp::eq(&expected, &blob[mac_offset..]) {
        return Err(SecError::VerificationFailed);
    }

    let iv = &blob[PAYLOAD_OFFSET - STORE_IV_LEN..PAYLOAD_OFFSET];
    let ciphertext = &blob[PAYLOAD_OFFSET..mac_offset];

    let payload = Zeroizing::new(
        openssl::symm::decrypt(Cipher::aes_128_cbc(), store_key, Some(iv), ciphertext)
            .map_err(|_| SecError::VerificationFailed)?,
    );

    if payload.len() != header.payload_len {
        return Err(SecError::VerificationFailed);
    }

    Ok((header, payload))
}

/// Expand a derived container's two ladder inputs into the effective
/// AES-128 key: two chained AES-ECB encryptions starting from the device
/// root key. On a secure chip this walk happens in hardware and the result
/// never reaches the host.
pub(crate) fn expand_derived(root_key: &[u8; 16], payload: &[u8]) -> Result<Zeroizing<[u8; 16]>> {
    if payload.len() != 2 * AES_BLOCK_LEN {
        return Err(SecError::Failure(
            "derived container payload has the wrong length".into(),
        ));
    }

    let input1: [u8; 16] = payload[..16].try_into().unwrap();
    let input2: [u8; 16] = payload[16..].try_into().unwrap();

    let step = Zeroizing::new(crypto::aes_ecb_encrypt_block(root_key, &input1)?);
    Ok(Zeroizing::new(crypto::aes_ecb_encrypt_block(
        step.as_ref(),
        &input2,
    )?))
}

/// Deterministic ladder inputs for one of the boot-time store keys.
pub(crate) fn store_key_ladder_inputs(label: &str, device_id: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, chunk) in out.chunks_mut(16).enumerate() {
        let mut seed = Vec::with_capacity(label.len() + 4 + device_id.len());
        seed.extend_from_slice(label.as_bytes());
        seed.extend_from_slice(&(i as u32 + 1).to_be_bytes());
        seed.extend_from_slice(device_id);
        let digest = crypto::digest(DigestAlgorithm::Sha256, &seed)
            .expect("SHA-256 over a short buffer cannot fail");
        chunk.copy_from_slice(&digest[..16]);
    }
    out
}
