//! Certificate pipeline: PEM/DER ingestion normalized to DER, sealed with
//! an HMAC under the boot-derived certificate-MAC key, and verified again
//! on every retrieval.

use crate::crypto::{self, RsaRawPublicKey};
use crate::error::{Result, SecError};
use crate::keys::KeyHandle;
use crate::processor::SecureProcessor;
use crate::storage::Record;
use crate::types::{
    CertificateContainer, DigestAlgorithm, ObjectId, StorageLocation, CERTIFICATE_MAX_LEN,
    OBJECT_ID_CERT_MAC_KEY, OBJECT_ID_INVALID,
};
use log::error;
use openssl::pkey::PKey;
use openssl::x509::X509;

/// A DER-normalized certificate and the MAC sealing it.
#[derive(Clone)]
pub(crate) struct CertificateRecord {
    pub der: Vec<u8>,
    pub mac: [u8; 32],
}

impl Record for CertificateRecord {
    const KIND: &'static str = "certificate";
    const DATA_EXT: &'static str = "cert";
    const INFO_EXT: Option<&'static str> = Some("certinfo");

    fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        (self.der.clone(), Some(self.mac.to_vec()))
    }

    fn decode(data: Vec<u8>, info: Option<Vec<u8>>) -> Result<Self> {
        let info = info.ok_or_else(|| {
            SecError::Failure("certificate info sidecar missing".into())
        })?;
        let mac: [u8; 32] = info.as_slice().try_into().map_err(|_| {
            SecError::Failure("certificate info sidecar has the wrong size".into())
        })?;
        Ok(Self { der: data, mac })
    }
}

/// Immutable snapshot of a certificate whose MAC checked out at lookup.
pub struct CertificateHandle {
    pub(crate) id: ObjectId,
    pub(crate) location: StorageLocation,
    pub(crate) record: CertificateRecord,
}

impl CertificateHandle {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn location(&self) -> StorageLocation {
        self.location
    }

    /// The DER-normalized certificate bytes.
    pub fn der(&self) -> &[u8] {
        &self.record.der
    }

    /// Copy the DER bytes into `buffer`, or report the required size when
    /// no buffer is supplied.
    pub fn export(&self, buffer: Option<&mut [u8]>) -> Result<usize> {
        let der = &self.record.der;
        match buffer {
            None => Ok(der.len()),
            Some(buffer) if buffer.len() < der.len() => Err(SecError::BufferTooSmall {
                needed: der.len(),
                have: buffer.len(),
            }),
            Some(buffer) => {
                buffer[..der.len()].copy_from_slice(der);
                Ok(der.len())
            }
        }
    }
}

impl SecureProcessor {
    /// Provision a certificate object from PEM or DER input.
    pub fn provision_certificate(
        &mut self,
        id: ObjectId,
        location: StorageLocation,
        container: CertificateContainer,
        data: &[u8],
    ) -> Result<()> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters(
                "cannot provision the invalid object id".into(),
            ));
        }

        let x509 = match container {
            CertificateContainer::X509Der => X509::from_der(data),
            CertificateContainer::X509Pem => X509::from_pem(data),
        }
        .map_err(|err| {
            error!("certificate parse failed: {err}");
            SecError::InvalidParameters("invalid X.509 certificate".into())
        })?;

        let der = x509.to_der()?;
        if der.len() > CERTIFICATE_MAX_LEN {
            return Err(SecError::InvalidParameters("certificate is too large".into()));
        }

        let mac = self.certificate_mac(&der)?;
        self.certs.store(id, location, CertificateRecord { der, mac })
    }

    /// Look up a certificate; the stored MAC is recomputed and compared
    /// before the certificate becomes observable.
    pub fn certificate(&self, id: ObjectId) -> Result<CertificateHandle> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters("invalid object id".into()));
        }

        let (record, location) = self.certs.retrieve(id)?;

        let expected = self.certificate_mac(&record.der)?;
        if !openssl::memcmp::eq(&expected, &record.mac) {
            error!("certificate {id} mac does not match the expected value");
            return Err(SecError::VerificationFailed);
        }

        Ok(CertificateHandle {
            id,
            location,
            record,
        })
    }

    pub fn delete_certificate(&mut self, id: ObjectId) -> Result<()> {
        self.certs.delete(id)
    }

    pub fn list_certificates(&self) -> Vec<ObjectId> {
        self.certs.list()
    }

    /// The embedded RSA public key in the raw public layout.
    pub fn extract_certificate_public_key(
        &self,
        cert: &CertificateHandle,
    ) -> Result<RsaRawPublicKey> {
        let x509 = X509::from_der(&cert.record.der)?;
        let rsa = x509.public_key()?.rsa().map_err(|_| {
            SecError::InvalidParameters("certificate does not hold an RSA key".into())
        })?;
        RsaRawPublicKey::from_rsa(&rsa)
    }

    /// Verify the certificate's X.509 signature with the public half of
    /// the given key.
    pub fn verify_certificate(&self, cert: &CertificateHandle, key: &KeyHandle) -> Result<()> {
        let public = self.extract_public_key(key)?;
        self.verify_certificate_with_public_key(cert, &public)
    }

    /// Verify the certificate's X.509 signature with a raw public key.
    pub fn verify_certificate_with_public_key(
        &self,
        cert: &CertificateHandle,
        public_key: &RsaRawPublicKey,
    ) -> Result<()> {
        let x509 = X509::from_der(&cert.record.der)?;
        let pkey = PKey::from_rsa(public_key.to_rsa()?)?;
        if !x509.verify(&pkey)? {
            return Err(SecError::VerificationFailed);
        }
        Ok(())
    }

    fn certificate_mac(&self, der: &[u8]) -> Result<[u8; 32]> {
        let (record, _) = self.keys.retrieve(OBJECT_ID_CERT_MAC_KEY)?;
        let key = self.clear_symmetric_key(&record)?;
        let mac = crypto::hmac(DigestAlgorithm::Sha256, &key, der)?;
        Ok(mac.as_slice().try_into().expect("HMAC-SHA-256 is 32 bytes"))
    }
}
