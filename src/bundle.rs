//! Opaque bundle objects: uninterpreted byte blobs under the same
//! identifier namespace and storage rules as keys and certificates.

use crate::error::{Result, SecError};
use crate::processor::SecureProcessor;
use crate::storage::Record;
use crate::types::{ObjectId, StorageLocation, BUNDLE_MAX_LEN, OBJECT_ID_INVALID};

#[derive(Clone)]
pub(crate) struct BundleRecord {
    pub data: Vec<u8>,
}

impl Record for BundleRecord {
    const KIND: &'static str = "bundle";
    const DATA_EXT: &'static str = "bundle";
    const INFO_EXT: Option<&'static str> = None;

    fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        (self.data.clone(), None)
    }

    fn decode(data: Vec<u8>, _info: Option<Vec<u8>>) -> Result<Self> {
        Ok(Self { data })
    }
}

/// Immutable snapshot of a bundle at lookup time.
pub struct BundleHandle {
    pub(crate) id: ObjectId,
    pub(crate) location: StorageLocation,
    pub(crate) record: BundleRecord,
}

impl BundleHandle {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn location(&self) -> StorageLocation {
        self.location
    }

    pub fn data(&self) -> &[u8] {
        &self.record.data
    }

    /// Copy the bundle bytes into `buffer`, or report the required size
    /// when no buffer is supplied.
    pub fn export(&self, buffer: Option<&mut [u8]>) -> Result<usize> {
        let data = &self.record.data;
        match buffer {
            None => Ok(data.len()),
            Some(buffer) if buffer.len() < data.len() => Err(SecError::BufferTooSmall {
                needed: data.len(),
                have: buffer.len(),
            }),
            Some(buffer) => {
                buffer[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
        }
    }
}

impl SecureProcessor {
    pub fn provision_bundle(
        &mut self,
        id: ObjectId,
        location: StorageLocation,
        data: &[u8],
    ) -> Result<()> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters(
                "cannot provision the invalid object id".into(),
            ));
        }
        if data.len() > BUNDLE_MAX_LEN {
            return Err(SecError::InvalidInputSize(format!(
                "bundle of {} bytes exceeds the {BUNDLE_MAX_LEN} byte limit",
                data.len()
            )));
        }

        self.bundles.store(
            id,
            location,
            BundleRecord {
                data: data.to_vec(),
            },
        )
    }

    pub fn bundle(&self, id: ObjectId) -> Result<BundleHandle> {
        if id == OBJECT_ID_INVALID {
            return Err(SecError::InvalidParameters("invalid object id".into()));
        }
        let (record, location) = self.bundles.retrieve(id)?;
        Ok(BundleHandle {
            id,
            location,
            record,
        })
    }

    pub fn delete_bundle(&mut self, id: ObjectId) -> Result<()> {
        self.bundles.delete(id)
    }

    pub fn list_bundles(&self) -> Vec<ObjectId> {
        self.bundles.list()
    }
}
