//! Two-tier object storage shared by keys, certificates, and bundles.
//!
//! Lookups hit the in-memory tier first, then the file tier under the
//! store's configured directory. Writes delete any previous record under
//! the same identifier from both tiers before inserting, so at most one
//! live record exists per identifier.

use crate::error::{Result, SecError};
use crate::types::{ObjectId, StorageLocation};
use log::{debug, error};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Codec for one record kind: how it maps onto its data file and the
/// optional info sidecar.
pub(crate) trait Record: Clone {
    const KIND: &'static str;
    const DATA_EXT: &'static str;
    const INFO_EXT: Option<&'static str>;

    fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>);
    fn decode(data: Vec<u8>, info: Option<Vec<u8>>) -> Result<Self>;
}

pub(crate) struct ObjectStore<R: Record> {
    dir: PathBuf,
    ram: HashMap<u64, R>,
}

impl<R: Record> ObjectStore<R> {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            ram: HashMap::new(),
        }
    }

    fn data_path(&self, id: ObjectId) -> PathBuf {
        self.dir.join(format!("{}.{}", id.file_stem(), R::DATA_EXT))
    }

    fn info_path(&self, id: ObjectId) -> Option<PathBuf> {
        R::INFO_EXT
            .map(|ext| self.dir.join(format!("{}.{}", id.file_stem(), ext)))
    }

    /// RAM first, then the file tier. Reserved hardware ranges resolve
    /// nowhere on this platform.
    pub fn retrieve(&self, id: ObjectId) -> Result<(R, StorageLocation)> {
        if let Some(record) = self.ram.get(&id.as_u64()) {
            return Ok((record.clone(), StorageLocation::Ram));
        }

        let data_path = self.data_path(id);
        let info_path = self.info_path(id);
        let info_present = info_path.as_ref().map(|p| p.exists()).unwrap_or(true);

        if data_path.exists() && info_present {
            let data = fs::read(&data_path)?;
            let info = match &info_path {
                Some(path) => Some(fs::read(path)?),
                None => None,
            };
            return Ok((R::decode(data, info)?, StorageLocation::File));
        }

        Err(SecError::NoSuchItem)
    }

    pub fn store(&mut self, id: ObjectId, location: StorageLocation, record: R) -> Result<()> {
        match location {
            StorageLocation::Ram | StorageLocation::RamSoftWrapped => {
                self.delete_existing(id);
                self.ram.insert(id.as_u64(), record);
                Ok(())
            }
            StorageLocation::File | StorageLocation::FileSoftWrapped => {
                self.delete_existing(id);
                self.write_files(id, &record)
            }
            StorageLocation::Oem => Err(SecError::UnimplementedFeature(
                "OEM-backed storage is not available on this platform",
            )),
        }
    }

    fn delete_existing(&mut self, id: ObjectId) {
        match self.delete(id) {
            Ok(()) | Err(SecError::NoSuchItem) => {}
            Err(err) => debug!("purge of existing {} {id} failed: {err}", R::KIND),
        }
    }

    fn write_files(&self, id: ObjectId, record: &R) -> Result<()> {
        let (data, info) = record.encode();
        let data_path = self.data_path(id);
        let info_path = self.info_path(id);

        let written = fs::write(&data_path, data).and_then(|_| match (&info_path, info) {
            (Some(path), Some(bytes)) => fs::write(path, bytes),
            _ => Ok(()),
        });

        if let Err(err) = written {
            error!("could not write {} {id} files: {err}", R::KIND);
            let _ = fs::remove_file(&data_path);
            if let Some(path) = info_path {
                let _ = fs::remove_file(path);
            }
            return Err(SecError::Failure(format!(
                "could not persist {} {id}",
                R::KIND
            )));
        }

        Ok(())
    }

    /// Remove the record from both tiers.
    ///
    /// `NoSuchItem` means neither tier matched; `ItemNonRemovable` means a
    /// match existed but is still present after removal.
    pub fn delete(&mut self, id: ObjectId) -> Result<()> {
        let mut found = 0usize;
        let mut deleted = 0usize;

        if self.ram.remove(&id.as_u64()).is_some() {
            found += 1;
            deleted += 1;
        }

        let data_path = self.data_path(id);
        if data_path.exists() {
            found += 1;
            let _ = fs::remove_file(&data_path);
            if !data_path.exists() {
                deleted += 1;
            }
        }

        if let Some(info_path) = self.info_path(id) {
            if !data_path.exists() && info_path.exists() {
                let _ = fs::remove_file(info_path);
            }
        }

        if found == 0 {
            return Err(SecError::NoSuchItem);
        }
        if found != deleted {
            return Err(SecError::ItemNonRemovable);
        }
        Ok(())
    }

    /// All identifiers with a live record, merged across both tiers.
    pub fn list(&self) -> Vec<ObjectId> {
        let mut ids: Vec<u64> = self.ram.keys().copied().collect();

        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Some(stem) = name.strip_suffix(&format!(".{}", R::DATA_EXT)) else {
                    continue;
                };
                if stem.len() == 16 {
                    if let Ok(id) = u64::from_str_radix(stem, 16) {
                        ids.push(id);
                    }
                }
            }
        }

        ids.sort_unstable();
        ids.dedup();
        ids.into_iter().map(ObjectId).collect()
    }

    /// Drop every RAM record, leaving the file tier untouched.
    pub fn clear_ram(&mut self) {
        self.ram.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct Blob(Vec<u8>);

    impl Record for Blob {
        const KIND: &'static str = "blob";
        const DATA_EXT: &'static str = "blob";
        const INFO_EXT: Option<&'static str> = Some("blobinfo");

        fn encode(&self) -> (Vec<u8>, Option<Vec<u8>>) {
            (self.0.clone(), Some(vec![self.0.len() as u8]))
        }

        fn decode(data: Vec<u8>, info: Option<Vec<u8>>) -> Result<Self> {
            match info.as_deref() {
                Some([len]) if *len as usize == data.len() => Ok(Blob(data)),
                _ => Err(SecError::Failure("blob info mismatch".into())),
            }
        }
    }

    fn scratch_store() -> (tempfile::TempDir, ObjectStore<Blob>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn ram_shadows_files_and_survives_lookup_order() {
        let (_dir, mut store) = scratch_store();
        let id = ObjectId(7);

        store
            .store(id, StorageLocation::File, Blob(vec![1, 2, 3]))
            .unwrap();
        let (record, location) = store.retrieve(id).unwrap();
        assert_eq!(record, Blob(vec![1, 2, 3]));
        assert_eq!(location, StorageLocation::File);

        store
            .store(id, StorageLocation::Ram, Blob(vec![9]))
            .unwrap();
        let (record, location) = store.retrieve(id).unwrap();
        assert_eq!(record, Blob(vec![9]));
        assert_eq!(location, StorageLocation::Ram);
    }

    #[test]
    fn store_purges_the_previous_record_everywhere() {
        let (dir, mut store) = scratch_store();
        let id = ObjectId(1);

        store
            .store(id, StorageLocation::File, Blob(vec![1]))
            .unwrap();
        store
            .store(id, StorageLocation::Ram, Blob(vec![2]))
            .unwrap();

        // The file tier copy is gone, so a delete of the RAM copy leaves
        // nothing behind.
        store.delete(id).unwrap();
        assert!(matches!(store.retrieve(id), Err(SecError::NoSuchItem)));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn second_delete_reports_no_such_item() {
        let (_dir, mut store) = scratch_store();
        let id = ObjectId(42);

        store
            .store(id, StorageLocation::File, Blob(vec![1]))
            .unwrap();
        store.delete(id).unwrap();
        assert!(matches!(store.delete(id), Err(SecError::NoSuchItem)));
    }

    #[test]
    fn soft_wrapped_aliases_behave_like_their_plain_locations() {
        let (_dir, mut store) = scratch_store();

        store
            .store(ObjectId(1), StorageLocation::RamSoftWrapped, Blob(vec![1]))
            .unwrap();
        assert_eq!(store.retrieve(ObjectId(1)).unwrap().1, StorageLocation::Ram);

        store
            .store(ObjectId(2), StorageLocation::FileSoftWrapped, Blob(vec![2]))
            .unwrap();
        assert_eq!(
            store.retrieve(ObjectId(2)).unwrap().1,
            StorageLocation::File
        );
    }

    #[test]
    fn oem_writes_are_unimplemented() {
        let (_dir, mut store) = scratch_store();
        assert!(matches!(
            store.store(ObjectId(3), StorageLocation::Oem, Blob(vec![3])),
            Err(SecError::UnimplementedFeature(_))
        ));
    }

    #[test]
    fn list_merges_both_tiers() {
        let (_dir, mut store) = scratch_store();
        store
            .store(ObjectId(5), StorageLocation::Ram, Blob(vec![5]))
            .unwrap();
        store
            .store(ObjectId(3), StorageLocation::File, Blob(vec![3]))
            .unwrap();

        assert_eq!(store.list(), vec![ObjectId(3), ObjectId(5)]);
    }
}
