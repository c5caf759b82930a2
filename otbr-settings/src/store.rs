//! Flash record manager
//!
//! Records are opaque byte strings addressed by a 16-bit id.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, SettingsError};

pub trait RecordStore: Send + Sync {
    /// Stored length of record `id`, or `None` if it does not exist
    fn data_len(&self, id: u16) -> Option<usize>;

    /// Copy record `id` into `buf`; returns its length
    fn read(&self, id: u16, buf: &mut [u8]) -> Result<usize>;

    fn save(&self, id: u16, data: &[u8]) -> Result<()>;

    /// Remove record `id`; removing a missing record is not an error
    fn delete(&self, id: u16) -> Result<()>;
}

fn copy_record(id: u16, record: &[u8], buf: &mut [u8]) -> Result<usize> {
    let Some(dst) = buf.get_mut(..record.len()) else {
        return Err(SettingsError::Oversized {
            id,
            len: record.len(),
            capacity: buf.len(),
        });
    };
    dst.copy_from_slice(record);
    Ok(record.len())
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<u16, Vec<u8>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u16) -> Option<Vec<u8>> {
        self.records.lock().get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.records.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl RecordStore for MemoryRecordStore {
    fn data_len(&self, id: u16) -> Option<usize> {
        self.records.lock().get(&id).map(Vec::len)
    }

    fn read(&self, id: u16, buf: &mut [u8]) -> Result<usize> {
        let records = self.records.lock();
        let record = records.get(&id).ok_or(SettingsError::MissingRecord(id))?;
        copy_record(id, record, buf)
    }

    fn save(&self, id: u16, data: &[u8]) -> Result<()> {
        self.records.lock().insert(id, data.to_vec());
        Ok(())
    }

    fn delete(&self, id: u16) -> Result<()> {
        self.records.lock().remove(&id);
        Ok(())
    }
}

/// One file per record in a directory, named `{id:04x}.rec`
pub struct FileRecordStore {
    dir: PathBuf,
}

impl FileRecordStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened record store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: u16) -> PathBuf {
        self.dir.join(format!("{id:04x}.rec"))
    }
}

impl RecordStore for FileRecordStore {
    fn data_len(&self, id: u16) -> Option<usize> {
        fs::metadata(self.path(id)).ok().map(|m| m.len() as usize)
    }

    fn read(&self, id: u16, buf: &mut [u8]) -> Result<usize> {
        let record = fs::read(self.path(id))?;
        copy_record(id, &record, buf)
    }

    fn save(&self, id: u16, data: &[u8]) -> Result<()> {
        let path = self.path(id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        debug!(id, len = data.len(), "Saved record");
        Ok(())
    }

    fn delete(&self, id: u16) -> Result<()> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn RecordStore) {
        assert_eq!(store.data_len(0x10), None);

        store.save(0x10, b"hello").unwrap();
        assert_eq!(store.data_len(0x10), Some(5));

        let mut buf = [0u8; 8];
        assert_eq!(store.read(0x10, &mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");

        let mut small = [0u8; 2];
        assert!(matches!(
            store.read(0x10, &mut small),
            Err(SettingsError::Oversized { id: 0x10, len: 5, capacity: 2 })
        ));

        store.save(0x10, b"hi").unwrap();
        assert_eq!(store.data_len(0x10), Some(2));

        store.delete(0x10).unwrap();
        store.delete(0x10).unwrap();
        assert_eq!(store.data_len(0x10), None);
        assert!(store.read(0x10, &mut buf).is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryRecordStore::new();
        exercise(&store);
        store.save(2, b"b").unwrap();
        store.save(1, b"a").unwrap();
        assert_eq!(store.ids(), vec![1, 2]);
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRecordStore::open(dir.path().join("pdm")).unwrap();
        exercise(&store);

        store.save(0xabc, b"x").unwrap();
        assert!(store.dir().join("0abc.rec").exists());
        assert!(!store.dir().join("0abc.tmp").exists());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileRecordStore::open(dir.path()).unwrap().save(7, b"persist").unwrap();

        let store = FileRecordStore::open(dir.path()).unwrap();
        let mut buf = [0u8; 16];
        let n = store.read(7, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"persist");
    }
}
