//! Persistent records addressed by a `(file id, record key)` pair.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::trace;

use crate::u2f::error::Error;

/// Record holding the anti-replay counter
pub const COUNTER_FILE_ID: u16 = 0xEF11;
pub const COUNTER_RECORD_KEY: u16 = 0x7F11;

/// Record holding the randomly generated key wrapping secret
pub const WRAPPING_KEY_FILE_ID: u16 = 0xEF10;
pub const WRAPPING_KEY_RECORD_KEY: u16 = 0x7F10;

pub trait RecordStore {
    fn find(&self, file_id: u16, key_id: u16) -> Result<bool, Error>;

    fn read(&self, file_id: u16, key_id: u16) -> Result<Option<Vec<u8>>, Error>;

    /// Creates a record, failing if it already exists.
    fn write(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error>;

    /// Replaces the content of an existing record.
    fn update(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error>;
}

/// Volatile store. Clones share the same records, which lets a test drop a
/// device and build a new one over the same "flash".
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<HashMap<(u16, u16), Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(u16, u16), Vec<u8>>>, Error> {
        self.records.lock().map_err(|_| Error::Other("Record store lock poisoned".to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, file_id: u16, key_id: u16) -> Result<bool, Error> {
        Ok(self.records()?.contains_key(&(file_id, key_id)))
    }

    fn read(&self, file_id: u16, key_id: u16) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.records()?.get(&(file_id, key_id)).cloned())
    }

    fn write(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        let mut records = self.records()?;
        if records.contains_key(&(file_id, key_id)) {
            return Err(Error::Other(format!("Record {:04x}/{:04x} already exists", file_id, key_id)));
        }
        records.insert((file_id, key_id), data.to_vec());
        Ok(())
    }

    fn update(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        match self.records()?.get_mut(&(file_id, key_id)) {
            Some(record) => {
                *record = data.to_vec();
                Ok(())
            }
            None => Err(Error::Other(format!("Record {:04x}/{:04x} not found", file_id, key_id))),
        }
    }
}

/// One file per record inside a directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FileStore { root })
    }

    fn path(&self, file_id: u16, key_id: u16) -> PathBuf {
        self.root.join(format!("{:04x}_{:04x}.rec", file_id, key_id))
    }

    fn store(&self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        let path = self.path(file_id, key_id);
        let tmp = path.with_extension("tmp");

        // Data must be on disk before the rename publishes it
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, &path)?;
        self.sync_root()?;

        trace!("Stored {} bytes in {}", data.len(), path.display());
        Ok(())
    }

    /// Makes the directory entry of a renamed record durable.
    #[cfg(unix)]
    fn sync_root(&self) -> Result<(), Error> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_root(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn find(&self, file_id: u16, key_id: u16) -> Result<bool, Error> {
        Ok(self.path(file_id, key_id).is_file())
    }

    fn read(&self, file_id: u16, key_id: u16) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(self.path(file_id, key_id)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        if self.find(file_id, key_id)? {
            return Err(Error::Other(format!("Record {:04x}/{:04x} already exists", file_id, key_id)));
        }
        self.store(file_id, key_id, data)
    }

    fn update(&mut self, file_id: u16, key_id: u16, data: &[u8]) -> Result<(), Error> {
        if !self.find(file_id, key_id)? {
            return Err(Error::Other(format!("Record {:04x}/{:04x} not found", file_id, key_id)));
        }
        self.store(file_id, key_id, data)
    }
}
