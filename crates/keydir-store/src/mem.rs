use std::collections::HashMap;
use std::sync::RwLock;

use keydir_core::{Error, Kind, Result};

use crate::storage::Storage;

/// Volatile blob store for tests and the `backend=inmemory` option.
#[derive(Default)]
pub struct MemStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn download(&self, reference: &str) -> Result<Vec<u8>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| Error::new("Download", Kind::Internal).with_cause("poisoned lock"))?;
        match blobs.get(reference) {
            Some(bytes) => Ok(bytes.clone()),
            None => Err(Error::new("Download", Kind::NotExist).with_cause(reference.to_string())),
        }
    }

    fn put(&self, reference: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|_| Error::new("Put", Kind::Internal).with_cause("poisoned lock"))?;
        blobs.insert(reference.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|_| Error::new("List", Kind::Internal).with_cause("poisoned lock"))?;
        Ok(blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
