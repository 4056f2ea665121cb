use std::path::Path;

use keydir_core::{Error, Kind, Result};

use crate::storage::Storage;

/// Persistent blob store backed by sled (pure-Rust, no C dependencies).
///
/// One named tree:
///   blobs — utf8 reference bytes → raw blob bytes
pub struct DiskStorage {
    _db: sled::Db,
    blobs: sled::Tree,
}

fn io(e: sled::Error) -> Error {
    Error::new("DiskStorage", Kind::IO).with_cause(e.to_string())
}

impl DiskStorage {
    /// Open or create the blob database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path).map_err(io)?;
        let blobs = db.open_tree("blobs").map_err(io)?;
        Ok(Self { _db: db, blobs })
    }
}

impl Storage for DiskStorage {
    fn download(&self, reference: &str) -> Result<Vec<u8>> {
        match self.blobs.get(reference.as_bytes()).map_err(io)? {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(Error::new("Download", Kind::NotExist).with_cause(reference.to_string())),
        }
    }

    fn put(&self, reference: &str, data: &[u8]) -> Result<()> {
        self.blobs.insert(reference.as_bytes(), data).map_err(io)?;
        self.blobs.flush().map_err(io)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut refs = Vec::new();
        for item in self.blobs.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(io)?;
            refs.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(refs)
    }
}
