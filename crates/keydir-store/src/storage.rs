use std::path::Path;
use std::sync::Arc;

use keydir_core::{Error, Kind, Result};

use crate::disk::DiskStorage;
use crate::mem::MemStorage;

/// Opaque bytes by reference. The backing service is a plain key/value
/// store; implementations must report a missing object as `NotExist` and
/// every other backend failure as `IO`.
pub trait Storage: Send + Sync {
    /// Fetch the bytes stored under `reference`.
    fn download(&self, reference: &str) -> Result<Vec<u8>>;

    /// Store `data` under `reference`, overwriting any previous value.
    fn put(&self, reference: &str, data: &[u8]) -> Result<()>;

    /// References starting with `prefix`, in unspecified order.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Open the backend selected by the `backend=` configuration option.
pub fn open_backend(name: &str, path: &Path) -> Result<Arc<dyn Storage>> {
    const OP: &str = "OpenBackend";
    match name {
        "disk" => Ok(Arc::new(DiskStorage::open(path)?)),
        "inmemory" => Ok(Arc::new(MemStorage::new())),
        other => Err(Error::new(OP, Kind::Invalid)
            .with_cause(format!("unknown storage backend {other:?}"))),
    }
}
