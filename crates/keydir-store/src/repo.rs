//! Read-through / write-through persistence of user records.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use keydir_core::{Error, Kind, Result, StoredEntry, UserName};
use keydir_crypto::parse_public_key;
use lru::LruCache;

use crate::storage::Storage;

/// Entries held by each of the two lookup caches.
const CACHE_ENTRIES: usize = 10_000;

/// Cached repository of user records, keyed by canonicalized user name.
///
/// The positive cache holds records known to exist; the negative cache
/// records names known to be absent, so repeated lookups of unknown users
/// do not hit the backend. The blob store remains the authoritative source:
/// on any write failure both caches are invalidated for that name.
pub struct UserStore {
    storage: Arc<dyn Storage>,
    positive: Mutex<LruCache<UserName, StoredEntry>>,
    negative: Mutex<LruCache<UserName, ()>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl UserStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let entries = NonZeroUsize::new(CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            storage,
            positive: Mutex::new(LruCache::new(entries)),
            negative: Mutex::new(LruCache::new(entries)),
        }
    }

    /// Fetch the stored entry for `name`, consulting the caches first.
    pub fn lookup(&self, name: &UserName) -> Result<StoredEntry> {
        const OP: &str = "UserStore.Lookup";

        if let Some(entry) = lock(&self.positive).get(name) {
            return Ok(entry.clone());
        }
        if lock(&self.negative).get(name).is_some() {
            return Err(Error::new(OP, Kind::NotExist).with_user(name.as_str()));
        }

        let bytes = match self.storage.download(name.as_str()) {
            Ok(bytes) => bytes,
            Err(e) if e.is(Kind::NotExist) => {
                lock(&self.negative).put(name.clone(), ());
                return Err(Error::new(OP, Kind::NotExist).with_user(name.as_str()));
            }
            Err(e) => return Err(Error::wrap(OP, e)),
        };

        let entry: StoredEntry = serde_json::from_slice(&bytes).map_err(|e| {
            Error::new(OP, Kind::Internal)
                .with_user(name.as_str())
                .with_cause(e.to_string())
        })?;
        validate(OP, name, &entry)?;

        lock(&self.positive).put(name.clone(), entry.clone());
        Ok(entry)
    }

    /// Persist `entry` under its canonical name and refresh the caches.
    pub fn put(&self, entry: &StoredEntry) -> Result<()> {
        const OP: &str = "UserStore.Put";
        let name = &entry.user.name;

        let bytes = serde_json::to_vec(entry).map_err(|e| {
            Error::new(OP, Kind::Internal)
                .with_user(name.as_str())
                .with_cause(e.to_string())
        })?;

        match self.storage.put(name.as_str(), &bytes) {
            Ok(()) => {
                lock(&self.negative).pop(name);
                lock(&self.positive).put(name.clone(), entry.clone());
                Ok(())
            }
            Err(e) => {
                // The remote state is uncertain; drop any cached view.
                lock(&self.positive).pop(name);
                lock(&self.negative).pop(name);
                Err(Error::wrap(OP, e))
            }
        }
    }
}

/// A record fetched from storage must belong under the key it was stored
/// at, and its key text must parse.
fn validate(op: &'static str, name: &UserName, entry: &StoredEntry) -> Result<()> {
    if entry.user.name != *name {
        return Err(Error::new(op, Kind::Internal)
            .with_user(name.as_str())
            .with_cause("stored record does not match its storage key"));
    }
    parse_public_key(&entry.user.public_key).map_err(|e| {
        Error::new(op, Kind::Internal)
            .with_user(name.as_str())
            .with_cause(e)
    })?;
    Ok(())
}
