//! Tamper-evident audit log of record mutations.
//!
//! The log is a single append-only blob in the blob store under a fixed
//! reference. Each mutation contributes one record line followed by one
//! hash line:
//!
//!   <UTC RFC3339 nanosecond timestamp>: <kind> by "<actor>": <json(user)>\n
//!   SHA256:<hex>\n
//!
//! The hash covers the record line and, for every record after the first,
//! the previous record's hex-encoded hash, chaining the whole log so any
//! edit invalidates every later link.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use keydir_core::{Error, Kind, Result, UserName, UserRecord, AUDIT_LOG_REF};
use keydir_store::Storage;
use sha2::{Digest, Sha256};

const HASH_PREFIX: &str = "SHA256:";

/// What a log record describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EventKind {
    PutAttempt,
    PutSuccess,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::PutAttempt => write!(f, "put attempt"),
            EventKind::PutSuccess => write!(f, "put success"),
        }
    }
}

struct LogData {
    bytes: Vec<u8>,
    last_hash: Option<String>,
}

/// The audit log. All mutations hold a single mutex across the
/// read-modify-write of the backing blob so chaining is never interleaved;
/// the in-memory copy is lazily populated on first use and rewound if an
/// upload fails.
pub struct AuditLog {
    storage: Arc<dyn Storage>,
    state: Mutex<Option<LogData>>,
}

fn lock(m: &Mutex<Option<LogData>>) -> MutexGuard<'_, Option<LogData>> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl AuditLog {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            state: Mutex::new(None),
        }
    }

    /// Append one record and persist the whole log.
    pub fn append(&self, kind: EventKind, actor: &UserName, record: &UserRecord) -> Result<()> {
        const OP: &str = "AuditLog.Append";

        let json = serde_json::to_string(record)
            .map_err(|e| Error::new(OP, Kind::Internal).with_cause(e.to_string()))?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        let line = format!("{timestamp}: {kind} by \"{actor}\": {json}\n");

        let mut guard = lock(&self.state);
        let data = self.load(OP, &mut guard)?;

        let mut hasher = Sha256::new();
        hasher.update(line.as_bytes());
        if let Some(prev) = &data.last_hash {
            hasher.update(prev.as_bytes());
        }
        let digest = hex::encode(hasher.finalize());

        let rewind_len = data.bytes.len();
        let rewind_hash = data.last_hash.clone();
        data.bytes.extend_from_slice(line.as_bytes());
        data.bytes.extend_from_slice(HASH_PREFIX.as_bytes());
        data.bytes.extend_from_slice(digest.as_bytes());
        data.bytes.push(b'\n');

        if let Err(e) = self.storage.put(AUDIT_LOG_REF, &data.bytes) {
            data.bytes.truncate(rewind_len);
            data.last_hash = rewind_hash;
            return Err(Error::wrap(OP, e));
        }
        data.last_hash = Some(digest);
        Ok(())
    }

    /// A copy of the entire log.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        const OP: &str = "AuditLog.ReadAll";
        let mut guard = lock(&self.state);
        let data = self.load(OP, &mut guard)?;
        Ok(data.bytes.clone())
    }

    /// Populate the in-memory copy from storage if this is the first use.
    fn load<'a>(
        &self,
        op: &'static str,
        guard: &'a mut MutexGuard<'_, Option<LogData>>,
    ) -> Result<&'a mut LogData> {
        if guard.is_none() {
            let bytes = match self.storage.download(AUDIT_LOG_REF) {
                Ok(bytes) => bytes,
                Err(e) if e.is(Kind::NotExist) => Vec::new(),
                Err(e) => return Err(Error::wrap(op, e)),
            };
            let last_hash = last_hash(op, &bytes)?;
            **guard = Some(LogData { bytes, last_hash });
        }
        match guard.as_mut() {
            Some(data) => Ok(data),
            None => Err(Error::new(op, Kind::Internal).with_cause("log state vanished")),
        }
    }
}

/// Extract the hex digest from the final line of a non-empty log.
/// A non-empty log that does not end in a hash line is corrupt.
fn last_hash(op: &'static str, bytes: &[u8]) -> Result<Option<String>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Error::new(op, Kind::Internal).with_cause("audit log is not UTF-8"))?;
    let trimmed = text
        .strip_suffix('\n')
        .ok_or_else(|| Error::new(op, Kind::Internal).with_cause("audit log is corrupted"))?;
    let line = match trimmed.rfind('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    };
    let digest = line
        .strip_prefix(HASH_PREFIX)
        .ok_or_else(|| Error::new(op, Kind::Internal).with_cause("audit log is corrupted"))?;
    Ok(Some(digest.to_string()))
}

/// Recompute every hash in `data` from scratch. Returns the number of
/// records verified; fails on the first broken link.
pub fn verify_chain(data: &[u8]) -> Result<usize> {
    const OP: &str = "AuditLog.Verify";

    let text = std::str::from_utf8(data)
        .map_err(|_| Error::new(OP, Kind::Internal).with_cause("audit log is not UTF-8"))?;
    let mut prev: Option<&str> = None;
    let mut records = 0;
    let mut lines = text.split_inclusive('\n');
    while let Some(record) = lines.next() {
        let hash_line = lines.next().ok_or_else(|| {
            Error::new(OP, Kind::Internal).with_cause("record without a hash line")
        })?;
        let stored = hash_line
            .strip_prefix(HASH_PREFIX)
            .and_then(|rest| rest.strip_suffix('\n'))
            .ok_or_else(|| Error::new(OP, Kind::Internal).with_cause("malformed hash line"))?;

        let mut hasher = Sha256::new();
        hasher.update(record.as_bytes());
        if let Some(prev) = prev {
            hasher.update(prev.as_bytes());
        }
        if hex::encode(hasher.finalize()) != stored {
            return Err(Error::new(OP, Kind::Internal)
                .with_cause(format!("hash mismatch at record {records}")));
        }
        prev = Some(stored);
        records += 1;
    }
    Ok(records)
}
