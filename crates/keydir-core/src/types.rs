use serde::{Deserialize, Serialize};
use std::fmt;

// ── UserName ─────────────────────────────────────────────────────────────────

/// A canonicalized `local[+suffix]@domain` user name.
///
/// Values are only constructed by [`crate::name::canonicalize`], so the inner
/// string is always in canonical form: lowercased local part, IDNA-mapped
/// lowercase domain, no trailing dot.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserName(String);

impl UserName {
    /// Wrap an already-canonical string. Crate-internal: callers go through
    /// `name::canonicalize`.
    pub(crate) fn from_canonical(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for UserName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserName({})", self.0)
    }
}

// ── Endpoints ────────────────────────────────────────────────────────────────

/// How a directory or store endpoint is reached.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// No service configured.
    Unassigned,
    /// A network service at `NetAddr`.
    Remote,
    /// A service linked into the client process.
    InProcess,
}

/// A `(transport, netaddr)` pair pointing at a directory or store service.
/// Lists of endpoints are ordered: the first entry is preferred, later
/// entries are fallbacks.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Endpoint {
    pub transport: Transport,
    pub net_addr: String,
}

impl Endpoint {
    pub fn remote(addr: impl Into<String>) -> Self {
        Self {
            transport: Transport::Remote,
            net_addr: addr.into(),
        }
    }
}

// ── PublicKey ────────────────────────────────────────────────────────────────

/// Published key text: curve name, decimal X, decimal Y, one per line, with
/// a trailing newline. Parsed and validated by `keydir-crypto`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}b)", self.0.len())
    }
}

// ── Records ──────────────────────────────────────────────────────────────────

/// The client-visible record for a user: public key plus endpoint lists.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
    pub name: UserName,
    #[serde(default)]
    pub dirs: Vec<Endpoint>,
    #[serde(default)]
    pub stores: Vec<Endpoint>,
    pub public_key: PublicKey,
}

/// The persisted form of a record. `IsAdmin` is server-only state and is
/// stripped before a record crosses the RPC boundary.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct StoredEntry {
    #[serde(rename = "User")]
    pub user: UserRecord,
    #[serde(rename = "IsAdmin", default)]
    pub is_admin: bool,
}
