/// Upper bound on a canonicalized user name, in bytes.
pub const MAX_USER_NAME_BYTES: usize = 254;

/// Longest permitted domain label, in bytes.
pub const MAX_DOMAIN_LABEL_BYTES: usize = 63;

/// Wildcard local part, reserved for administrative bootstrap entries.
/// Never creatable through the RPC surface.
pub const WILDCARD_LOCAL: &str = "*";

/// Suffix of the companion archival user created alongside each signup.
pub const SNAPSHOT_SUFFIX: &str = "snapshot";

/// Storage reference holding the audit log blob.
pub const AUDIT_LOG_REF: &str = "keyserver/log";
