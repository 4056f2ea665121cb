//! User-name parsing and canonicalization.
//!
//! A user name has the shape `local[+suffix]@domain`. The local part and
//! suffix draw from ASCII letters, digits, and the RFC 5321 atext
//! punctuation set; the domain is dot-separated lowercase labels. The
//! wildcard local part `*` is accepted structurally for administrative
//! bootstrap entries but is never creatable through the RPC surface.

use crate::constants::{
    MAX_DOMAIN_LABEL_BYTES, MAX_USER_NAME_BYTES, SNAPSHOT_SUFFIX, WILDCARD_LOCAL,
};
use crate::error::{Error, Kind, Result};
use crate::types::UserName;

/// Punctuation permitted in local parts and suffixes, besides letters and
/// digits. `+` is excluded: it is structural and introduces the suffix.
const LOCAL_PUNCTUATION: &str = "!#$%&'*-/=?^_`{|}~.";

/// The three components of a structurally valid user name. `suffix` is
/// empty when the name carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parsed<'a> {
    pub local: &'a str,
    pub suffix: &'a str,
    pub domain: &'a str,
}

fn bad(op: &'static str, name: &str, detail: &'static str) -> Error {
    Error::new(op, Kind::Invalid).with_user(name).with_cause(detail)
}

/// Split a user name into `(local, suffix, domain)` and validate each
/// component's characters. A single trailing dot on the domain is dropped.
pub fn parse(name: &str) -> Result<Parsed<'_>> {
    const OP: &str = "ParseUserName";

    if name.is_empty() {
        return Err(bad(OP, name, "empty user name"));
    }
    let at = name.find('@').ok_or_else(|| bad(OP, name, "missing @ sign"))?;
    if name[at + 1..].contains('@') {
        return Err(bad(OP, name, "multiple @ signs"));
    }
    let (localpart, mut domain) = (&name[..at], &name[at + 1..]);
    if localpart.is_empty() {
        return Err(bad(OP, name, "missing local part"));
    }
    if domain.is_empty() {
        return Err(bad(OP, name, "missing domain"));
    }
    if let Some(stripped) = domain.strip_suffix('.') {
        domain = stripped;
    }
    validate_domain(OP, name, domain)?;

    if localpart == WILDCARD_LOCAL {
        return Ok(Parsed {
            local: localpart,
            suffix: "",
            domain,
        });
    }

    let (local, suffix) = match localpart.find('+') {
        Some(plus) => {
            let (local, suffix) = (&localpart[..plus], &localpart[plus + 1..]);
            if suffix.is_empty() {
                return Err(bad(OP, name, "empty +suffix"));
            }
            if suffix.contains('+') {
                return Err(bad(OP, name, "multiple + signs"));
            }
            (local, suffix)
        }
        None => (localpart, ""),
    };
    if local.is_empty() {
        return Err(bad(OP, name, "missing local part"));
    }
    validate_local(OP, name, local)?;
    if !suffix.is_empty() {
        validate_suffix(OP, name, suffix)?;
    }

    Ok(Parsed {
        local,
        suffix,
        domain,
    })
}

fn is_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || LOCAL_PUNCTUATION.contains(c)
}

fn validate_local(op: &'static str, name: &str, local: &str) -> Result<()> {
    for c in local.chars() {
        if !is_local_char(c) {
            return Err(bad(op, name, "bad character in local part"));
        }
    }
    if !local.chars().any(|c| c.is_ascii_alphanumeric()) {
        return Err(bad(op, name, "local part is punctuation only"));
    }
    Ok(())
}

fn validate_suffix(op: &'static str, name: &str, suffix: &str) -> Result<()> {
    for c in suffix.chars() {
        if !is_local_char(c) {
            return Err(bad(op, name, "bad character in suffix"));
        }
    }
    Ok(())
}

fn validate_domain(op: &'static str, name: &str, domain: &str) -> Result<()> {
    let mut labels = 0;
    for label in domain.split('.') {
        if label.is_empty() {
            return Err(bad(op, name, "empty domain label"));
        }
        if label.len() > MAX_DOMAIN_LABEL_BYTES {
            return Err(bad(op, name, "domain label too long"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(bad(op, name, "domain label begins or ends with hyphen"));
        }
        for c in label.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_uppercase() && !c.is_ascii_digit() && c != '-'
            {
                return Err(bad(op, name, "bad character in domain"));
            }
        }
        labels += 1;
    }
    if labels < 2 {
        return Err(bad(op, name, "domain needs at least two labels"));
    }
    Ok(())
}

/// Canonicalize a user name: lowercase the local part, IDNA-map the domain
/// (which lowercases ASCII and encodes anything else), drop one trailing
/// dot, and enforce the total length cap. Idempotent.
pub fn canonicalize(name: &str) -> Result<UserName> {
    const OP: &str = "CanonicalizeUserName";

    let at = name.find('@').ok_or_else(|| bad(OP, name, "missing @ sign"))?;
    if name[at + 1..].contains('@') {
        return Err(bad(OP, name, "multiple @ signs"));
    }
    let (localpart, domain) = (&name[..at], &name[at + 1..]);
    if domain.is_empty() {
        return Err(bad(OP, name, "missing domain"));
    }

    let domain = idna::domain_to_ascii(domain)
        .map_err(|e| Error::new(OP, Kind::Invalid).with_user(name).with_cause(e.to_string()))?;
    let domain = domain.strip_suffix('.').unwrap_or(&domain);

    let localpart = if localpart == WILDCARD_LOCAL {
        localpart.to_string()
    } else {
        if !localpart.is_ascii() {
            return Err(bad(OP, name, "local part must be ASCII"));
        }
        localpart.to_ascii_lowercase()
    };

    let full = format!("{localpart}@{domain}");
    parse(&full).map_err(|e| Error::wrap(OP, e))?;
    if full.len() > MAX_USER_NAME_BYTES {
        return Err(bad(OP, name, "user name too long"));
    }
    Ok(UserName::from_canonical(full))
}

/// Whether the name's local part is the administrative wildcard.
pub fn is_wildcard(name: &UserName) -> bool {
    name.as_str()
        .split('@')
        .next()
        .is_some_and(|local| local == WILDCARD_LOCAL)
}

/// Drop the `+suffix`, if any, yielding the canonical base user.
pub fn without_suffix(name: &UserName) -> UserName {
    let s = name.as_str();
    match (s.find('+'), s.find('@')) {
        (Some(plus), Some(at)) if plus < at => {
            UserName::from_canonical(format!("{}{}", &s[..plus], &s[at..]))
        }
        _ => name.clone(),
    }
}

/// The `+snapshot` companion of a user's canonical base name.
pub fn snapshot_user(name: &UserName) -> Result<UserName> {
    let base = without_suffix(name);
    let parsed = parse(base.as_str())?;
    canonicalize(&format!(
        "{}+{}@{}",
        parsed.local, SNAPSHOT_SUFFIX, parsed.domain
    ))
}
