use std::fmt;

use keydir_core::{Error, Kind, PublicKey, Result};
use num_bigint::BigUint;

// ── Curve ────────────────────────────────────────────────────────────────────

/// The named curves a published key may use.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    pub fn from_name(name: &str) -> Option<Curve> {
        match name {
            "p256" => Some(Curve::P256),
            "p384" => Some(Curve::P384),
            "p521" => Some(Curve::P521),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Curve::P256 => "p256",
            Curve::P384 => "p384",
            Curve::P521 => "p521",
        }
    }

    /// Byte length of a field element (and of each half of a signature).
    pub fn field_bytes(&self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ── Key parsing ──────────────────────────────────────────────────────────────

/// A parsed public key: the curve and the affine point coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyData {
    pub curve: Curve,
    pub x: BigUint,
    pub y: BigUint,
}

impl KeyData {
    /// SEC1 uncompressed encoding: `04 || X || Y`, both coordinates padded
    /// to the curve's field width.
    pub fn sec1_bytes(&self) -> Result<Vec<u8>> {
        const OP: &str = "ParsePublicKey";
        let width = self.curve.field_bytes();
        let x = pad_be(&self.x, width)
            .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("X coordinate out of range"))?;
        let y = pad_be(&self.y, width)
            .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("Y coordinate out of range"))?;
        let mut out = Vec::with_capacity(1 + 2 * width);
        out.push(0x04);
        out.extend_from_slice(&x);
        out.extend_from_slice(&y);
        Ok(out)
    }

    /// Render back to the four-field key text.
    pub fn to_text(&self) -> PublicKey {
        PublicKey::new(format!("{}\n{}\n{}\n", self.curve.name(), self.x, self.y))
    }
}

/// Left-pad a big-endian integer to `width` bytes; `None` if it does not fit.
pub(crate) fn pad_be(n: &BigUint, width: usize) -> Option<Vec<u8>> {
    let bytes = n.to_bytes_be();
    if bytes.len() > width {
        return None;
    }
    let mut out = vec![0u8; width - bytes.len()];
    out.extend_from_slice(&bytes);
    Some(out)
}

/// Parse key text into its curve and coordinates.
///
/// The text is exactly four newline-terminated fields: the curve name, the
/// decimal X and Y coordinates, and a trailing empty field.
pub fn parse_public_key(key: &PublicKey) -> Result<KeyData> {
    const OP: &str = "ParsePublicKey";

    let fields: Vec<&str> = key.as_str().split('\n').collect();
    if fields.len() != 4 || !fields[3].is_empty() {
        return Err(Error::new(OP, Kind::Invalid)
            .with_cause("key must be curve, X, and Y, one per line"));
    }
    let curve = Curve::from_name(fields[0])
        .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("unrecognized curve name"))?;
    let x = BigUint::parse_bytes(fields[1].as_bytes(), 10)
        .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("bad X coordinate"))?;
    let y = BigUint::parse_bytes(fields[2].as_bytes(), 10)
        .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("bad Y coordinate"))?;
    Ok(KeyData { curve, x, y })
}
