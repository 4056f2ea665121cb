//! ECDSA signing and verification over precomputed SHA-256 hashes.

use keydir_core::{Error, Kind, PublicKey, Result};
use num_bigint::BigUint;
use signature::hazmat::{PrehashSigner, PrehashVerifier};

use crate::key::{pad_be, parse_public_key, Curve, KeyData};

const OP_SIGN: &str = "Sign";
const OP_VERIFY: &str = "Verify";

/// An ECDSA signature as the arbitrary-precision pair (R, S).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub r: BigUint,
    pub s: BigUint,
}

impl Signature {
    /// Parse from the decimal forms used in signup URL parameters.
    pub fn from_decimal(r: &str, s: &str) -> Option<Signature> {
        Some(Signature {
            r: BigUint::parse_bytes(r.as_bytes(), 10)?,
            s: BigUint::parse_bytes(s.as_bytes(), 10)?,
        })
    }

    /// Parse from the hexadecimal forms used in DNS TXT proofs.
    pub fn from_hex(r: &str, s: &str) -> Option<Signature> {
        Some(Signature {
            r: BigUint::parse_bytes(r.as_bytes(), 16)?,
            s: BigUint::parse_bytes(s.as_bytes(), 16)?,
        })
    }

    /// Fixed-width `R || S` encoding at the curve's field width.
    fn fixed_bytes(&self, width: usize) -> Result<Vec<u8>> {
        let r = pad_be(&self.r, width)
            .ok_or_else(|| Error::new(OP_VERIFY, Kind::Invalid).with_cause("R out of range"))?;
        let s = pad_be(&self.s, width)
            .ok_or_else(|| Error::new(OP_VERIFY, Kind::Invalid).with_cause("S out of range"))?;
        let mut out = r;
        out.extend_from_slice(&s);
        Ok(out)
    }
}

// Each curve gets a concrete implementation; the RustCrypto types are not
// object-safe across curves, so dispatch stays at this boundary.

macro_rules! curve_ops {
    ($sign:ident, $verify:ident, $curve:ident, $width:expr) => {
        fn $sign(secret: &[u8], hash: &[u8]) -> Result<Signature> {
            let sk = $curve::ecdsa::SigningKey::from_slice(secret)
                .map_err(|e| Error::new(OP_SIGN, Kind::Invalid).with_cause(e.to_string()))?;
            let sig: $curve::ecdsa::Signature = sk
                .sign_prehash(hash)
                .map_err(|e| Error::new(OP_SIGN, Kind::Internal).with_cause(e.to_string()))?;
            let bytes = sig.to_bytes();
            let (r, s) = bytes.as_slice().split_at($width);
            Ok(Signature {
                r: BigUint::from_bytes_be(r),
                s: BigUint::from_bytes_be(s),
            })
        }

        fn $verify(key: &KeyData, hash: &[u8], sig: &Signature) -> Result<()> {
            let vk = $curve::ecdsa::VerifyingKey::from_sec1_bytes(&key.sec1_bytes()?)
                .map_err(|e| Error::new(OP_VERIFY, Kind::Invalid).with_cause(e.to_string()))?;
            let sig = $curve::ecdsa::Signature::from_slice(&sig.fixed_bytes($width)?)
                .map_err(|e| Error::new(OP_VERIFY, Kind::Invalid).with_cause(e.to_string()))?;
            vk.verify_prehash(hash, &sig).map_err(|_| {
                Error::new(OP_VERIFY, Kind::Invalid).with_cause("signature does not verify")
            })
        }
    };
}

curve_ops!(sign_p256, verify_p256, p256, 32);
curve_ops!(sign_p384, verify_p384, p384, 48);
curve_ops!(sign_p521, verify_p521, p521, 66);

/// Sign `hash` with a raw big-endian secret scalar on `curve`.
pub fn sign(curve: Curve, secret: &[u8], hash: &[u8]) -> Result<Signature> {
    match curve {
        Curve::P256 => sign_p256(secret, hash),
        Curve::P384 => sign_p384(secret, hash),
        Curve::P521 => sign_p521(secret, hash),
    }
}

/// Verify `sig` over `hash` against the published key text.
pub fn verify(key: &PublicKey, hash: &[u8], sig: &Signature) -> Result<()> {
    let data = parse_public_key(key)?;
    match data.curve {
        Curve::P256 => verify_p256(&data, hash, sig),
        Curve::P384 => verify_p384(&data, hash, sig),
        Curve::P521 => verify_p521(&data, hash, sig),
    }
}
