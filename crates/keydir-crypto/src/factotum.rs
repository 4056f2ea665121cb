use keydir_core::{Error, Kind, PublicKey, Result};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::key::{pad_be, parse_public_key, Curve};
use crate::sig::{sign, verify, Signature};

/// The server's long-lived key material, exposing sign-only operations.
///
/// The secret scalar is held in a `Zeroizing` buffer so it is wiped from
/// memory on drop.
pub struct Factotum {
    curve: Curve,
    secret: Zeroizing<Vec<u8>>,
    public: PublicKey,
}

impl Factotum {
    /// Generate a fresh keypair on `curve`.
    pub fn generate(curve: Curve) -> Result<Self> {
        const OP: &str = "Factotum.Generate";
        let (secret, x, y) = match curve {
            Curve::P256 => {
                let sk = p256::ecdsa::SigningKey::random(&mut OsRng);
                let point = sk.verifying_key().to_encoded_point(false);
                (sk.to_bytes().as_slice().to_vec(), coord(OP, point.x())?, coord(OP, point.y())?)
            }
            Curve::P384 => {
                let sk = p384::ecdsa::SigningKey::random(&mut OsRng);
                let point = sk.verifying_key().to_encoded_point(false);
                (sk.to_bytes().as_slice().to_vec(), coord(OP, point.x())?, coord(OP, point.y())?)
            }
            Curve::P521 => {
                let sk = p521::ecdsa::SigningKey::random(&mut OsRng);
                let point = sk.verifying_key().to_encoded_point(false);
                (sk.to_bytes().as_slice().to_vec(), coord(OP, point.x())?, coord(OP, point.y())?)
            }
        };
        let public = PublicKey::new(format!("{}\n{}\n{}\n", curve.name(), x, y));
        Ok(Self {
            curve,
            secret: Zeroizing::new(secret),
            public,
        })
    }

    /// Restore a factotum from the published key text and the decimal
    /// secret scalar, checking that the two halves belong together.
    pub fn from_parts(public: PublicKey, secret_decimal: &str) -> Result<Self> {
        const OP: &str = "Factotum.FromParts";
        let data = parse_public_key(&public)?;
        let d = BigUint::parse_bytes(secret_decimal.trim().as_bytes(), 10)
            .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("bad secret scalar"))?;
        let secret = pad_be(&d, data.curve.field_bytes())
            .ok_or_else(|| Error::new(OP, Kind::Invalid).with_cause("secret scalar out of range"))?;
        let f = Self {
            curve: data.curve,
            secret: Zeroizing::new(secret),
            public,
        };
        // Prove the secret matches the public half before accepting it.
        let probe = [0x5au8; 32];
        let sig = f.sign(&probe)?;
        verify(&f.public, &probe, &sig)
            .map_err(|_| Error::new(OP, Kind::Invalid).with_cause("secret does not match public key"))?;
        Ok(f)
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign a precomputed hash with the held secret.
    pub fn sign(&self, hash: &[u8]) -> Result<Signature> {
        sign(self.curve, &self.secret, hash)
    }
}

fn coord(op: &'static str, bytes: Option<&impl AsRef<[u8]>>) -> Result<BigUint> {
    let bytes = bytes.ok_or_else(|| Error::new(op, Kind::Internal).with_cause("point at infinity"))?;
    Ok(BigUint::from_bytes_be(bytes.as_ref()))
}

impl std::fmt::Debug for Factotum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Factotum {{ curve: {} }}", self.curve)
    }
}
