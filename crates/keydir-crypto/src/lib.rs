pub mod factotum;
pub mod hash;
pub mod key;
pub mod sig;

pub use factotum::Factotum;
pub use hash::{domain_proof_hash, signup_request_hash, signup_url_hash};
pub use key::{parse_public_key, Curve, KeyData};
pub use sig::{sign, verify, Signature};
