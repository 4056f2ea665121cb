//! Domain-ownership proof: a TXT record on the domain carrying an ECDSA
//! signature by the claimed owner.

use keydir_core::{Error, Kind, PublicKey, Result, UserName};
use keydir_crypto::{domain_proof_hash, verify, Signature};

use crate::resolver::TxtResolver;

/// TXT records carrying an ownership proof start with this literal.
pub const TXT_PROOF_PREFIX: &str = "upspin:";

/// Check that `caller` owns `domain`: some TXT record on the domain must
/// carry a signature, by `caller`'s key, of the domain-ownership message.
///
/// The first record that verifies wins. If none does, the last parse or
/// verification error is returned, or a generic `Permission` denial when no
/// record even carried the proof prefix.
pub async fn verify_owner(
    resolver: &dyn TxtResolver,
    domain: &str,
    caller: &UserName,
    key: &PublicKey,
) -> Result<()> {
    const OP: &str = "VerifyDomainOwner";

    let records = resolver
        .lookup_txt(domain)
        .await
        .map_err(|e| Error::wrap(OP, e))?;
    let hash = domain_proof_hash(domain, caller);

    let mut last_err: Option<Error> = None;
    for txt in &records {
        let Some(rest) = txt.strip_prefix(TXT_PROOF_PREFIX) else {
            continue;
        };
        let parts: Vec<&str> = rest.split('-').collect();
        if parts.len() != 2 {
            last_err = Some(
                Error::new(OP, Kind::Invalid)
                    .with_user(caller.as_str())
                    .with_cause("ownership proof is not two hex components"),
            );
            continue;
        }
        let Some(sig) = Signature::from_hex(parts[0], parts[1]) else {
            last_err = Some(
                Error::new(OP, Kind::Invalid)
                    .with_user(caller.as_str())
                    .with_cause("bad hex in ownership proof"),
            );
            continue;
        };
        match verify(key, &hash, &sig) {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(Error::wrap(OP, e)),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        Error::new(OP, Kind::Permission)
            .with_user(caller.as_str())
            .with_cause(format!("not an administrator for {domain}"))
    }))
}
