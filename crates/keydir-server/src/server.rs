use std::sync::Arc;

use keydir_audit::{AuditLog, EventKind};
use keydir_core::{name, Error, Kind, Result, StoredEntry, UserName, UserRecord};
use keydir_crypto::parse_public_key;
use keydir_dns::{verify_owner, TxtResolver};
use keydir_store::{Storage, UserStore};
use tracing::info;

/// The shared backend container: storage, the cached user repository, the
/// audit log, and the DNS resolver. One per process; every per-caller
/// handle shares it through an `Arc`, and dropping the last handle releases
/// the backing store.
pub struct ServerContext {
    pub storage: Arc<dyn Storage>,
    pub users: UserStore,
    pub log: AuditLog,
    pub resolver: Arc<dyn TxtResolver>,
}

impl ServerContext {
    pub fn new(storage: Arc<dyn Storage>, resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            users: UserStore::new(storage.clone()),
            log: AuditLog::new(storage.clone()),
            storage,
            resolver,
        }
    }
}

/// One caller's view of the directory. Cheap to construct per request.
pub struct KeyServer {
    ctx: Arc<ServerContext>,
    caller: Option<UserName>,
    privileged: bool,
}

impl KeyServer {
    /// A handle acting as the authenticated `caller`.
    pub fn for_user(ctx: Arc<ServerContext>, caller: UserName) -> Self {
        Self {
            ctx,
            caller: Some(caller),
            privileged: false,
        }
    }

    /// An unauthenticated handle: lookups only.
    pub fn anonymous(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            caller: None,
            privileged: false,
        }
    }

    /// The signup path's handle: authorization is bypassed but `actor` is
    /// still recorded in the audit log.
    pub(crate) fn internal(ctx: Arc<ServerContext>, actor: UserName) -> Self {
        Self {
            ctx,
            caller: Some(actor),
            privileged: true,
        }
    }

    /// Resolve `raw` to its record. Requires no authentication; the stored
    /// admin bit never leaves the server.
    pub fn lookup(&self, raw: &str) -> Result<UserRecord> {
        const OP: &str = "KeyServer.Lookup";
        let name = name::canonicalize(raw).map_err(|e| Error::wrap(OP, e))?;
        let entry = self.ctx.users.lookup(&name).map_err(|e| Error::wrap(OP, e))?;
        Ok(entry.user)
    }

    /// Write `record`, subject to the authorization rules. A persisted
    /// change always leaves both an attempt and a success entry in the
    /// audit log; a failure after the attempt leaves the attempt as the
    /// forensic record.
    pub async fn put(&self, record: &UserRecord) -> Result<()> {
        const OP: &str = "KeyServer.Put";

        let canonical =
            name::canonicalize(record.name.as_str()).map_err(|e| Error::wrap(OP, e))?;
        if canonical != record.name {
            return Err(Error::new(OP, Kind::Invalid)
                .with_user(record.name.as_str())
                .with_cause("name is not canonical"));
        }
        if name::is_wildcard(&record.name) {
            return Err(Error::new(OP, Kind::Invalid)
                .with_user(record.name.as_str())
                .with_cause("wildcard user cannot be written"));
        }
        parse_public_key(&record.public_key)
            .map_err(|e| Error::wrap(OP, e).with_user(record.name.as_str()))?;

        let existing = match self.ctx.users.lookup(&record.name) {
            Ok(entry) => Some(entry),
            Err(e) if e.is(Kind::NotExist) => None,
            Err(e) => return Err(Error::wrap(OP, e)),
        };

        self.authorize(&record.name, existing.is_some()).await?;
        let actor = self
            .caller
            .as_ref()
            .ok_or_else(|| Error::new(OP, Kind::Internal).with_cause("authorized put without a caller"))?;

        self.ctx
            .log
            .append(EventKind::PutAttempt, actor, record)
            .map_err(|e| Error::wrap(OP, e))?;
        let entry = StoredEntry {
            user: record.clone(),
            is_admin: existing.map(|e| e.is_admin).unwrap_or(false),
        };
        self.ctx.users.put(&entry).map_err(|e| Error::wrap(OP, e))?;
        self.ctx
            .log
            .append(EventKind::PutSuccess, actor, record)
            .map_err(|e| Error::wrap(OP, e))?;
        info!(name = %record.name, caller = %actor, "record written");
        Ok(())
    }

    /// The authorization rules, evaluated in order; the first match
    /// decides. The wildcard rule is handled by `put` before lookup.
    async fn authorize(&self, target: &UserName, exists: bool) -> Result<()> {
        const OP: &str = "KeyServer.Put";

        if self.privileged {
            return Ok(());
        }
        let Some(caller) = &self.caller else {
            return Err(Error::new(OP, Kind::Permission)
                .with_user(target.as_str())
                .with_cause("request is not authenticated"));
        };

        // A user may always update their own record.
        if caller == target {
            return Ok(());
        }
        // The canonical user manages their own suffixed identities.
        let parsed = name::parse(target.as_str()).map_err(|e| Error::wrap(OP, e))?;
        if !parsed.suffix.is_empty() && *caller == name::without_suffix(target) {
            return Ok(());
        }
        // A global admin may write anything.
        let caller_entry = match self.ctx.users.lookup(caller) {
            Ok(entry) => Some(entry),
            Err(e) if e.is(Kind::NotExist) => None,
            Err(e) => return Err(Error::wrap(OP, e)),
        };
        if caller_entry.as_ref().is_some_and(|e| e.is_admin) {
            return Ok(());
        }
        // Existing records belong to their users; even a domain owner may
        // not overwrite another user.
        if exists {
            return Err(Error::new(OP, Kind::Exist)
                .with_user(target.as_str())
                .with_cause("record exists and caller does not own it"));
        }
        // New name: the caller must prove ownership of the target domain.
        let Some(caller_entry) = caller_entry else {
            return Err(Error::new(OP, Kind::Permission)
                .with_user(caller.as_str())
                .with_cause("caller has no record"));
        };
        verify_owner(
            self.ctx.resolver.as_ref(),
            parsed.domain,
            caller,
            &caller_entry.user.public_key,
        )
        .await
        .map_err(|e| Error {
            op: OP,
            kind: Kind::Permission,
            user: Some(target.to_string()),
            cause: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keydir_audit::verify_chain;
    use keydir_core::name::canonicalize;
    use keydir_core::{Endpoint, PublicKey};
    use keydir_crypto::{domain_proof_hash, Curve, Factotum};
    use keydir_dns::TXT_PROOF_PREFIX;
    use keydir_store::MemStorage;
    use std::sync::Mutex;

    struct FakeDns {
        records: Mutex<Vec<String>>,
    }

    impl FakeDns {
        fn empty() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TxtResolver for FakeDns {
        async fn lookup_txt(&self, _domain: &str) -> Result<Vec<String>> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    fn context(dns: Arc<FakeDns>) -> Arc<ServerContext> {
        Arc::new(ServerContext::new(Arc::new(MemStorage::new()), dns))
    }

    fn record(name: &str, key: &PublicKey) -> UserRecord {
        UserRecord {
            name: canonicalize(name).unwrap(),
            dirs: vec![],
            stores: vec![],
            public_key: key.clone(),
        }
    }

    fn seed(ctx: &ServerContext, name: &str, key: &PublicKey, is_admin: bool) {
        ctx.users
            .put(&StoredEntry {
                user: record(name, key),
                is_admin,
            })
            .unwrap();
    }

    fn proof_txt(f: &Factotum, domain: &str, caller: &UserName) -> String {
        let sig = f.sign(&domain_proof_hash(domain, caller)).unwrap();
        format!(
            "{}{}-{}",
            TXT_PROOF_PREFIX,
            sig.r.to_str_radix(16),
            sig.s.to_str_radix(16)
        )
    }

    #[tokio::test]
    async fn self_update_is_allowed() {
        let ctx = context(FakeDns::empty());
        let f = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "ann@example.com", f.public_key(), false);

        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx.clone(), ann);
        let mut updated = record("ann@example.com", f.public_key());
        updated.dirs.push(Endpoint::remote("dir.example.com:443"));
        server.put(&updated).await.unwrap();
        assert_eq!(server.lookup("ann@example.com").unwrap(), updated);
    }

    #[tokio::test]
    async fn canonical_user_manages_suffixed_identities() {
        let ctx = context(FakeDns::empty());
        let f = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "ann@example.com", f.public_key(), false);

        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx, ann);
        server
            .put(&record("ann+work@example.com", f.public_key()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn suffixed_identity_cannot_write_its_sibling() {
        let ctx = context(FakeDns::empty());
        let f = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "ann+work@example.com", f.public_key(), false);
        seed(&ctx, "ann+home@example.com", f.public_key(), false);

        let work = canonicalize("ann+work@example.com").unwrap();
        let server = KeyServer::for_user(ctx, work);
        let err = server
            .put(&record("ann+home@example.com", f.public_key()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Kind::Exist);
    }

    #[tokio::test]
    async fn global_admin_may_overwrite_any_record() {
        let ctx = context(FakeDns::empty());
        let admin_key = Factotum::generate(Curve::P256).unwrap();
        let user_key = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "root@example.com", admin_key.public_key(), true);
        seed(&ctx, "ann@example.com", user_key.public_key(), false);

        let root = canonicalize("root@example.com").unwrap();
        let server = KeyServer::for_user(ctx.clone(), root);
        let replacement = record("ann@example.com", admin_key.public_key());
        server.put(&replacement).await.unwrap();

        // The overwrite kept ann's (non-)admin bit.
        let stored = ctx
            .users
            .lookup(&canonicalize("ann@example.com").unwrap())
            .unwrap();
        assert!(!stored.is_admin);
    }

    #[tokio::test]
    async fn domain_owner_creates_new_users_but_cannot_overwrite() {
        let dns = FakeDns::empty();
        let ctx = context(dns.clone());
        let admin_key = Factotum::generate(Curve::P256).unwrap();
        let admin = canonicalize("admin@corp.com").unwrap();
        seed(&ctx, "admin@corp.com", admin_key.public_key(), false);
        dns.records
            .lock()
            .unwrap()
            .push(proof_txt(&admin_key, "corp.com", &admin));

        let server = KeyServer::for_user(ctx.clone(), admin);
        let fresh = record("new@corp.com", admin_key.public_key());
        server.put(&fresh).await.unwrap();

        // A second put against the now-existing record is refused.
        let err = server.put(&fresh).await.unwrap_err();
        assert_eq!(err.kind, Kind::Exist);
    }

    #[tokio::test]
    async fn non_owner_cannot_create_in_a_foreign_domain() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "ann@example.com", key.public_key(), false);

        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx, ann);
        let err = server
            .put(&record("bob@example.com", key.public_key()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Kind::Permission);
    }

    #[tokio::test]
    async fn caller_without_a_record_is_denied() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        let ghost = canonicalize("ghost@example.com").unwrap();
        let server = KeyServer::for_user(ctx, ghost);
        let err = server
            .put(&record("new@example.com", key.public_key()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Kind::Permission);
    }

    #[tokio::test]
    async fn wildcard_is_never_writable() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "root@example.com", key.public_key(), true);

        let root = canonicalize("root@example.com").unwrap();
        let server = KeyServer::for_user(ctx, root);
        let err = server
            .put(&record("*@example.com", key.public_key()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
    }

    #[tokio::test]
    async fn non_canonical_name_is_rejected() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx, ann);
        let record = UserRecord {
            name: serde_json::from_str("\"Ann@Example.COM\"").unwrap(),
            dirs: vec![],
            stores: vec![],
            public_key: key.public_key().clone(),
        };
        let err = server.put(&record).await.unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
    }

    #[tokio::test]
    async fn bad_key_text_is_rejected() {
        let ctx = context(FakeDns::empty());
        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx, ann);
        let record = UserRecord {
            name: canonicalize("ann@example.com").unwrap(),
            dirs: vec![],
            stores: vec![],
            public_key: PublicKey::new("not a key"),
        };
        let err = server.put(&record).await.unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
    }

    #[tokio::test]
    async fn anonymous_handles_cannot_put() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        let server = KeyServer::anonymous(ctx);
        let err = server
            .put(&record("ann@example.com", key.public_key()))
            .await
            .unwrap_err();
        assert_eq!(err.kind, Kind::Permission);
    }

    #[tokio::test]
    async fn lookup_hides_the_admin_bit_and_misses_are_not_exist() {
        let ctx = context(FakeDns::empty());
        let key = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "root@example.com", key.public_key(), true);

        let server = KeyServer::anonymous(ctx);
        let rec = server.lookup("root@example.com").unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("IsAdmin"));

        let err = server.lookup("nobody@example.com").unwrap_err();
        assert_eq!(err.kind, Kind::NotExist);
        let err = server.lookup("not a name").unwrap_err();
        assert_eq!(err.kind, Kind::Invalid);
    }

    #[tokio::test]
    async fn successful_puts_log_attempt_and_success_pairs() {
        let ctx = context(FakeDns::empty());
        let f = Factotum::generate(Curve::P256).unwrap();
        seed(&ctx, "ann@example.com", f.public_key(), false);
        let seeded_log = ctx.log.read_all().unwrap();
        assert!(seeded_log.is_empty());

        let ann = canonicalize("ann@example.com").unwrap();
        let server = KeyServer::for_user(ctx.clone(), ann);
        let mut rec = record("ann@example.com", f.public_key());
        for i in 0..3 {
            rec.dirs = vec![Endpoint::remote(format!("dir{i}.example.com:443"))];
            server.put(&rec).await.unwrap();
        }
        // A denied put leaves no new entries at all.
        let bob = KeyServer::for_user(ctx.clone(), canonicalize("bob@example.com").unwrap());
        assert!(bob.put(&rec).await.is_err());

        let log = ctx.log.read_all().unwrap();
        verify_chain(&log).unwrap();
        let text = String::from_utf8(log).unwrap();
        assert_eq!(text.matches("put attempt").count(), 3);
        assert_eq!(text.matches("put success").count(), 3);
    }
}
