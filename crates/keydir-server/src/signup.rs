//! Two-phase email-mediated signup.
//!
//! Phase 1 (no `now` parameter): the client proves possession of its
//! private key, the request is rate limited, and a verification URL signed
//! by the server is mailed to the user. The server signature never appears
//! in the HTTP response; receiving it proves control of the mailbox.
//!
//! Phase 2 (`now` present): the emailed URL comes back, the server
//! signature and its age are checked, and the user record plus its
//! `+snapshot` companion are created.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keydir_core::{name, Endpoint, Error, Kind, PublicKey, Result, UserName, UserRecord};
use keydir_crypto::{signup_request_hash, signup_url_hash, verify, Factotum, Signature};
use keydir_mail::Mailer;
use tracing::{info, warn};
use url::Url;

use crate::config::ServerConfig;
use crate::ratelimit::RateLimiter;
use crate::server::{KeyServer, ServerContext};

const OP: &str = "Signup";

/// What the HTTP layer turns into a response.
pub enum SignupOutcome {
    /// 200 with a plain-text body.
    Ok(String),
    /// 429 with `Retry-After` set to the wait.
    RateLimited(Duration),
    /// Mapped to a status by error kind.
    Failed(Error),
}

/// The signup endpoint's state: the shared backend, the server's signing
/// key, the outbound mailer, and the per-name rate limiter.
pub struct SignupServer {
    ctx: Arc<ServerContext>,
    factotum: Arc<Factotum>,
    mailer: Arc<dyn Mailer>,
    limiter: RateLimiter,
    config: ServerConfig,
}

/// The validated query parameters common to both phases.
struct Request {
    name: UserName,
    raw_name: String,
    dir: String,
    store: String,
    key: String,
    sig_r: String,
    sig_s: String,
}

impl SignupServer {
    pub fn new(
        ctx: Arc<ServerContext>,
        factotum: Arc<Factotum>,
        mailer: Arc<dyn Mailer>,
        config: ServerConfig,
    ) -> Self {
        Self {
            ctx,
            factotum,
            mailer,
            limiter: RateLimiter::new(config.ratelimit_backoff, config.ratelimit_max),
            config,
        }
    }

    /// Dispatch on the `now` parameter: absent or empty selects phase 1.
    pub async fn handle(&self, params: &HashMap<String, String>) -> SignupOutcome {
        let request = match parse_request(params) {
            Ok(request) => request,
            Err(e) => return SignupOutcome::Failed(e),
        };
        match params.get("now").map(String::as_str).unwrap_or("") {
            "" => self.initiate(request).await,
            now => self.confirm(request, now).await,
        }
    }

    // ── Phase 1 ──────────────────────────────────────────────────────────────

    async fn initiate(&self, request: Request) -> SignupOutcome {
        // The client signs its own request: proof it holds the private key
        // matching the submitted public key.
        let Some(sig) = Signature::from_decimal(&request.sig_r, &request.sig_s) else {
            return SignupOutcome::Failed(
                Error::new(OP, Kind::Invalid)
                    .with_user(request.name.as_str())
                    .with_cause("bad signature encoding"),
            );
        };
        let hash =
            signup_request_hash(&request.raw_name, &request.dir, &request.store, &request.key);
        if let Err(e) = verify(&PublicKey::new(request.key.clone()), &hash, &sig) {
            return SignupOutcome::Failed(Error::wrap(OP, e).with_user(request.name.as_str()));
        }

        match self.ctx.users.lookup(&request.name) {
            Ok(_) => {
                return SignupOutcome::Failed(
                    Error::new(OP, Kind::Exist)
                        .with_user(request.name.as_str())
                        .with_cause("user already exists"),
                )
            }
            Err(e) if e.is(Kind::NotExist) => {}
            Err(e) => return SignupOutcome::Failed(Error::wrap(OP, e)),
        }

        let limit_key = name::without_suffix(&request.name).into_string();
        let (allowed, wait) = self.limiter.pass(&limit_key);
        if !allowed {
            return SignupOutcome::RateLimited(wait);
        }

        let record = record_for(&request);
        let user_json = match serde_json::to_vec(&record) {
            Ok(json) => json,
            Err(e) => {
                return SignupOutcome::Failed(
                    Error::new(OP, Kind::Internal).with_cause(e.to_string()),
                )
            }
        };
        let now = Utc::now().timestamp();
        let server_sig = match self.factotum.sign(&signup_url_hash(&user_json, now)) {
            Ok(sig) => sig,
            Err(e) => return SignupOutcome::Failed(Error::wrap(OP, e)),
        };
        let link = match self.verification_url(&request, &server_sig, now) {
            Ok(link) => link,
            Err(e) => return SignupOutcome::Failed(e),
        };

        if let Err(e) = self.send_signup_mail(&request.name, &link).await {
            return SignupOutcome::Failed(Error::wrap(OP, e));
        }
        info!(name = %request.name, "signup initiated, verification mail sent");
        SignupOutcome::Ok(format!(
            "A confirmation email has been sent to {}.\nFollow the link there to complete your registration.\n",
            request.name
        ))
    }

    fn verification_url(&self, request: &Request, sig: &Signature, now: i64) -> Result<String> {
        let mut link = Url::parse(&self.config.signup_base_url).map_err(|e| {
            Error::new(OP, Kind::Internal)
                .with_cause(format!("bad signup.baseURL: {e}"))
        })?;
        link.query_pairs_mut()
            .append_pair("name", &request.raw_name)
            .append_pair("dir", &request.dir)
            .append_pair("store", &request.store)
            .append_pair("key", &request.key)
            .append_pair("sigR", &sig.r.to_string())
            .append_pair("sigS", &sig.s.to_string())
            .append_pair("now", &now.to_string());
        Ok(link.to_string())
    }

    // ── Phase 2 ──────────────────────────────────────────────────────────────

    async fn confirm(&self, request: Request, now_param: &str) -> SignupOutcome {
        match self.ctx.users.lookup(&request.name) {
            Ok(_) => {
                return SignupOutcome::Failed(
                    Error::new(OP, Kind::Exist)
                        .with_user(request.name.as_str())
                        .with_cause("user already exists"),
                )
            }
            Err(e) if e.is(Kind::NotExist) => {}
            Err(e) => return SignupOutcome::Failed(Error::wrap(OP, e)),
        }

        let Ok(now) = now_param.parse::<i64>() else {
            return SignupOutcome::Failed(
                Error::new(OP, Kind::Invalid)
                    .with_user(request.name.as_str())
                    .with_cause("bad now parameter"),
            );
        };
        let age = Utc::now().timestamp() - now;
        if age > self.config.grace.as_secs() as i64 {
            return SignupOutcome::Failed(
                Error::new(OP, Kind::Invalid)
                    .with_user(request.name.as_str())
                    .with_cause("signup request too old"),
            );
        }

        let record = record_for(&request);
        let user_json = match serde_json::to_vec(&record) {
            Ok(json) => json,
            Err(e) => {
                return SignupOutcome::Failed(
                    Error::new(OP, Kind::Internal).with_cause(e.to_string()),
                )
            }
        };
        let Some(sig) = Signature::from_decimal(&request.sig_r, &request.sig_s) else {
            return SignupOutcome::Failed(
                Error::new(OP, Kind::Invalid)
                    .with_user(request.name.as_str())
                    .with_cause("bad signature encoding"),
            );
        };
        if verify(
            self.factotum.public_key(),
            &signup_url_hash(&user_json, now),
            &sig,
        )
        .is_err()
        {
            return SignupOutcome::Failed(
                Error::new(OP, Kind::Invalid)
                    .with_user(request.name.as_str())
                    .with_cause("signature does not match"),
            );
        }

        // The link has proven the mailbox; create the records.
        let server = KeyServer::internal(self.ctx.clone(), self.config.server_user.clone());
        if let Err(e) = server.put(&record).await {
            let e = Error::wrap(OP, e);
            self.send_error_mail(&request.name, &e).await;
            return SignupOutcome::Failed(e);
        }

        // Best effort: the +snapshot companion, same key, no endpoints.
        match name::snapshot_user(&request.name) {
            Ok(snapshot) => {
                let companion = UserRecord {
                    name: snapshot,
                    dirs: vec![],
                    stores: vec![],
                    public_key: record.public_key.clone(),
                };
                if let Err(e) = server.put(&companion).await {
                    warn!(name = %request.name, error = %e, "snapshot companion not created");
                }
            }
            Err(e) => warn!(name = %request.name, error = %e, "no snapshot name"),
        }

        self.notify_operator(&request.name).await;
        info!(name = %request.name, "signup complete");
        SignupOutcome::Ok(format!("{} is now registered.\n", request.name))
    }

    // ── Mail ─────────────────────────────────────────────────────────────────

    async fn send_signup_mail(&self, to: &UserName, link: &str) -> Result<()> {
        let subject = format!("Confirm your {} registration", self.config.mail_project);
        let text = format!(
            "Hello {to},\n\n\
             To complete your {} registration, follow this link:\n\n{link}\n\n\
             If you did not request this, ignore this message.\n",
            self.config.mail_project
        );
        self.mailer
            .send(to.as_str(), &self.config.mail_from, &subject, &text, "")
            .await
    }

    /// Failures after the emailed signature has verified are also reported
    /// to the user; the address is trustworthy by then. Best effort.
    async fn send_error_mail(&self, to: &UserName, err: &Error) {
        let subject = format!("{} registration failed", self.config.mail_project);
        let text = format!(
            "Hello {to},\n\nYour registration could not be completed: {}.\n",
            err.kind
        );
        if let Err(e) = self
            .mailer
            .send(to.as_str(), &self.config.mail_from, &subject, &text, "")
            .await
        {
            warn!(name = %to, error = %e, "error mail not sent");
        }
    }

    async fn notify_operator(&self, name: &UserName) {
        let Some(notify) = &self.config.mail_notify else {
            return;
        };
        let subject = format!("{} signup: {name}", self.config.mail_project);
        let text = format!("New user registered: {name}\n");
        if let Err(e) = self
            .mailer
            .send(notify, &self.config.mail_from, &subject, &text, "")
            .await
        {
            warn!(name = %name, error = %e, "operator notification not sent");
        }
    }
}

/// Validate the parameters shared by both phases. Suffixed and wildcard
/// names never sign up.
fn parse_request(params: &HashMap<String, String>) -> Result<Request> {
    let raw_name = required(params, "name")?;
    let name = name::canonicalize(&raw_name).map_err(|e| Error::wrap(OP, e))?;
    let parsed = name::parse(name.as_str()).map_err(|e| Error::wrap(OP, e))?;
    if !parsed.suffix.is_empty() {
        return Err(Error::new(OP, Kind::Invalid)
            .with_user(name.as_str())
            .with_cause("suffixed names cannot sign up"));
    }
    if name::is_wildcard(&name) {
        return Err(Error::new(OP, Kind::Invalid)
            .with_user(name.as_str())
            .with_cause("wildcard names cannot sign up"));
    }
    Ok(Request {
        name,
        raw_name,
        dir: optional(params, "dir"),
        store: optional(params, "store"),
        key: required(params, "key")?,
        sig_r: required(params, "sigR")?,
        sig_s: required(params, "sigS")?,
    })
}

fn required(params: &HashMap<String, String>, key: &'static str) -> Result<String> {
    match params.get(key) {
        Some(value) if !value.is_empty() => Ok(value.clone()),
        _ => Err(Error::new(OP, Kind::Invalid).with_cause(format!("missing {key} parameter"))),
    }
}

fn optional(params: &HashMap<String, String>, key: &str) -> String {
    params.get(key).cloned().unwrap_or_default()
}

/// The record both phases derive from the parameters. Phase 2 must rebuild
/// exactly the JSON phase 1 signed.
fn record_for(request: &Request) -> UserRecord {
    UserRecord {
        name: request.name.clone(),
        dirs: endpoints(&request.dir),
        stores: endpoints(&request.store),
        public_key: PublicKey::new(request.key.clone()),
    }
}

fn endpoints(addr: &str) -> Vec<Endpoint> {
    if addr.is_empty() {
        Vec::new()
    } else {
        vec![Endpoint::remote(addr)]
    }
}
