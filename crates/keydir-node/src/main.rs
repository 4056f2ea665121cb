//! keydir-node — the public key directory server binary.
//!
//! Startup sequence:
//!   1. Open the blob-store backend
//!   2. Load (or generate) the server's signing key
//!   3. Wire the mailer, DNS resolver, and signup handler
//!   4. Serve the HTTP surface

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use keydir_core::{name, PublicKey};
use keydir_crypto::{Curve, Factotum};
use keydir_dns::SystemResolver;
use keydir_server::{parse_duration, router, AppState, ServerConfig, ServerContext, SignupServer};
use keydir_store::open_backend;

#[derive(Parser, Debug)]
#[command(
    name = "keydir-node",
    version,
    about = "keydir node — authoritative public key directory for a personal-data network"
)]
struct Args {
    /// HTTP listen address.
    #[arg(long, default_value = "127.0.0.1:8082")]
    addr: SocketAddr,

    /// Directory for the persistent blob store.
    #[arg(long, default_value = "~/.keydir/data")]
    data_dir: PathBuf,

    /// Storage backend: disk or inmemory.
    #[arg(long, default_value = "disk")]
    backend: String,

    /// The user this server acts as; recorded as the audit-log actor.
    #[arg(long, default_value = "keyserver@keydir.local")]
    server_user: String,

    /// Directory holding the server's public.key and secret.key files.
    #[arg(long)]
    key_dir: Option<PathBuf>,

    /// Mail provider API key. Without it, mail is logged instead of sent.
    #[arg(long)]
    mail_apikey: Option<String>,

    /// Sender address for outbound mail.
    #[arg(long)]
    mail_from: Option<String>,

    /// Operator address notified of each completed signup.
    #[arg(long)]
    mail_notify: Option<String>,

    /// Service name used in mail subjects.
    #[arg(long, default_value = "keydir")]
    mail_project: String,

    /// Absolute URL prefix for signup verification links.
    #[arg(long, default_value = "http://127.0.0.1:8082/signup")]
    signup_base_url: String,

    /// Maximum age of a verification link.
    #[arg(long, default_value = "24h")]
    grace: String,

    /// Initial signup rate-limit backoff.
    #[arg(long, default_value = "1m")]
    ratelimit_backoff: String,

    /// Signup rate-limit backoff cap.
    #[arg(long, default_value = "24h")]
    ratelimit_max: String,

    /// DNS query timeout, in seconds.
    #[arg(long, default_value_t = 5)]
    dns_timeout_secs: u64,

    /// Per-request HTTP timeout, in seconds.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keydir=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("keydir node starting");

    // ── Storage backend ───────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    if args.backend == "disk" {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    }
    let storage = open_backend(&args.backend, &data_dir).context("opening storage backend")?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let server_user = name::canonicalize(&args.server_user).context("bad --server-user")?;
    let mut config = ServerConfig::new(server_user);
    config.backend = args.backend.clone();
    config.mail_api_key = args.mail_apikey.clone();
    if let Some(from) = &args.mail_from {
        config.mail_from = from.clone();
    }
    config.mail_notify = args.mail_notify.clone();
    config.mail_project = args.mail_project.clone();
    config.signup_base_url = args.signup_base_url.clone();
    config.grace = parse_duration(&args.grace).context("bad --grace")?;
    config.ratelimit_backoff =
        parse_duration(&args.ratelimit_backoff).context("bad --ratelimit-backoff")?;
    config.ratelimit_max = parse_duration(&args.ratelimit_max).context("bad --ratelimit-max")?;

    // ── Server key ────────────────────────────────────────────────────────────
    let factotum = Arc::new(load_or_generate_factotum(args.key_dir.as_deref())?);

    // ── Adapters ──────────────────────────────────────────────────────────────
    let mailer = keydir_mail::from_config(config.mail_api_key.as_deref())
        .context("building mailer")?;
    if config.mail_api_key.is_none() {
        warn!("no --mail-apikey; outbound mail will be logged, not sent");
    }
    let resolver = Arc::new(SystemResolver::new(Duration::from_secs(args.dns_timeout_secs)));

    // ── Service wiring ────────────────────────────────────────────────────────
    let ctx = Arc::new(ServerContext::new(storage, resolver));
    let signup = Arc::new(SignupServer::new(ctx.clone(), factotum, mailer, config));
    let app = router(
        AppState { ctx, signup },
        Duration::from_secs(args.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, "HTTP server started");
    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

/// Load the server factotum from `key_dir`, or generate an ephemeral one.
///
/// # Warning
/// Ephemeral keys are **not reproducible**: verification links signed before
/// a restart will not verify after it. Only use this for local development.
fn load_or_generate_factotum(key_dir: Option<&Path>) -> anyhow::Result<Factotum> {
    if let Some(dir) = key_dir {
        let public = std::fs::read_to_string(dir.join("public.key"))
            .with_context(|| format!("reading {}/public.key", dir.display()))?;
        let secret = std::fs::read_to_string(dir.join("secret.key"))
            .with_context(|| format!("reading {}/secret.key", dir.display()))?;
        let factotum = Factotum::from_parts(PublicKey::new(public), secret.trim())
            .context("loading server key")?;
        info!(curve = %factotum.curve(), "server key loaded");
        return Ok(factotum);
    }
    warn!("No --key-dir provided. Generating an ephemeral server key — DO NOT USE IN PRODUCTION.");
    Ok(Factotum::generate(Curve::P256)?)
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
