//! End-to-end exercise of the HTTP surface: signup both phases, the Key
//! RPC methods, and the audit log, all driven through the router.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;
use url::Url;

use keydir_audit::verify_chain;
use keydir_core::name::canonicalize;
use keydir_core::{Result, UserRecord};
use keydir_crypto::{signup_request_hash, Curve, Factotum};
use keydir_dns::TxtResolver;
use keydir_mail::Mailer;
use keydir_server::{router, AppState, ServerConfig, ServerContext, SignupServer};
use keydir_store::MemStorage;

struct NoDns;

#[async_trait]
impl TxtResolver for NoDns {
    async fn lookup_txt(&self, _domain: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(
        &self,
        _to: &str,
        _from: &str,
        _subject: &str,
        text: &str,
        _html: &str,
    ) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

struct App {
    router: Router,
    ctx: Arc<ServerContext>,
    mailer: Arc<CapturingMailer>,
}

fn app() -> App {
    let ctx = Arc::new(ServerContext::new(
        Arc::new(MemStorage::new()),
        Arc::new(NoDns),
    ));
    let mailer = Arc::new(CapturingMailer::default());
    let mut config = ServerConfig::new(canonicalize("keyserver@key.example.com").unwrap());
    config.signup_base_url = "https://key.example.com/signup".to_string();
    let factotum = Arc::new(Factotum::generate(Curve::P256).unwrap());
    let signup = Arc::new(SignupServer::new(
        ctx.clone(),
        factotum,
        mailer.clone(),
        config,
    ));
    let state = AppState {
        ctx: ctx.clone(),
        signup,
    };
    App {
        router: router(state, Duration::from_secs(5)),
        ctx,
        mailer,
    }
}

fn signup_query(name: &str, client: &Factotum) -> String {
    let key = client.public_key().as_str();
    let sig = client.sign(&signup_request_hash(name, "", "", key)).unwrap();
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("name", name)
        .append_pair("key", key)
        .append_pair("sigR", &sig.r.to_string())
        .append_pair("sigS", &sig.s.to_string())
        .finish()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn post(router: &Router, uri: &str) -> (StatusCode, String) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn post_json(router: &Router, uri: &str, body: &str) -> (StatusCode, String) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

/// The query string of the verification link in the last captured mail.
fn mailed_query(mailer: &CapturingMailer) -> String {
    let sent = mailer.sent.lock().unwrap();
    let body = sent.last().expect("a mail was sent");
    let link = body
        .lines()
        .find(|l| l.starts_with("https://"))
        .expect("mail contains the link");
    Url::parse(link).unwrap().query().unwrap().to_string()
}

#[tokio::test]
async fn signup_then_lookup_round_trip() {
    let app = app();
    let client = Factotum::generate(Curve::P256).unwrap();

    // Phase 1.
    let query = signup_query("ann@example.com", &client);
    let (status, body) = post(&app.router, &format!("/signup?{query}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(!body.contains("sigR"));

    // Phase 2 via the emailed link.
    let confirm = mailed_query(&app.mailer);
    let (status, body) = post(&app.router, &format!("/signup?{confirm}")).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Lookup returns the record without the admin bit.
    let (status, body) =
        post_json(&app.router, "/api/Key/Lookup", r#"{"UserName":"ann@example.com"}"#).await;
    assert_eq!(status, StatusCode::OK);
    let record: UserRecord = serde_json::from_str(&body).unwrap();
    assert_eq!(record.public_key, *client.public_key());
    assert!(!body.contains("IsAdmin"));

    // The snapshot companion exists with the same key.
    let (status, body) = post_json(
        &app.router,
        "/api/Key/Lookup",
        r#"{"UserName":"ann+snapshot@example.com"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: UserRecord = serde_json::from_str(&body).unwrap();
    assert_eq!(snapshot.public_key, *client.public_key());

    // The audit log is served as text and its chain holds.
    let (status, log) = send(
        &app.router,
        Request::builder().uri("/log").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verify_chain(log.as_bytes()).unwrap(), 4);
    assert_eq!(log.matches("put success").count(), 2);
}

#[tokio::test]
async fn repeated_signups_get_429_with_growing_retry_after() {
    let app = app();
    let client = Factotum::generate(Curve::P256).unwrap();
    let query = signup_query("ann@example.com", &client);

    let (status, _) = post(&app.router, &format!("/signup?{query}")).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/signup?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "60");

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/signup?{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "120");
}

#[tokio::test]
async fn signup_for_existing_user_is_a_400() {
    let app = app();
    let client = Factotum::generate(Curve::P256).unwrap();

    let query = signup_query("bob@example.com", &client);
    let (status, _) = post(&app.router, &format!("/signup?{query}")).await;
    assert_eq!(status, StatusCode::OK);
    let confirm = mailed_query(&app.mailer);
    let (status, _) = post(&app.router, &format!("/signup?{confirm}")).await;
    assert_eq!(status, StatusCode::OK);

    // A fresh phase 1 for the same, now existing, name.
    let (status, body) = post(&app.router, &format!("/signup?{query}")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("already exists"), "{body}");
}

#[tokio::test]
async fn lookup_errors_map_to_statuses() {
    let app = app();
    let (status, _) =
        post_json(&app.router, "/api/Key/Lookup", r#"{"UserName":"nobody@example.com"}"#).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) =
        post_json(&app.router, "/api/Key/Lookup", r#"{"UserName":"not a name"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_requires_a_caller_and_allows_self_update() {
    let app = app();
    let client = Factotum::generate(Curve::P256).unwrap();

    // Register ann first.
    let query = signup_query("ann@example.com", &client);
    post(&app.router, &format!("/signup?{query}")).await;
    let confirm = mailed_query(&app.mailer);
    post(&app.router, &format!("/signup?{confirm}")).await;

    let record = serde_json::json!({
        "Name": "ann@example.com",
        "Dirs": [ { "Transport": "remote", "NetAddr": "dir.example.com:443" } ],
        "Stores": [],
        "PublicKey": client.public_key().as_str(),
    })
    .to_string();

    // No caller header: denied.
    let (status, _) = post_json(&app.router, "/api/Key/Put", &record).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Self-update with the header set.
    let (status, body) = send(
        &app.router,
        Request::builder()
            .method("POST")
            .uri("/api/Key/Put")
            .header("content-type", "application/json")
            .header("x-key-user", "ann@example.com")
            .body(Body::from(record))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) =
        post_json(&app.router, "/api/Key/Lookup", r#"{"UserName":"ann@example.com"}"#).await;
    let fetched: UserRecord = serde_json::from_str(&body).unwrap();
    assert_eq!(fetched.dirs[0].net_addr, "dir.example.com:443");
}
