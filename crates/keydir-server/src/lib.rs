//! keydir-server
//!
//! The key directory service proper: authorization, registration, and the
//! HTTP surface around the record store.
//!
//! Endpoints:
//!   POST /signup         — two-phase email signup (phase picked by `now`)
//!   GET  /log            — the audit log as plain text
//!   POST /api/Key/Lookup — resolve a user name to its record
//!   POST /api/Key/Put    — write a record (authenticated caller)

pub mod config;
pub mod http;
pub mod ratelimit;
pub mod server;
pub mod signup;

pub use config::{parse_duration, ServerConfig};
pub use http::{router, AppState};
pub use ratelimit::RateLimiter;
pub use server::{KeyServer, ServerContext};
pub use signup::{SignupOutcome, SignupServer};
