//! Outbound mail adapter.
//!
//! Two implementations: [`SendGridMailer`] posts over HTTPS to a provider,
//! and [`LogMailer`] only logs, so local development needs no account.

pub mod logger;
pub mod sendgrid;

use std::sync::Arc;

use async_trait::async_trait;
use keydir_core::{Error, Kind, Result};

pub use logger::LogMailer;
pub use sendgrid::SendGridMailer;

/// Send one message. `subject` is required and at least one of `text` and
/// `html` must be non-empty.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        from: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<()>;
}

pub(crate) fn validate_message(op: &'static str, subject: &str, text: &str, html: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(Error::new(op, Kind::Invalid).with_cause("empty subject"));
    }
    if text.is_empty() && html.is_empty() {
        return Err(Error::new(op, Kind::Invalid).with_cause("message has no body"));
    }
    Ok(())
}

/// Pick the mailer for the configured `mail.apikey`: the real provider when
/// a key is present, the logging fallback otherwise.
pub fn from_config(api_key: Option<&str>) -> Result<Arc<dyn Mailer>> {
    match api_key {
        Some(key) if !key.is_empty() => Ok(Arc::new(SendGridMailer::new(key)?)),
        _ => Ok(Arc::new(LogMailer)),
    }
}
