use async_trait::async_trait;
use keydir_core::Result;
use tracing::info;

use crate::{validate_message, Mailer};

/// Development fallback: validates and logs the message instead of sending.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(
        &self,
        to: &str,
        from: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<()> {
        validate_message("LogMailer.Send", subject, text, html)?;
        let body = if text.is_empty() { html } else { text };
        info!(%to, %from, %subject, %body, "mail (logged, not sent)");
        Ok(())
    }
}
