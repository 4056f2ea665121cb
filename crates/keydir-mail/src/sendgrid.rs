use std::time::Duration;

use async_trait::async_trait;
use keydir_core::{Error, Kind, Result};
use serde_json::json;

use crate::{validate_message, Mailer};

const MAIL_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound mail over the provider's HTTPS JSON API with Bearer auth.
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
}

impl SendGridMailer {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        const OP: &str = "SendGridMailer.New";
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| Error::new(OP, Kind::Internal).with_cause(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
        })
    }
}

fn build_body(to: &str, from: &str, subject: &str, text: &str, html: &str) -> serde_json::Value {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(json!({ "type": "text/plain", "value": text }));
    }
    if !html.is_empty() {
        content.push(json!({ "type": "text/html", "value": html }));
    }
    json!({
        "personalizations": [ { "to": [ { "email": to } ] } ],
        "from": { "email": from },
        "subject": subject,
        "content": content,
    })
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(
        &self,
        to: &str,
        from: &str,
        subject: &str,
        text: &str,
        html: &str,
    ) -> Result<()> {
        const OP: &str = "SendGridMailer.Send";
        validate_message(OP, subject, text, html)?;

        let response = self
            .client
            .post(MAIL_SEND_URL)
            .bearer_auth(&self.api_key)
            .json(&build_body(to, from, subject, text, html))
            .send()
            .await
            .map_err(|e| Error::new(OP, Kind::IO).with_cause(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::new(OP, Kind::IO)
                .with_cause(format!("mail provider returned {}", response.status())));
        }
        Ok(())
    }
}
