use std::time::Duration;

use keydir_core::{Error, Kind, Result, UserName};

/// Server configuration: a plain value type populated by the binary.
/// Nothing here reads process-wide state.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Storage backend name: `disk` or `inmemory`.
    pub backend: String,
    /// Mail provider API key; the logging mailer is used when absent.
    pub mail_api_key: Option<String>,
    /// Sender address for outbound mail.
    pub mail_from: String,
    /// Operator address notified of each completed signup.
    pub mail_notify: Option<String>,
    /// Service name used in mail subjects.
    pub mail_project: String,
    /// Absolute URL prefix for verification links.
    pub signup_base_url: String,
    /// Age beyond which a verification link is refused.
    pub grace: Duration,
    /// Initial signup rate-limit backoff.
    pub ratelimit_backoff: Duration,
    /// Upper bound on the signup rate-limit backoff.
    pub ratelimit_max: Duration,
    /// The user the signup path acts as; recorded as the audit-log actor.
    pub server_user: UserName,
}

impl ServerConfig {
    /// Defaults for everything but the server identity.
    pub fn new(server_user: UserName) -> Self {
        Self {
            backend: "disk".to_string(),
            mail_api_key: None,
            mail_from: format!("no-reply@{}", domain_of(&server_user)),
            mail_notify: None,
            mail_project: "keydir".to_string(),
            signup_base_url: String::new(),
            grace: Duration::from_secs(24 * 60 * 60),
            ratelimit_backoff: Duration::from_secs(60),
            ratelimit_max: Duration::from_secs(24 * 60 * 60),
            server_user,
        }
    }
}

fn domain_of(user: &UserName) -> &str {
    match user.as_str().split_once('@') {
        Some((_, domain)) => domain,
        None => user.as_str(),
    }
}

/// Parse the `30s` / `1m` / `24h` duration forms used by the configuration
/// options. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    const OP: &str = "ParseDuration";
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| Error::new(OP, Kind::Invalid).with_cause(format!("bad duration {s:?}")))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 60 * 60,
        _ => {
            return Err(Error::new(OP, Kind::Invalid)
                .with_cause(format!("unknown duration unit in {s:?}")))
        }
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keydir_core::name::canonicalize;

    #[test]
    fn durations_parse() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        for bad in ["", "h", "10x", "-5s", "1.5h"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn defaults_match_the_documented_options() {
        let cfg = ServerConfig::new(canonicalize("keyserver@example.com").unwrap());
        assert_eq!(cfg.backend, "disk");
        assert_eq!(cfg.grace, Duration::from_secs(86_400));
        assert_eq!(cfg.ratelimit_backoff, Duration::from_secs(60));
        assert_eq!(cfg.ratelimit_max, Duration::from_secs(86_400));
        assert_eq!(cfg.mail_from, "no-reply@example.com");
    }
}
