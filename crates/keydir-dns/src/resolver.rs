use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use keydir_core::{Error, Kind, Result};

/// Fetch the TXT records of a domain. Transport and timeout failures are
/// surfaced as `IO`; a domain with no TXT records yields an empty list.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>>;
}

/// TXT resolution over the hickory stub resolver with a short per-query
/// timeout.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        Self {
            inner: TokioAsyncResolver::tokio(ResolverConfig::default(), opts),
        }
    }
}

#[async_trait]
impl TxtResolver for SystemResolver {
    async fn lookup_txt(&self, domain: &str) -> Result<Vec<String>> {
        const OP: &str = "LookupTXT";
        match self.inner.txt_lookup(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part))
                        .collect::<String>()
                })
                .collect()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(Error::new(OP, Kind::IO).with_cause(e.to_string())),
        }
    }
}
