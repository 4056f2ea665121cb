use std::fmt;

/// Classified failure reason, carried by every [`Error`].
///
/// Only `IO` is retryable, and only by the caller; the server surfaces each
/// failure after a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Kind {
    #[error("invalid operation")]
    Invalid,
    #[error("item does not exist")]
    NotExist,
    #[error("item already exists")]
    Exist,
    #[error("permission denied")]
    Permission,
    #[error("I/O error")]
    IO,
    #[error("internal error")]
    Internal,
}

impl Kind {
    /// Whether a caller may transparently retry an operation that failed
    /// with this kind.
    pub fn retryable(&self) -> bool {
        matches!(self, Kind::IO)
    }
}

/// The error record crossing every service boundary: an operation label, a
/// classified kind, the user name involved when relevant, and a chain of
/// wrapped causes.
#[derive(Debug)]
pub struct Error {
    pub op: &'static str,
    pub kind: Kind,
    pub user: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(op: &'static str, kind: Kind) -> Self {
        Self {
            op,
            kind,
            user: None,
            cause: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Attach a cause. Accepts any error type as well as plain strings.
    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Re-label an error as it passes through an outer operation, keeping
    /// kind, user, and cause chain intact.
    pub fn wrap(op: &'static str, inner: Error) -> Self {
        Self {
            op,
            kind: inner.kind,
            user: inner.user.clone(),
            cause: Some(Box::new(inner)),
        }
    }

    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        if let Some(user) = &self.user {
            write!(f, ": {user}")?;
        }
        write!(f, ": {}", self.kind)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// A partial error used as a match pattern: only the fields that are set
/// participate in the comparison.
#[derive(Debug, Default, Clone)]
pub struct ErrorTemplate {
    pub op: Option<&'static str>,
    pub kind: Option<Kind>,
    pub user: Option<String>,
}

impl ErrorTemplate {
    pub fn kind(kind: Kind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn op(mut self, op: &'static str) -> Self {
        self.op = Some(op);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn matches(&self, err: &Error) -> bool {
        if let Some(op) = self.op {
            if err.op != op {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if err.kind != kind {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if err.user.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_op_user_kind_cause() {
        let err = Error::new("Lookup", Kind::NotExist)
            .with_user("ann@example.com")
            .with_cause("no such blob");
        assert_eq!(
            err.to_string(),
            "Lookup: ann@example.com: item does not exist: no such blob"
        );
    }

    #[test]
    fn display_skips_unset_fields() {
        let err = Error::new("Put", Kind::Internal);
        assert_eq!(err.to_string(), "Put: internal error");
    }

    #[test]
    fn wrap_keeps_kind_and_chains_cause() {
        let inner = Error::new("Download", Kind::IO).with_cause("connection reset");
        let outer = Error::wrap("Lookup", inner);
        assert_eq!(outer.kind, Kind::IO);
        let source = std::error::Error::source(&outer).unwrap();
        assert!(source.to_string().contains("connection reset"));
    }

    #[test]
    fn template_matches_only_set_fields() {
        let err = Error::new("Put", Kind::Exist).with_user("bob@example.com");
        assert!(ErrorTemplate::kind(Kind::Exist).matches(&err));
        assert!(ErrorTemplate::kind(Kind::Exist)
            .user("bob@example.com")
            .matches(&err));
        assert!(!ErrorTemplate::kind(Kind::Exist)
            .user("ann@example.com")
            .matches(&err));
        assert!(!ErrorTemplate::kind(Kind::Permission).matches(&err));
        assert!(ErrorTemplate::default().matches(&err));
    }

    #[test]
    fn only_io_is_retryable() {
        assert!(Kind::IO.retryable());
        for kind in [
            Kind::Invalid,
            Kind::NotExist,
            Kind::Exist,
            Kind::Permission,
            Kind::Internal,
        ] {
            assert!(!kind.retryable(), "{kind} must not be retryable");
        }
    }
}
