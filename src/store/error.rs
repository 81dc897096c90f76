//! Error taxonomy shared by the facade and every backend

use thiserror::Error;

/// Coarse classification of a [`StoreError`], cheap to copy and match on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    TransientBackend,
    Cancelled,
    Permission,
    Backend,
    Io,
    Closed,
}

/// Errors returned by [`ObjectStore`](super::ObjectStore) and [`ObjectBackend`](super::ObjectBackend)
#[derive(Error, Debug)]
pub enum StoreError {
    /// Invalid construction parameters or unresolved credentials
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key (or local path) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, throttling or 5xx-class failure
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Caller aborted the operation through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Authorization failure reported by the backend
    #[error("permission denied: {0}")]
    Permission(String),

    /// Non-retryable backend failure (bad request, malformed response)
    #[error("backend error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Backend {
        status: Option<u16>,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store (or its backend handle) was already closed
    #[error("object store is closed")]
    Closed,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Configuration(_) => ErrorKind::Configuration,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::TransientBackend(_) => ErrorKind::TransientBackend,
            StoreError::Cancelled => ErrorKind::Cancelled,
            StoreError::Permission(_) => ErrorKind::Permission,
            StoreError::Backend { .. } => ErrorKind::Backend,
            StoreError::Io(_) => ErrorKind::Io,
            StoreError::Closed => ErrorKind::Closed,
        }
    }

    /// Whether a retrying wrapper may reasonably try the call again
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientBackend
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        StoreError::Backend {
            status: None,
            message: message.into(),
        }
    }

    /// Build a representative error of the given kind (used for fault injection)
    pub fn from_kind(kind: ErrorKind, context: &str) -> Self {
        match kind {
            ErrorKind::Configuration => StoreError::Configuration(context.to_string()),
            ErrorKind::NotFound => StoreError::NotFound(context.to_string()),
            ErrorKind::TransientBackend => StoreError::TransientBackend(context.to_string()),
            ErrorKind::Cancelled => StoreError::Cancelled,
            ErrorKind::Permission => StoreError::Permission(context.to_string()),
            ErrorKind::Backend => StoreError::backend(context),
            ErrorKind::Io => StoreError::Io(std::io::Error::other(context.to_string())),
            ErrorKind::Closed => StoreError::Closed,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::NotFound,
            ErrorKind::TransientBackend,
            ErrorKind::Cancelled,
            ErrorKind::Permission,
            ErrorKind::Backend,
            ErrorKind::Io,
            ErrorKind::Closed,
        ] {
            assert_eq!(StoreError::from_kind(kind, "x").kind(), kind);
        }
    }

    #[test]
    fn test_backend_display() {
        let err = StoreError::Backend {
            status: Some(400),
            message: "InvalidArgument".to_string(),
        };
        assert_eq!(err.to_string(), "backend error (400): InvalidArgument");
        assert_eq!(StoreError::backend("bad xml").to_string(), "backend error: bad xml");
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::TransientBackend("503".into()).is_transient());
        assert!(!StoreError::Permission("403".into()).is_transient());
        assert!(StoreError::NotFound("k".into()).is_not_found());
    }
}
