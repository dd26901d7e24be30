use thiserror::Error;

/// Result alias for backend operations.
pub type BackendResult<T> = core::result::Result<T, BackendError>;

/// Canonical backend error surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{what} already exists")]
    AlreadyExists { what: String },
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    #[error("offset {offset} is beyond the end of {what} ({size} bytes)")]
    InvalidRange { what: String, offset: u64, size: u64 },
    #[error("connectivity error: {0}")]
    Connectivity(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("credential error: {0}")]
    Credential(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl BackendError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::already_exists(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Errors raised while building a backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("environment variable {0} not set")]
    MissingVariable(String),
    #[error("malformed connection string {input:?}: {reason}")]
    Malformed { input: String, reason: String },
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_value(
        key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}
