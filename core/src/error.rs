use thiserror::Error;

/// Why a descriptor could not be turned into an [`crate::Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("unrecognized descriptor scheme")]
    UnknownScheme,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("invalid JSON payload: {0}")]
    Json(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid URI: {0}")]
    InvalidUri(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
    #[error("empty host")]
    EmptyHost,
}

/// Problems with a scan request that are detected before anything is dispatched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no descriptors to scan")]
    EmptyInput,
    #[error("concurrency must be between 1 and {max}, got {got}")]
    InvalidConcurrency { got: usize, max: usize },
    #[error("probe timeout must be greater than zero")]
    InvalidTimeout,
    #[error("invalid threshold `{name}`: {value}")]
    InvalidThreshold { name: &'static str, value: f64 },
}
