use thiserror::Error;

/// Unified error type for the proxy rotation subsystem
#[derive(Error, Debug)]
pub enum ReelError {
    // Pool errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    // Acquisition errors
    #[error("External process failed: {0}")]
    ExternalProcess(String),

    #[error("External process timed out after {secs}s")]
    ExternalProcessTimeout { secs: u64 },

    #[error("Broker error: {0}")]
    Broker(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for proxyreel operations
pub type Result<T> = std::result::Result<T, ReelError>;

impl ReelError {
    /// Errors that must stop the crawl instead of being absorbed locally
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReelError::NoProxiesAvailable | ReelError::InvalidConfig(_)
        )
    }

    /// Errors a discovery source reports and the chain converts into an empty result
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            ReelError::ExternalProcess(_)
                | ReelError::ExternalProcessTimeout { .. }
                | ReelError::Broker(_)
                | ReelError::Io(_)
                | ReelError::Http(_)
                | ReelError::Timeout
        )
    }
}

impl From<hyper::Error> for ReelError {
    fn from(err: hyper::Error) -> Self {
        ReelError::Http(err.to_string())
    }
}

impl From<http::Error> for ReelError {
    fn from(err: http::Error) -> Self {
        ReelError::Http(err.to_string())
    }
}

impl From<url::ParseError> for ReelError {
    fn from(err: url::ParseError) -> Self {
        ReelError::InvalidProxyAddress(err.to_string())
    }
}
