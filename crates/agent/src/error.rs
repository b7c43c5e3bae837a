pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Could not reach or upgrade to the worker.
    #[error("worker unavailable: {0}")]
    Connect(String),

    /// The socket died while the request was in flight. Not retried
    /// transparently; turns are not idempotent.
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Request timeout")]
    RequestTimeout,

    /// An application error reported by the worker, passed through
    /// without reinterpretation.
    #[error("{message}")]
    Worker {
        message: String,
        error_type: Option<String>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Stable error-catalog code for this failure. Worker-reported codes
    /// pass through untouched.
    pub fn code(&self) -> String {
        match self {
            Error::Connect(_) | Error::ConnectionLost => "GW-API-001".to_string(),
            Error::RequestTimeout => "GW-API-002".to_string(),
            Error::Worker {
                error_type: Some(code),
                ..
            } if code.split('-').count() == 3 => code.clone(),
            Error::Worker { .. } => "AGT-INT-001".to_string(),
            Error::Protocol(_) => "GW-INT-001".to_string(),
        }
    }
}
