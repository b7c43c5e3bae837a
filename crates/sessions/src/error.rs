pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("session id component contains ':': {component}")]
    InvalidSessionId { component: String },

    #[error("session store error: {0}")]
    Store(String),

    #[error("message log error: {0}")]
    MessageLog(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    /// Stable error-catalog code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::SessionNotFound { .. } => "GW-SESS-001",
            Error::InvalidSessionId { .. } => "GW-SESS-003",
            _ => "GW-INT-001",
        }
    }
}
