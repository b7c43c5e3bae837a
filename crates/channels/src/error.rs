/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across adapter traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The adapter exists but is not currently connected.
    #[error("channel adapter is not connected")]
    NotConnected,

    /// No adapter is registered for the requested channel.
    #[error("unknown channel: {channel}")]
    UnknownChannel { channel: String },

    /// Delivery to the channel failed. Retryable.
    #[error("channel send failed: {message}")]
    SendFailed { message: String },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn send_failed(message: impl std::fmt::Display) -> Self {
        Self::SendFailed {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_channel(channel: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            channel: channel.to_string(),
        }
    }

    /// Stable error-catalog code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotConnected => "GW-CHAN-002",
            Error::UnknownChannel { .. } => "GW-CHAN-001",
            Error::SendFailed { .. } => "GW-CHAN-004",
            Error::SerdeJson(_) => "GW-INT-001",
        }
    }
}
