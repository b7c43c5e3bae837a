use porter_protocol::Capability;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("node not found")]
    NotFound,

    /// The target node has no live connection.
    #[error("node not connected")]
    NotConnected,

    /// The connection died while a request was outstanding.
    #[error("node disconnected")]
    Disconnected,

    #[error("Action timeout")]
    ActionTimeout,

    /// The companion answered `success: false`.
    #[error("{0}")]
    ActionFailed(String),

    #[error("authentication failed")]
    AuthFailed,

    #[error("cannot unregister the local node")]
    LocalNodeProtected,

    #[error("node lacks capability: {0}")]
    MissingCapability(Capability),
}

impl Error {
    /// Stable error-catalog code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound => "GW-NODE-001",
            Error::NotConnected | Error::Disconnected => "GW-NODE-002",
            Error::MissingCapability(_) => "GW-NODE-003",
            Error::ActionTimeout => "GW-NODE-004",
            Error::ActionFailed(_) => "GW-NODE-005",
            Error::AuthFailed => "GW-AUTH-001",
            Error::LocalNodeProtected => "GW-NODE-006",
        }
    }
}
