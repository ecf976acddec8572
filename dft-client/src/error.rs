use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found")]
    NotFound,

    #[error("not the leader; retry against: {hint:?}")]
    NotLeader { hint: Option<String> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("request timed out")]
    Timeout,
}

impl ClientError {
    /// Leader address to retry against, when the server supplied one.
    #[must_use]
    pub fn leader_hint(&self) -> Option<&str> {
        match self {
            ClientError::NotLeader { hint } => hint.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
