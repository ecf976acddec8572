use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not the leader; current leader: {hint:?}")]
    NotLeader { hint: Option<String> },

    #[error("not found")]
    NotFound,

    #[error("operation timed out; outcome unknown")]
    Timeout,

    #[error("cluster unavailable: no quorum")]
    ClusterUnavailable,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage failure: {0}")]
    StorageFatal(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DriftError {
    /// Leader address embedded in a `NotLeader` rejection, if any.
    #[must_use]
    pub fn leader_hint(&self) -> Option<&str> {
        match self {
            DriftError::NotLeader { hint } => hint.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DriftError>;
