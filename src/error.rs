use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Cluster unavailable: {0}")]
    ClusterUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Malformed payload: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Election driver already started")]
    AlreadyStarted,

    #[error("Election driver is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ElectionError>;
