use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("transport rejected credentials: {0}")]
    Unauthorized(String),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("channel is not connected")]
    NotConnected,
    #[error("unknown chat: {0}")]
    UnknownChat(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("operation not supported by this channel")]
    Unsupported,
}
