use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReqreplError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    #[error("Response has already been sent")]
    AlreadySent,

    #[error("Script error: {0}")]
    Script(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::net::AddrParseError> for ReqreplError {
    fn from(err: std::net::AddrParseError) -> Self {
        ReqreplError::Config(err.to_string())
    }
}

impl From<hyper::http::Error> for ReqreplError {
    fn from(err: hyper::http::Error) -> Self {
        ReqreplError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReqreplError>;
