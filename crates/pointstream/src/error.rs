use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid byte size '{0}' (expected e.g. 1048576, 512k, 16m or 1g)")]
    InvalidByteSize(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("unknown render quality '{0}' (expected auto, coarse, medium or fine)")]
    UnknownQuality(String),

    #[error("point source '{name}' failed: {message}")]
    Source { name: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
