use thiserror::Error;

/// Result type local to quarry-split.
pub type Result<T> = std::result::Result<T, SplitError>;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("split stream io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("checksum mismatch on {0} frame")]
    ChecksumMismatch(&'static str),

    /// The peer closed the stream without sending an end frame.
    #[error("split stream truncated: upstream closed before end of stream")]
    Truncated,

    #[error("split stream protocol: {0}")]
    Protocol(String),

    #[error("split schema: {0}")]
    Schema(String),
}

impl From<bincode::Error> for SplitError {
    fn from(e: bincode::Error) -> Self {
        SplitError::Codec(e.to_string())
    }
}
