use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("could not fetch metadata from any peer")]
    NoMetadata,

    // control signal, not a failure: unwinds workers when the last block lands
    #[error("download complete")]
    DownloadComplete,

    // control signal: the peer currently offers nothing we are missing
    #[error("peer has no new blocks")]
    NoNewBlocks,

    #[error("operation timed out")]
    Timeout,
}
