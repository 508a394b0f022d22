use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("unknown sub-database: {0}")]
    UnknownSubDb(String),

    #[error("transaction was aborted by an inner scope")]
    TxAborted,

    #[error("environment is closed")]
    Closed,
}
