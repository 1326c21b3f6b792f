use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("a scan is already in progress")]
    AlreadyRunning,

    #[error("no scan is currently running")]
    NoActiveScan,

    /// A cancelled scan is a distinct terminal outcome, not a failure: the
    /// manager maps this to status "cancelled" rather than "failed".
    #[error("scan cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
