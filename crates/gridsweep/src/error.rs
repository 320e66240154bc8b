use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridSweepError {
    #[error("Provider error: {0}")]
    Places(#[from] gridsweep_places::PlacesError),
    #[error("Search client error: {0}")]
    Client(#[from] crate::client::ClientError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Init Logging error: {0}")]
    InitLoggingError(#[from] tracing_subscriber::filter::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GridSweepError>;
