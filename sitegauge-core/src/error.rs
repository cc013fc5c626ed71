use crate::config::ConfigError;
use crate::model::{ClientId, CrawlId};
use sitegauge_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("scanner error: {0}")]
    Scan(#[from] ScanError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("unknown crawl {0}")]
    UnknownCrawl(CrawlId),

    #[error("invalid root URL {0}")]
    InvalidRoot(String),

    #[error("stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("database lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, CoreError>;
