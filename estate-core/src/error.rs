use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid reference table {0}")]
    InvalidReference(String),

    #[error("scraper {0} not found")]
    NotFound(Uuid),

    #[error("scraper {0} has been deleted")]
    ScraperDeleted(Uuid),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("scraper {0} not found")]
    ScraperNotFound(Uuid),

    #[error("scraper {0} has been deleted")]
    ScraperDeleted(Uuid),

    #[error("invalid spec for scraper {id}: {reason}")]
    InvalidSpec { id: Uuid, reason: String },

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A payload that could not be walked; the caller keeps the original.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("payload nesting exceeds {limit} levels")]
pub struct NormalizeError {
    pub limit: usize,
}
