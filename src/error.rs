//! Custom error types for matchstats

use crate::crawl::FetchError;
use crate::parse::ParseFailure;
use thiserror::Error;

/// Main error type for matchstats operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing API credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseFailure),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Document already stored: {0} (forget it first to re-fetch)")]
    DocumentExists(String),

    #[error("Corrupt document {match_id}: checksum mismatch")]
    CorruptDocument { match_id: String },

    #[error("Not initialized: run 'matchstats init' first")]
    NotInitialized,

    #[error("Invalid entity reference: {0}")]
    InvalidEntity(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for matchstats
pub type Result<T> = std::result::Result<T, Error>;
