//! matchstats - rate-limited football statistics crawler and table builder
//!
//! Extraction walks a competition/season/match hierarchy on a throttled HTTP
//! API and saves every match document it reaches. Transformation parses the
//! saved documents into three related tables (matches, team statistics,
//! player statistics) and writes them as Parquet and CSV.

pub mod audit;
pub mod commands;
pub mod config;
pub mod crawl;
pub mod error;
pub mod meta;
pub mod models;
pub mod parse;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod table;

pub use config::Config;
pub use error::{Error, Result};
