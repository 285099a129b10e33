//! Error types for `ucd_rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required parameter is missing or malformed. Never retried.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Network or server failure that survived the transport's retry budget.
    #[error("transport error after {attempts} attempt(s): {reason}")]
    Transport { attempts: u32, reason: String },

    /// The server answered with a non-2xx status outside the 404/5xx classes.
    #[error("request failed with HTTP {status}")]
    HttpStatus { status: u16 },

    /// Exact full-row duplicates found after normalization.
    #[error("{count} duplicate row(s) detected; set ignore_duplicates to drop them")]
    DuplicateRows { count: usize },

    /// A single dataflow's schema could not be fetched during sync.
    #[error("schema fetch failed for dataflow {dataflow}: {reason}")]
    SchemaFetch { dataflow: String, reason: String },

    #[error("xml error: {0}")]
    Xml(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
