//! Error taxonomy.
//!
//! Input validation errors are fatal and reported before any network or disk
//! activity. Fetch errors are recoverable per partition. Catalog errors
//! indicate a data-entry bug in the variable table, not a user mistake.

use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid period '{0}', expected 'YYYY-MM-DD' or 'YYYY-MM-DD/YYYY-MM-DD'")]
    InvalidPeriod(String),

    #[error("period start {0} is after period end {1}")]
    PeriodOrder(NaiveDate, NaiveDate),

    #[error("no climate variable requested")]
    NoVariables,

    #[error("unknown climate variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown area '{0}'")]
    UnknownArea(String),

    #[error("invalid area '{0}', expected a name, 'lon_min,lon_max,lat_min,lat_max' or 'name,lon_min,lon_max,lat_min,lat_max'")]
    InvalidArea(String),

    #[error("output directory '{0}' does not exist")]
    MissingOutputDir(PathBuf),

    #[error("temporary directory '{0}' does not exist")]
    MissingTmpDir(PathBuf),

    #[error("cannot create temporary working directory: {0}")]
    TmpDir(std::io::Error),

    #[error("invalid log level '{0}', expected 'error', 'warn', 'info', 'debug' or 'trace'")]
    InvalidLogLevel(String),

    #[error("cannot open log file '{0}'")]
    LogFile(PathBuf),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("dependency cycle detected while expanding '{0}'")]
    DependencyCycle(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no credentials found, set CDSAPI_URL/CDSAPI_KEY or create ~/.cdsapirc")]
    MissingCredentials,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote store returned status {status} for '{catalog}'")]
    Status { catalog: String, status: u16 },

    #[error("remote task {0} failed: {1}")]
    TaskFailed(String, String),

    #[error("malformed response from remote store: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed gridded document '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("archive file '{path}' is corrupt: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("grids are not aligned: {0}")]
    GridMismatch(String),

    #[error("no data to combine")]
    Empty,
}
