//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors raised anywhere in the sync pipeline
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("upstream data error: {0}")]
    UpstreamData(String),
    #[error("fetch failed for source {source_id}: {reason}")]
    Fetch { source_id: String, reason: String },
    #[error("header mismatch in {store}: expected [{expected}], found [{found}]")]
    HeaderMismatch { store: String, expected: String, found: String },
    #[error("corrupt row {line} in {store}: {reason}")]
    CorruptRow { store: String, line: u64, reason: String },
    #[error("spreadsheet unreachable after {attempts} attempts: {reason}")]
    Connectivity { attempts: u32, reason: String },
    #[error("spreadsheet api error after {attempts} attempts: {reason}")]
    SheetApi { attempts: u32, reason: String },
    #[error("playlist delivery stopped after {delivered} of {total} tracks: {reason}")]
    PartialDelivery { delivered: usize, total: usize, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("run cancelled: {0}")]
    Cancelled(String),
    #[error("csv error: {0}")]
    Csv(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

/// Coarse classes used to decide whether to retry, skip or abort
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    UpstreamData,
    Configuration,
    Fatal
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RateLimited(_) => ErrorKind::Transient,
            SyncError::UpstreamData(_) => ErrorKind::UpstreamData,
            SyncError::Config(_)
            | SyncError::InvalidInput(_)
            | SyncError::HeaderMismatch { .. }
            | SyncError::CorruptRow { .. } => ErrorKind::Configuration,
            _ => ErrorKind::Fatal
        }
    }

    /// One line meant for an interactive user, no internals
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Config(m) =>
                format!("configuration problem: {m}. Check your .env file."),
            SyncError::Auth(_) =>
                "the music service rejected the access token. Refresh it and retry."
                    .to_string(),
            SyncError::Fetch { source_id, .. } =>
                format!("could not read playlist {source_id}. Nothing was written."),
            SyncError::HeaderMismatch { store, .. } | SyncError::CorruptRow { store, .. } =>
                format!("{store} has an unexpected layout. Fix or move it before syncing."),
            SyncError::Connectivity { .. } =>
                "the spreadsheet could not be reached. Check your internet connection."
                    .to_string(),
            SyncError::PartialDelivery { delivered, total, .. } =>
                format!("only {delivered} of {total} tracks reached the playlist."),
            SyncError::Cancelled(m) => format!("run stopped early: {m}."),
            other => other.to_string()
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self { SyncError::Http(e.to_string()) }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self { SyncError::Parse(e.to_string()) }
}

impl From<csv::Error> for SyncError {
    fn from(e: csv::Error) -> Self { SyncError::Csv(e.to_string()) }
}
